//! Compilation of filter queries into the log store's query language
//!
//! ```text
//! SELECT FROM <source> [WHERE <expr>] [OFFSET <n>] [LIMIT <n>]
//! ```

use logbridge_types::{Position, QueryRequest};

use crate::ast::{Expression, Key, Operand, OrCondition, XCondition};
use crate::parser::parse;

/// Compile `filter_text` into a query selecting from `source`
///
/// Empty text selects everything. Text that does not parse becomes a
/// lowercased literal search on the message. `OFFSET` is emitted when
/// `offset != 0` and `LIMIT` when `limit > 0`.
pub fn build_lql(filter_text: &str, source: &str, limit: i64, offset: i64) -> String {
    let mut lql = format!("SELECT FROM {}", source);

    if !filter_text.is_empty() {
        lql.push_str(" WHERE ");
        match parse(filter_text) {
            Ok(expr) => {
                let mut files = Vec::new();
                lql.push_str(&render_expression(&expr, &mut files));
                for file in &files {
                    lql.push_str(&format!(" OR fields:file CONTAINS \"{}\"", file));
                }
            }
            Err(err) => {
                tracing::debug!(
                    error = %err,
                    pos = err.position(),
                    "Filter is not a structured query, using literal search"
                );
                lql.push_str(&format!(
                    "msg CONTAINS \"{}\"",
                    escape(filter_text).to_lowercase()
                ));
            }
        }
    }

    if offset != 0 {
        lql.push_str(&format!(" OFFSET {}", offset));
    }
    if limit > 0 {
        lql.push_str(&format!(" LIMIT {}", limit));
    }

    lql
}

/// Build the full request sent to the log store
pub fn build_query_request(
    filter_text: &str,
    source: &str,
    position: Position,
    limit: i64,
    offset: i64,
) -> QueryRequest {
    QueryRequest {
        query: build_lql(filter_text, source, limit, offset),
        position,
        offset,
        limit,
    }
}

fn render_expression(expr: &Expression, files: &mut Vec<String>) -> String {
    let rendered: Vec<String> = expr
        .branches
        .iter()
        .map(|branch| render_branch(branch, files))
        .collect();
    parenthesize(rendered.join(" OR "), rendered.len())
}

fn render_branch(branch: &OrCondition, files: &mut Vec<String>) -> String {
    let rendered: Vec<String> = branch
        .terms
        .iter()
        .map(|term| render_term(term, files))
        .collect();
    parenthesize(rendered.join(" AND "), rendered.len())
}

fn render_term(term: &XCondition, files: &mut Vec<String>) -> String {
    let body = match &term.operand {
        Operand::Group(expr) => render_expression(expr, files),
        Operand::Leaf(condition) => {
            let value = escape(&condition.value);
            let rendered = format!("fields:{}=\"{}\"", condition.key.field(), value);
            if condition.key == Key::File && !files.contains(&value) {
                files.push(value);
            }
            rendered
        }
    };

    if term.negated {
        format!("NOT {}", body)
    } else {
        body
    }
}

fn parenthesize(text: String, parts: usize) -> String {
    if parts > 1 { format!("({})", text) } else { text }
}

/// Escape a value for use inside a double-quoted string literal
fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
