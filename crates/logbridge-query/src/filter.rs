use logbridge_types::Filter;

use crate::ast::Key;
use crate::parser::parse;

/// Flatten a filter query into pod, container and file sets
///
/// Negation cannot be expressed by the tailing matcher, so a query that uses
/// `NOT` or fails to parse is kept as free text.
pub fn parse_filter(text: &str) -> Filter {
    let text = text.trim();
    if text.is_empty() {
        return Filter::default();
    }

    let expr = match parse(text) {
        Ok(expr) if !expr.has_negation() => expr,
        Ok(_) => {
            tracing::debug!(query = text, "Negated filter, using free text");
            return Filter::free_text(text);
        }
        Err(err) => {
            tracing::debug!(query = text, error = %err, "Unparsable filter, using free text");
            return Filter::free_text(text);
        }
    };

    let mut filter = Filter::default();
    for condition in expr.conditions() {
        match condition.key {
            Key::Pod => filter.add_pod(condition.value.as_str()),
            Key::Container => filter.add_container(condition.value.as_str()),
            Key::File => filter.add_file(condition.value.as_str()),
        }
    }
    filter
}
