//! POSIX extended regular expressions for the tailing path
//!
//! Matched log lines start with a fixed prefix:
//!
//! ```text
//! 2019-01-01T01:01:01.123Z  <forwarder>  <pod>_<namespace>_<container>-<file> ...
//! ```

use logbridge_types::Filter;

/// ISO-8601 timestamp with fractional seconds
pub const TIMESTAMP: &str = r"[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}\.[0-9]+Z";

/// One or more whitespace characters
pub const WHITESPACE: &str = "[[:space:]]+";

/// Forwarder (source) name
pub const IDENTIFIER: &str = "[a-zA-Z0-9-]+";

/// Any run of characters up to the `_` field delimiter
pub const PLACEHOLDER: &str = "[^_]+";

/// Build the ERE matching log lines selected by `filter`
///
/// Free text takes priority and is matched literally. Otherwise every pod is
/// combined with every container/file pair; missing pods or containers become
/// wildcards. Bare file values are added as standalone alternatives.
pub fn build_matcher(filter: &Filter) -> String {
    if filter.has_free_text() {
        return escape(filter.free_text.trim());
    }

    let containers: Vec<String> = if filter.containers.is_empty() {
        vec![PLACEHOLDER.to_string()]
    } else {
        filter.containers.iter().map(|c| escape(c)).collect()
    };
    let files: Vec<String> = if filter.files.is_empty() {
        vec![String::new()]
    } else {
        filter.files.iter().map(|f| escape(f)).collect()
    };

    let suffixes: Vec<String> = containers
        .iter()
        .flat_map(|container| files.iter().map(move |file| format!("{}-{}", container, file)))
        .collect();
    let suffix_group = format!("({})", suffixes.join("|"));

    let pods: Vec<String> = if filter.pods.is_empty() {
        vec![PLACEHOLDER.to_string()]
    } else {
        filter.pods.iter().map(|p| escape(p)).collect()
    };

    let mut alternatives: Vec<String> = pods
        .iter()
        .map(|pod| format!("{}_{}_{}", pod, PLACEHOLDER, suffix_group))
        .collect();
    alternatives.extend(filter.files.iter().map(|f| escape(f)));

    format!(
        "^{}{}{}{}({})",
        TIMESTAMP,
        WHITESPACE,
        IDENTIFIER,
        WHITESPACE,
        alternatives.join("|")
    )
}

/// Escape ERE metacharacters so the text matches literally
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(
            ch,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        ) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
