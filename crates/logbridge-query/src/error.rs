use thiserror::Error;

/// Failure to tokenize or parse a filter query
///
/// Every variant carries the byte offset into the input where the failure was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string starting at {pos}")]
    UnterminatedString { pos: usize },

    #[error("unexpected '{found}' at {pos}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        pos: usize,
    },

    #[error("unexpected end of query at {pos}, expected {expected}")]
    UnexpectedEnd { expected: &'static str, pos: usize },

    #[error("unknown key '{key}' at {pos}")]
    UnknownKey { key: String, pos: usize },

    #[error("groups nested deeper than {limit} levels at {pos}")]
    TooDeep { limit: usize, pos: usize },
}

impl QueryError {
    /// Byte offset of the failure
    pub fn position(&self) -> usize {
        match self {
            Self::UnexpectedChar { pos, .. }
            | Self::UnterminatedString { pos }
            | Self::UnexpectedToken { pos, .. }
            | Self::UnexpectedEnd { pos, .. }
            | Self::UnknownKey { pos, .. }
            | Self::TooDeep { pos, .. } => *pos,
        }
    }
}
