//! Condition error types

/// Errors raised while parsing a condition
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    #[error("Parse error at line {line}, column {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
    },

    #[error("Unexpected token at column {col}: expected {expected}, found '{found}'")]
    UnexpectedToken {
        col: usize,
        expected: String,
        found: String,
    },

    #[error("Unexpected end of condition: expected {0}")]
    UnexpectedEof(String),

    #[error("Condition nests deeper than {max} levels at column {col}")]
    TooDeep { col: usize, max: usize },

    #[error("Invalid number literal: '{0}'")]
    InvalidNumber(String),
}

/// Result type alias for condition operations
pub type ConditionResult<T> = Result<T, ConditionError>;
