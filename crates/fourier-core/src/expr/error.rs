//! Error types for the expression sandbox.

/// Errors produced while compiling or evaluating model-generated function source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("syntax error at column {column}: {message}")]
    Syntax { column: usize, message: String },

    #[error("unknown name: {0}")]
    UnknownName(String),

    #[error("function {name} expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("unsupported statement: {0}")]
    UnsupportedStatement(String),

    #[error("function '{expected}' not found (available: {available:?})")]
    FunctionNotFound {
        expected: String,
        available: Vec<String>,
    },

    #[error("empty function source")]
    EmptySource,

    #[error("index {index} out of range for '{name}' (len {len})")]
    IndexOutOfRange { name: String, index: i64, len: usize },

    #[error("range too large in generator: {0} iterations")]
    RangeTooLarge(i64),

    #[error("range() argument out of bounds: {0}")]
    RangeBound(f64),

    #[error("evaluation exceeded {0} generator steps")]
    StepBudgetExceeded(u64),

    #[error("non-finite value {value} at t={t}")]
    NonFinite { t: f64, value: f64 },
}

impl EvalError {
    pub(crate) fn syntax(column: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            column,
            message: message.into(),
        }
    }
}

/// Result type for expression sandbox operations.
pub type EvalResult<T> = std::result::Result<T, EvalError>;
