use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid symbol metadata for {id}: {reason}")]
    InvalidSymbol { id: String, reason: String },

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Invalid period {0}: must be positive")]
    InvalidPeriod(i64),
}
