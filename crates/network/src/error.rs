//! Scheduler and collaborator error types.

use thiserror::Error;

use tidemark_core::{CoreError, DataId, TaskId};

/// Error reported by an external collaborator (repository, executor,
/// symbol library, notification sink, ...).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The collaborator could not be reached at all.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum NetworkError {
    /// An expression references an input with no node behind it.
    #[error("unknown reference: {0}")]
    UnknownReference(DataId),

    #[error("node not found: {0}")]
    NodeNotFound(DataId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// Symbol metadata for a node's output could not be fetched or parsed.
    #[error("normalization failed for {id}: {reason}")]
    Normalization { id: DataId, reason: String },

    #[error("not a root node: {0}")]
    NotRoot(DataId),

    /// Missing collaborator or no async runtime at construction.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T, E = NetworkError> = std::result::Result<T, E>;
