//! Engine-level error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation ------
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference { node_id: String, side: &'static str },

    #[error("flow graph contains a cycle")]
    CycleDetected,

    #[error("flow is invalid: {0}")]
    Validation(String),

    // ------ NotFound ------
    #[error("node type '{0}' is not registered")]
    UnknownNodeType(String),

    #[error("flow '{0}' not found")]
    FlowNotFound(uuid::Uuid),

    // ------ Execution ------
    /// A node failed and its `onError` is `stop`; the whole invocation is
    /// aborted.
    #[error("node '{node_id}' failed fatally: {message}")]
    NodeFatal { node_id: String, message: String },

    #[error("execution was cancelled")]
    Cancelled,

    // ------ Collaborators ------
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

impl EngineError {
    /// A stable, user-visible `kind` string for API clients to match on.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::DuplicateNodeId(_)
            | EngineError::UnknownNodeReference { .. }
            | EngineError::CycleDetected
            | EngineError::Validation(_) => "Validation",
            EngineError::UnknownNodeType(_) | EngineError::FlowNotFound(_) => "NotFound",
            EngineError::NodeFatal { .. } => "Fatal",
            EngineError::Cancelled => "Cancelled",
            EngineError::Registry(_) => "Validation",
            EngineError::Database(_) => "Transient",
        }
    }
}
