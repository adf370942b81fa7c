//! Node-level error type.
//!
//! The engine uses the variant to decide what happens next: everything here
//! surfaces through the node's own `onError` setting before the executor
//! ever sees it.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// A value of the wrong shape reached an operation that can't accept it
    /// (boolean into numeric, non-numeric into a math op, a write aimed at
    /// a non-INTERNAL tag).
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A referenced tag, flow, or node type does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A DB read, TSDB read, or bus publish failed transiently. Reads
    /// propagate as Bad quality; writes are fire-and-forget and this is
    /// logged and swallowed by the caller.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A hard failure that must abort the node (and, if `onError = stop`,
    /// the whole invocation) — e.g. divide-by-zero.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The invocation was cancelled while this node was suspended.
    #[error("execution cancelled")]
    Cancelled,
}

impl NodeError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::TypeMismatch(_) => "TypeMismatch",
            NodeError::NotFound(_) => "NotFound",
            NodeError::Transient(_) => "Transient",
            NodeError::Fatal(_) => "Fatal",
            NodeError::Cancelled => "Cancelled",
        }
    }
}
