//! Bus-level error type.

use thiserror::Error;

/// Errors a [`crate::Transport`] can report. These are always `Transient`
/// from a node's point of view: the caller logs and continues, it never
/// aborts an invocation over a failed publish.
#[derive(Debug, Error, Clone)]
pub enum BusError {
    #[error("bus transport unavailable: {0}")]
    Unavailable(String),

    #[error("bus publish channel closed")]
    ChannelClosed,

    #[error("failed to serialise bus payload: {0}")]
    Serialize(String),
}
