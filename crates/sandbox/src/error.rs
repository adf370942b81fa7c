//! Error type for the script sandbox.

use thiserror::Error;

/// Failures that can occur while preparing or running a sandboxed script.
///
/// Note this is distinct from [`crate::ScriptError`], which is the
/// *in-band* error returned to the caller inside a [`crate::ScriptOutcome`]
/// when the script itself fails — a `SandboxError` means the sandbox could
/// not even attempt to run the script (e.g. the task panicked).
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The script's wall-time budget was exceeded.
    #[error("script exceeded its wall-time bound")]
    Timeout,

    /// The `spawn_blocking` task running the script panicked.
    #[error("script task panicked: {0}")]
    TaskPanicked(String),

    /// A `$fs` call referenced a path outside every allowed root, or used
    /// `..` to try to escape one.
    #[error("filesystem access denied: {0}")]
    FsDenied(String),

    /// A `$fs` call would read or write more than the 10 MiB cap.
    #[error("file exceeds the sandbox's 10 MiB size limit")]
    FsTooLarge,

    /// Underlying filesystem I/O error.
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}
