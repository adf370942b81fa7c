//! Registry- and library-manager-level error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Re-registration of an existing node type is refused outright.
    #[error("node type '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("node type '{0}' is not registered")]
    NotFound(String),

    /// A [`crate::manifest::LibraryManifest`] or [`nodes::NodeDescription`]
    /// failed structural validation. Fatal — the caller must not touch the
    /// registry or a library record on this path.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("library '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("library '{0}' is not loaded")]
    NotLoaded(String),

    #[error("library manifest not found at {0}")]
    ManifestMissing(std::path::PathBuf),

    #[error("library entry point not found at {0}")]
    EntryPointMissing(std::path::PathBuf),

    #[error("failed to read library on disk: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse library manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),

    #[error("failed to load dynamic library: {0}")]
    Dynamic(#[from] libloading::Error),

    #[error("library '{library_id}' register_nodes hook returned error code {code}")]
    HookFailed { library_id: String, code: i32 },
}
