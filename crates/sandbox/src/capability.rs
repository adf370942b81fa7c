//! The capability surface exposed to a sandboxed script.
//!
//! Each capability is a small struct/trait whose methods are the *only* way
//! a script can reach outside its sealed scope. Nothing here ever hands a
//! script a raw database handle, a file descriptor, or an ambient global.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quality::Quality;

use crate::error::SandboxError;

/// One historical or current reading of a tag, as seen by `$tags`.
#[derive(Debug, Clone)]
pub struct TagReading {
    pub value: serde_json::Value,
    pub quality: Quality,
    pub timestamp: DateTime<Utc>,
}

/// Supplies `$tags.get(path)` / `$tags.history(path, window)`.
///
/// Implemented by the host (the `nodes` crate's `ExecutionContext`) so the
/// sandbox never depends on the engine or the persistence layer directly.
pub trait TagReader: Send + Sync {
    fn get(&self, path: &str) -> Option<TagReading>;
    fn history(&self, path: &str, window_secs: i64) -> Vec<TagReading>;
}

/// Supplies `$flow.state.get(key)` / `$flow.state.set(key, value)`, backed
/// by the flow's `staticData`.
pub trait FlowState: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: serde_json::Value);
}

/// Filesystem access restricted to an explicit allow-list of base paths.
///
/// Every path is resolved to absolute form, rejected if it contains `..`
/// anywhere, and must begin with one of `allowed_roots`. An empty
/// `allowed_roots` means filesystem access is denied outright, matching
/// `flow.script.allowed_paths` being empty in the engine configuration.
#[derive(Clone)]
pub struct FsCapability {
    allowed_roots: Vec<PathBuf>,
}

/// Scripts are denied any file larger than this.
pub const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

impl FsCapability {
    #[must_use]
    pub fn new(allowed_roots: Vec<PathBuf>) -> Self {
        Self { allowed_roots }
    }

    /// No roots configured: every `$fs` call is denied.
    #[must_use]
    pub fn denied() -> Self {
        Self { allowed_roots: Vec::new() }
    }

    fn resolve(&self, raw: &str) -> Result<PathBuf, SandboxError> {
        if raw.split(['/', '\\']).any(|seg| seg == "..") {
            return Err(SandboxError::FsDenied(format!("path contains '..': {raw}")));
        }
        let candidate = Path::new(raw);
        let candidate = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            // Relative paths are resolved against the first allowed root,
            // matching a script author's expectation of a single working
            // directory rather than the host process's cwd.
            match self.allowed_roots.first() {
                Some(root) => root.join(candidate),
                None => return Err(SandboxError::FsDenied(raw.to_string())),
            }
        };

        if self
            .allowed_roots
            .iter()
            .any(|root| candidate.starts_with(root))
        {
            Ok(candidate)
        } else {
            Err(SandboxError::FsDenied(raw.to_string()))
        }
    }

    pub fn read_file(&self, raw: &str) -> Result<String, SandboxError> {
        let path = self.resolve(raw)?;
        let meta = std::fs::metadata(&path)?;
        if meta.len() > MAX_FILE_BYTES {
            return Err(SandboxError::FsTooLarge);
        }
        Ok(std::fs::read_to_string(path)?)
    }

    pub fn write_file(&self, raw: &str, contents: &str) -> Result<(), SandboxError> {
        if contents.len() as u64 > MAX_FILE_BYTES {
            return Err(SandboxError::FsTooLarge);
        }
        let path = self.resolve(raw)?;
        Ok(std::fs::write(path, contents)?)
    }

    pub fn exists(&self, raw: &str) -> bool {
        self.resolve(raw).map(|p| p.exists()).unwrap_or(false)
    }

    pub fn read_dir(&self, raw: &str) -> Result<Vec<String>, SandboxError> {
        let path = self.resolve(raw)?;
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }
}

/// Everything a single script invocation is allowed to touch.
#[derive(Clone)]
pub struct SandboxCapabilities {
    pub tags: Arc<dyn TagReader>,
    pub flow_state: Arc<dyn FlowState>,
    pub fs: FsCapability,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_dotdot_segments() {
        let fs = FsCapability::new(vec![PathBuf::from("/allowed")]);
        assert!(matches!(
            fs.resolve("/allowed/../etc/passwd"),
            Err(SandboxError::FsDenied(_))
        ));
    }

    #[test]
    fn rejects_paths_outside_every_root() {
        let fs = FsCapability::new(vec![PathBuf::from("/allowed")]);
        assert!(matches!(fs.resolve("/other/file.txt"), Err(SandboxError::FsDenied(_))));
    }

    #[test]
    fn accepts_path_under_an_allowed_root() {
        let fs = FsCapability::new(vec![PathBuf::from("/allowed")]);
        assert_eq!(fs.resolve("/allowed/sub/file.txt").unwrap(), PathBuf::from("/allowed/sub/file.txt"));
    }

    #[test]
    fn denied_capability_rejects_everything() {
        let fs = FsCapability::denied();
        assert!(matches!(fs.resolve("/anything"), Err(SandboxError::FsDenied(_))));
    }
}
