//! The library manifest (`library.manifest.json`).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::RegistryError;

/// `provides.nodeTypes[]` and friends — the capabilities a library package
/// advertises.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provides {
    #[serde(default, rename = "nodeTypes")]
    pub node_types: Vec<String>,
}

/// `node-library` packages register node types; `extension` packages route
/// HTTP under `extension/routes.*`, handled by the (out-of-scope) API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LibraryType {
    NodeLibrary,
    Extension,
}

impl Default for LibraryType {
    fn default() -> Self {
        LibraryType::NodeLibrary
    }
}

/// `<libraries_root>/<library_id>/library.manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryManifest {
    #[serde(rename = "libraryId")]
    pub library_id: String,
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub name: String,
    /// A semver *prefix* — `"1"`, `"1.2"`, and `"1.2.3"` are all accepted.
    pub version: String,
    #[serde(default, rename = "type")]
    pub library_type: LibraryType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub provides: Provides,
    #[serde(default, rename = "uiExtensions")]
    pub ui_extensions: Vec<serde_json::Value>,
    #[serde(default)]
    pub requirements: Option<serde_json::Value>,
}

fn kebab_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("static regex is valid"))
}

/// Structural validation, fatal on any failure — `Validation` errors never
/// touch the registry.
pub fn validate(manifest: &LibraryManifest) -> Result<(), RegistryError> {
    if manifest.schema_version != 1 {
        return Err(RegistryError::Validation(format!(
            "unsupported schemaVersion {} (expected 1)",
            manifest.schema_version
        )));
    }
    if manifest.library_id.is_empty() || !kebab_regex().is_match(&manifest.library_id) {
        return Err(RegistryError::Validation(format!(
            "libraryId '{}' must be lowercase kebab-case",
            manifest.library_id
        )));
    }
    if manifest.name.is_empty() {
        return Err(RegistryError::Validation("name is required".to_string()));
    }
    if !is_semver_prefix(&manifest.version) {
        return Err(RegistryError::Validation(format!(
            "version '{}' is not a valid semver prefix",
            manifest.version
        )));
    }
    if manifest.library_type == LibraryType::NodeLibrary && manifest.provides.node_types.is_empty() {
        return Err(RegistryError::Validation(
            "node-library manifest must provide at least one node type".to_string(),
        ));
    }
    Ok(())
}

/// Accepts `"1"`, `"1.2"`, or a full `"1.2.3"` (and a leading `v`, as `semver`
/// itself does not).
fn is_semver_prefix(raw: &str) -> bool {
    let trimmed = raw.strip_prefix('v').unwrap_or(raw);
    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return false;
    }
    parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> LibraryManifest {
        LibraryManifest {
            library_id: "lib-x".to_string(),
            schema_version: 1,
            name: "Lib X".to_string(),
            version: "1.0.0".to_string(),
            library_type: LibraryType::NodeLibrary,
            description: None,
            author: None,
            provides: Provides { node_types: vec!["foo".to_string()] },
            ui_extensions: vec![],
            requirements: None,
        }
    }

    #[test]
    fn valid_manifest_passes() {
        assert!(validate(&base()).is_ok());
    }

    #[test]
    fn uppercase_library_id_is_rejected() {
        let mut m = base();
        m.library_id = "LibX".to_string();
        assert!(validate(&m).is_err());
    }

    #[test]
    fn semver_prefix_is_accepted() {
        let mut m = base();
        m.version = "1".to_string();
        assert!(validate(&m).is_ok());
        m.version = "1.2".to_string();
        assert!(validate(&m).is_ok());
    }

    #[test]
    fn node_library_without_node_types_is_rejected() {
        let mut m = base();
        m.provides.node_types.clear();
        assert!(validate(&m).is_err());
    }

    #[test]
    fn extension_without_node_types_is_fine() {
        let mut m = base();
        m.library_type = LibraryType::Extension;
        m.provides.node_types.clear();
        assert!(validate(&m).is_ok());
    }
}
