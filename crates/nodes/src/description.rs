//! The schema-validated node-type contract — what a node type declares
//! about its ports, parameters, and capabilities.

use serde::{Deserialize, Serialize};

/// The semantic type an input or output port declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Number,
    Boolean,
    Main,
    Any,
}

/// One declared input or output port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

/// One declared configuration property (keys of `NodeInstance::data`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub required: bool,
}

/// A parameter-conditioned I/O shape: when `when` matches the node's
/// configured data, `inputs`/`outputs` override the base description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoRule {
    pub when: serde_json::Value,
    #[serde(default)]
    pub inputs: Vec<PortDescriptor>,
    #[serde(default)]
    pub outputs: Vec<PortDescriptor>,
}

/// The immutable, schema-validated contract for a node type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescription {
    pub schema_version: u32,
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub category: String,
    #[serde(default)]
    pub inputs: Vec<PortDescriptor>,
    #[serde(default)]
    pub outputs: Vec<PortDescriptor>,
    #[serde(default)]
    pub properties: Vec<PropertyDescriptor>,
    #[serde(default)]
    pub io_rules: Vec<IoRule>,
    #[serde(default)]
    pub visual: Option<serde_json::Value>,
    #[serde(default)]
    pub config_ui: Option<serde_json::Value>,
}

/// A finding from [`validate`]: either a fatal error (rejects registration)
/// or a non-fatal warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    Error(String),
    Warning(String),
}

impl Finding {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Finding::Error(_))
    }
}

/// Structural schema validation for a [`NodeDescription`] — required fields
/// present, `name` matches `^[a-z0-9-]+$`, arrays are arrays (guaranteed by
/// the type system here), `schemaVersion == 1`.
#[must_use]
pub fn validate(desc: &NodeDescription) -> Vec<Finding> {
    let mut findings = Vec::new();

    if desc.schema_version != 1 {
        findings.push(Finding::Error(format!(
            "unsupported schemaVersion {} (expected 1)",
            desc.schema_version
        )));
    }
    if desc.name.is_empty() {
        findings.push(Finding::Error("name is required".to_string()));
    } else if !is_valid_name(&desc.name) {
        findings.push(Finding::Error(format!(
            "name '{}' must match ^[a-z0-9-]+$",
            desc.name
        )));
    }
    if desc.display_name.is_empty() {
        findings.push(Finding::Warning("displayName is empty".to_string()));
    }
    if desc.version.is_empty() {
        findings.push(Finding::Error("version is required".to_string()));
    }
    if desc.category.is_empty() {
        findings.push(Finding::Warning("category is empty".to_string()));
    }
    if desc.inputs.is_empty() && desc.outputs.is_empty() {
        findings.push(Finding::Warning(
            "node declares neither inputs nor outputs".to_string(),
        ));
    }

    findings
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
