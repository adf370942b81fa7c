//! The tag value and tag descriptor data model.

use chrono::{DateTime, Utc};
use quality::Quality;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The payload half of a [`TagValue`] — a tagged union of number / string /
/// structured data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagData {
    Null,
    Number(f64),
    Text(String),
    Structured(serde_json::Value),
}

impl TagData {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagData::Number(n) => Some(*n),
            TagData::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, TagData::Null)
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TagData::Null => serde_json::Value::Null,
            TagData::Number(n) => serde_json::json!(n),
            TagData::Text(s) => serde_json::json!(s),
            TagData::Structured(v) => v.clone(),
        }
    }
}

/// A value, its quality, and the instant it was produced.
///
/// A `TagValue` without an explicit timestamp is treated as "now" — callers
/// that deserialise a bare value should fill in `Utc::now()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagValue {
    pub value: TagData,
    pub quality: Quality,
    pub timestamp: DateTime<Utc>,
}

impl TagValue {
    #[must_use]
    pub fn new(value: TagData, quality: Quality) -> Self {
        Self { value, quality, timestamp: Utc::now() }
    }

    #[must_use]
    pub fn good(value: TagData) -> Self {
        Self::new(value, Quality::GOOD)
    }

    #[must_use]
    pub fn bad(value: TagData) -> Self {
        Self::new(value, Quality::BAD)
    }

    #[must_use]
    pub fn null_bad() -> Self {
        Self::new(TagData::Null, Quality::BAD)
    }

    /// `value == null ⇒ quality ≤ uncertain` does not hold for this value;
    /// a null payload with Good quality never
    /// appears in practice but the invariant is stated the other way round
    /// (null implies *at least* uncertain), which this checks.
    #[must_use]
    pub fn upholds_null_invariant(&self) -> bool {
        !self.value.is_null() || self.quality.at_most_uncertain()
    }
}

/// The closed set of driver types a tag may belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriverType {
    /// Authoritative writer is the engine itself — the only kind a node may
    /// write to.
    Internal,
    /// Engine/runtime telemetry (scan timings, resource stats, …).
    System,
    Opcua,
    Modbus,
    Mqtt,
}

/// Symbolic tag data type, e.g. `BOOL`/`INT`/`REAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Bool,
    Int,
    Real,
    String,
}

/// Immutable metadata describing a tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagDescriptor {
    pub tag_id: Uuid,
    pub tag_path: String,
    pub tag_name: String,
    pub data_type: DataType,
    pub connection_id: Uuid,
    pub driver_type: DriverType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_with_good_quality_violates_the_invariant() {
        let v = TagValue::new(TagData::Null, Quality::GOOD);
        assert!(!v.upholds_null_invariant());
    }

    #[test]
    fn null_with_bad_quality_upholds_the_invariant() {
        let v = TagValue::null_bad();
        assert!(v.upholds_null_invariant());
    }
}
