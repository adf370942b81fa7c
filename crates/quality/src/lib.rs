//! `quality` crate — the OPC-UA–style quality algebra.
//!
//! A tiny, pure module: combining quality codes and classifying them never
//! touches I/O or depends on any other crate in the workspace. Every node
//! implementation imports this instead of re-deriving "min of qualities".

use serde::{Deserialize, Serialize};

/// An 8-bit OPC-UA–style quality code.
///
/// The wire representation is the raw byte (`0`, `64`, `192`, …) so that a
/// [`Quality`] round-trips losslessly through `serde_json` as a plain
/// number. This repository pins the OPC-UA convention: `0` is Good, `64` is
/// Uncertain, `192` is Bad, and "worse" quality always dominates when
/// combined — see `DESIGN.md` for the rationale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(pub u8);

impl Quality {
    /// The OPC-UA Good code.
    pub const GOOD: Quality = Quality(0);
    /// The OPC-UA Uncertain code.
    pub const UNCERTAIN: Quality = Quality(64);
    /// The OPC-UA Bad code.
    pub const BAD: Quality = Quality(192);

    /// `true` iff this code is exactly [`Quality::GOOD`].
    #[must_use]
    pub fn is_good(self) -> bool {
        self == Quality::GOOD
    }

    /// `true` iff this code is at or above [`Quality::UNCERTAIN`] but below
    /// [`Quality::BAD`].
    #[must_use]
    pub fn is_uncertain(self) -> bool {
        self.0 >= Quality::UNCERTAIN.0 && self.0 < Quality::BAD.0
    }

    /// `true` iff this code is at or above [`Quality::BAD`].
    #[must_use]
    pub fn is_bad(self) -> bool {
        self.0 >= Quality::BAD.0
    }

    /// `true` iff this code is [`Quality::UNCERTAIN`] or worse.
    #[must_use]
    pub fn at_most_uncertain(self) -> bool {
        self.0 >= Quality::UNCERTAIN.0
    }
}

impl Default for Quality {
    /// Nodes that never examine their inputs still need a starting point;
    /// absent evidence to the contrary, a value is assumed Good.
    fn default() -> Self {
        Quality::GOOD
    }
}

impl From<u8> for Quality {
    fn from(code: u8) -> Self {
        Quality(code)
    }
}

/// Combine any number of quality codes, returning the worst (highest) one.
///
/// Deterministic and total: `combine(&[])` returns [`Quality::GOOD`] (the
/// identity element — a node with no inputs has nothing to degrade its
/// output).
#[must_use]
pub fn combine(qualities: &[Quality]) -> Quality {
    qualities.iter().copied().max().unwrap_or(Quality::GOOD)
}

/// A value alongside the quality it carries, the unit most nodes exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithQuality<T> {
    pub value: T,
    pub quality: Quality,
}

/// Unpack a raw `serde_json::Value` into a `(value, quality)` pair.
///
/// If `x` looks like `{"value": ..., "quality": ...}` the two fields are
/// read out directly. Otherwise `x` is treated as the raw value with
/// [`Quality::GOOD`], so that a plain number or string tag read from an
/// external system that carries no quality envelope still composes with the
/// rest of the algebra.
#[must_use]
pub fn extract(x: &serde_json::Value) -> (serde_json::Value, Quality) {
    if let Some(obj) = x.as_object() {
        if let (Some(value), Some(quality)) = (obj.get("value"), obj.get("quality")) {
            let q = quality.as_u64().map_or(Quality::GOOD, |n| Quality(n as u8));
            return (value.clone(), q);
        }
    }
    (x.clone(), Quality::GOOD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_is_zero() {
        assert_eq!(Quality::GOOD.0, 0);
        assert!(Quality::GOOD.is_good());
        assert!(!Quality::GOOD.is_uncertain());
        assert!(!Quality::GOOD.is_bad());
    }

    #[test]
    fn combine_picks_the_worst() {
        let q = combine(&[Quality::GOOD, Quality::UNCERTAIN, Quality::GOOD]);
        assert_eq!(q, Quality::UNCERTAIN);

        let q = combine(&[Quality::BAD, Quality::GOOD]);
        assert_eq!(q, Quality::BAD);
    }

    #[test]
    fn combine_of_empty_is_good() {
        assert_eq!(combine(&[]), Quality::GOOD);
    }

    #[test]
    fn at_most_uncertain_includes_bad() {
        assert!(Quality::UNCERTAIN.at_most_uncertain());
        assert!(Quality::BAD.at_most_uncertain());
        assert!(!Quality::GOOD.at_most_uncertain());
    }

    #[test]
    fn extract_unpacks_envelope() {
        let v = serde_json::json!({"value": 42, "quality": 64});
        let (value, quality) = extract(&v);
        assert_eq!(value, serde_json::json!(42));
        assert_eq!(quality, Quality::UNCERTAIN);
    }

    #[test]
    fn extract_treats_raw_value_as_good() {
        let v = serde_json::json!(42);
        let (value, quality) = extract(&v);
        assert_eq!(value, serde_json::json!(42));
        assert_eq!(quality, Quality::GOOD);
    }
}
