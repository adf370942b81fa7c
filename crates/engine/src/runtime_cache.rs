//! The in-process runtime tag-value cache — a zero-latency in-memory cache
//! of recent tag values.
//!
//! Backed by [`dashmap::DashMap`] — the same sharded-concurrent-map crate
//! used for the scan engine's input-state manager, keyed by `(node_id,
//! port)` with per-key last-write-wins semantics; this cache is the
//! tag-keyed sibling of that structure. Reads and writes never block each
//! other across keys, which is what lets `ExecutionContext::runtime_state()`
//! be consulted from every concurrently-running flow invocation without a
//! single global lock.

use dashmap::DashMap;
use uuid::Uuid;

use nodes::context::RuntimeCache;
use nodes::tag::TagValue;

/// Process-wide tag-value cache, constructed once at startup and shared
/// (via `Arc`) into every [`nodes::context::ExecutionContext`].
#[derive(Default)]
pub struct InMemoryRuntimeCache {
    values: DashMap<Uuid, TagValue>,
}

impl InMemoryRuntimeCache {
    #[must_use]
    pub fn new() -> Self {
        Self { values: DashMap::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl RuntimeCache for InMemoryRuntimeCache {
    fn get_tag_value(&self, tag_id: Uuid) -> Option<TagValue> {
        self.values.get(&tag_id).map(|entry| entry.value().clone())
    }

    fn set_tag_value(&self, tag_id: Uuid, value: TagValue) {
        self.values.insert(tag_id, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodes::tag::TagData;

    #[test]
    fn round_trips_a_value() {
        let cache = InMemoryRuntimeCache::new();
        let tag_id = Uuid::new_v4();
        assert!(cache.get_tag_value(tag_id).is_none());

        cache.set_tag_value(tag_id, TagValue::good(TagData::Number(1.5)));
        let got = cache.get_tag_value(tag_id).unwrap();
        assert_eq!(got.value.as_f64(), Some(1.5));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn last_write_wins() {
        let cache = InMemoryRuntimeCache::new();
        let tag_id = Uuid::new_v4();
        cache.set_tag_value(tag_id, TagValue::good(TagData::Number(1.0)));
        cache.set_tag_value(tag_id, TagValue::good(TagData::Number(2.0)));
        assert_eq!(cache.get_tag_value(tag_id).unwrap().value.as_f64(), Some(2.0));
    }
}
