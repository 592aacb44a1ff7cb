//! Byte-budgeted cache of long-string property values.
//!
//! Persistent resources do not keep long-string values in their property
//! maps; they record only that the property is present and fetch the value
//! through this cache, reloading from storage after eviction.

use std::sync::Arc;

use lru::LruCache;

use crate::model::{PropId, ResourceId};

pub(crate) struct LongStringCache {
    entries: LruCache<(ResourceId, PropId), Arc<str>>,
    bytes: usize,
    budget: usize,
}

impl LongStringCache {
    pub(crate) fn new(budget: usize) -> Self {
        Self { entries: LruCache::unbounded(), bytes: 0, budget }
    }

    pub(crate) fn get(&mut self, id: ResourceId, prop: PropId) -> Option<Arc<str>> {
        self.entries.get(&(id, prop)).cloned()
    }

    /// Insert a value, evicting least recently used entries until the cache
    /// fits its budget again. Values larger than the whole budget are not cached.
    pub(crate) fn insert(&mut self, id: ResourceId, prop: PropId, value: Arc<str>) {
        self.invalidate(id, prop);
        if value.len() > self.budget {
            return;
        }
        self.bytes += value.len();
        self.entries.put((id, prop), value);
        while self.bytes > self.budget {
            match self.entries.pop_lru() {
                Some((_, evicted)) => self.bytes -= evicted.len(),
                None => break,
            }
        }
    }

    pub(crate) fn invalidate(&mut self, id: ResourceId, prop: PropId) {
        if let Some(old) = self.entries.pop(&(id, prop)) {
            self.bytes -= old.len();
        }
    }

    pub(crate) fn invalidate_resource(&mut self, id: ResourceId) {
        let keys: Vec<_> = self
            .entries
            .iter()
            .filter(|((rid, _), _)| *rid == id)
            .map(|(k, _)| *k)
            .collect();
        for (rid, prop) in keys {
            self.invalidate(rid, prop);
        }
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: i32) -> (ResourceId, PropId) {
        (ResourceId(i), PropId(1))
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LongStringCache::new(10);
        cache.insert(key(1).0, key(1).1, Arc::from("aaaa"));
        cache.insert(key(2).0, key(2).1, Arc::from("bbbb"));
        assert!(cache.get(key(1).0, key(1).1).is_some());

        cache.insert(key(3).0, key(3).1, Arc::from("cccc"));
        assert!(cache.get(key(2).0, key(2).1).is_none());
        assert!(cache.get(key(1).0, key(1).1).is_some());
        assert_eq!(cache.bytes(), 8);
    }

    #[test]
    fn test_oversized_value_not_cached() {
        let mut cache = LongStringCache::new(3);
        cache.insert(ResourceId(1), PropId(1), Arc::from("too long"));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.bytes(), 0);
    }

    #[test]
    fn test_replace_and_invalidate_resource() {
        let mut cache = LongStringCache::new(100);
        cache.insert(ResourceId(1), PropId(1), Arc::from("one"));
        cache.insert(ResourceId(1), PropId(1), Arc::from("uno!"));
        cache.insert(ResourceId(1), PropId(2), Arc::from("two"));
        cache.insert(ResourceId(2), PropId(1), Arc::from("x"));
        assert_eq!(cache.bytes(), 8);

        cache.invalidate_resource(ResourceId(1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.bytes(), 1);
    }
}
