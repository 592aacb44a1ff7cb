//! In-memory storage backend.
//!
//! This is the reference implementation of `StorageBackend`.
//! It keeps every table in a `BTreeMap`/`BTreeSet` protected by its own
//! `RwLock`, so scans come out in id order.
//!
//! ## Limitations
//!
//! - **No durability**: everything is lost when the backend is dropped.
//! - **Per-table locks**: a multi-table write (e.g. deleting a resource and
//!   its records) is not atomic with respect to concurrent scans. The engine
//!   tolerates this; other callers should not rely on it.
//! - **Snapshot cursors**: scans copy matching entries before returning, so
//!   abandoning a cursor is always safe but large scans allocate.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::RwLock;

use crate::model::*;
use crate::{Error, Result};
use super::{BackendCapabilities, ScanCursor, ScanRange, StorageBackend};

const MIN_PROP: PropId = PropId(i32::MIN);
const MAX_PROP: PropId = PropId(i32::MAX);
const MIN_RES: ResourceId = ResourceId(i32::MIN);
const MAX_RES: ResourceId = ResourceId(i32::MAX);

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory record tables.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    resources: RwLock<BTreeMap<ResourceId, ResourceTypeId>>,
    /// type → resource ids (type table equality index)
    type_index: RwLock<HashMap<ResourceTypeId, BTreeSet<ResourceId>>>,
    /// (resource, property) → value
    properties: RwLock<BTreeMap<(ResourceId, PropId), PropValue>>,
    /// property → resources carrying it
    prop_index: RwLock<HashMap<PropId, BTreeSet<ResourceId>>>,
    /// ordered by (source, prop, target)
    links: RwLock<BTreeSet<LinkRecord>>,
    /// (target, prop, source)
    links_by_target: RwLock<BTreeSet<(ResourceId, PropId, ResourceId)>>,
    next_id: AtomicI32,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                resources: RwLock::new(BTreeMap::new()),
                type_index: RwLock::new(HashMap::new()),
                properties: RwLock::new(BTreeMap::new()),
                prop_index: RwLock::new(HashMap::new()),
                links: RwLock::new(BTreeSet::new()),
                links_by_target: RwLock::new(BTreeSet::new()),
                next_id: AtomicI32::new(1),
            }),
        }
    }

    /// Number of stored link records.
    pub fn link_count(&self) -> usize {
        self.inner.links.read().len()
    }

    fn require_resource(&self, id: ResourceId) -> Result<()> {
        if self.inner.resources.read().contains_key(&id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("Resource record {id}")))
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// StorageBackend impl
// ============================================================================

impl StorageBackend for MemoryBackend {
    // ========================================================================
    // Resource records
    // ========================================================================

    fn allocate_id(&self) -> Result<ResourceId> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if id < 0 {
            return Err(Error::StorageError("resource id space exhausted".into()));
        }
        Ok(ResourceId(id))
    }

    fn create_resource(&self, id: ResourceId, type_id: ResourceTypeId) -> Result<()> {
        let previous = self.inner.resources.write().insert(id, type_id);
        let mut idx = self.inner.type_index.write();
        if let Some(old) = previous {
            if let Some(ids) = idx.get_mut(&old) {
                ids.remove(&id);
            }
        }
        idx.entry(type_id).or_default().insert(id);
        Ok(())
    }

    fn resource_type(&self, id: ResourceId) -> Result<Option<ResourceTypeId>> {
        Ok(self.inner.resources.read().get(&id).copied())
    }

    fn set_resource_type(&self, id: ResourceId, type_id: ResourceTypeId) -> Result<()> {
        self.require_resource(id)?;
        self.create_resource(id, type_id)
    }

    fn delete_resource(&self, id: ResourceId) -> Result<bool> {
        let Some(type_id) = self.inner.resources.write().remove(&id) else {
            return Ok(false);
        };
        if let Some(ids) = self.inner.type_index.write().get_mut(&type_id) {
            ids.remove(&id);
        }

        let dropped: Vec<PropId> = {
            let mut props = self.inner.properties.write();
            let keys: Vec<_> = props
                .range((id, MIN_PROP)..=(id, MAX_PROP))
                .map(|(k, _)| *k)
                .collect();
            for key in &keys {
                props.remove(key);
            }
            keys.into_iter().map(|(_, p)| p).collect()
        };
        {
            let mut idx = self.inner.prop_index.write();
            for prop in dropped {
                if let Some(ids) = idx.get_mut(&prop) {
                    ids.remove(&id);
                }
            }
        }

        let stale: Vec<LinkRecord> = self.load_links(id)?.collect();
        for link in stale {
            self.delete_link(link)?;
        }
        Ok(true)
    }

    fn resources_of_type(&self, type_id: ResourceTypeId) -> Result<ScanCursor<'_, ResourceId>> {
        let ids: Vec<ResourceId> = self
            .inner
            .type_index
            .read()
            .get(&type_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        Ok(Box::new(ids.into_iter()))
    }

    fn resource_count(&self) -> Result<u64> {
        Ok(self.inner.resources.read().len() as u64)
    }

    // ========================================================================
    // Property records
    // ========================================================================

    fn load_properties(
        &self,
        id: ResourceId,
        category: PropDataType,
    ) -> Result<Vec<(PropId, PropValue)>> {
        let props = self.inner.properties.read();
        Ok(props
            .range((id, MIN_PROP)..=(id, MAX_PROP))
            .filter(|(_, v)| v.data_type() == category)
            .map(|((_, p), v)| (*p, v.clone()))
            .collect())
    }

    fn read_property(&self, id: ResourceId, prop: PropId) -> Result<Option<PropValue>> {
        Ok(self.inner.properties.read().get(&(id, prop)).cloned())
    }

    fn write_property(&self, id: ResourceId, prop: PropId, value: &PropValue) -> Result<()> {
        self.require_resource(id)?;
        self.inner.properties.write().insert((id, prop), value.clone());
        self.inner.prop_index.write().entry(prop).or_default().insert(id);
        Ok(())
    }

    fn delete_property(&self, id: ResourceId, prop: PropId) -> Result<bool> {
        let removed = self.inner.properties.write().remove(&(id, prop)).is_some();
        if removed {
            if let Some(ids) = self.inner.prop_index.write().get_mut(&prop) {
                ids.remove(&id);
            }
        }
        Ok(removed)
    }

    fn scan_property(
        &self,
        prop: PropId,
        range: &ScanRange,
    ) -> Result<ScanCursor<'_, (ResourceId, PropValue)>> {
        let ids: Vec<ResourceId> = self
            .inner
            .prop_index
            .read()
            .get(&prop)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let props = self.inner.properties.read();
        let hits: Vec<(ResourceId, PropValue)> = ids
            .into_iter()
            .filter_map(|id| props.get(&(id, prop)).map(|v| (id, v)))
            .filter(|(_, v)| range.contains(v))
            .map(|(id, v)| (id, v.clone()))
            .collect();
        Ok(Box::new(hits.into_iter()))
    }

    // ========================================================================
    // Link records
    // ========================================================================

    fn load_links(&self, id: ResourceId) -> Result<ScanCursor<'_, LinkRecord>> {
        let mut records: Vec<LinkRecord> = self
            .inner
            .links
            .read()
            .range(LinkRecord { source: id, prop: MIN_PROP, target: MIN_RES }
                ..=LinkRecord { source: id, prop: MAX_PROP, target: MAX_RES })
            .copied()
            .collect();
        records.extend(
            self.inner
                .links_by_target
                .read()
                .range((id, MIN_PROP, MIN_RES)..=(id, MAX_PROP, MAX_RES))
                .map(|&(target, prop, source)| LinkRecord { source, prop, target }),
        );
        Ok(Box::new(records.into_iter()))
    }

    fn scan_links(&self, prop: PropId) -> Result<ScanCursor<'_, LinkRecord>> {
        let prop = prop.base();
        let records: Vec<LinkRecord> = self
            .inner
            .links
            .read()
            .iter()
            .filter(|l| l.prop == prop)
            .copied()
            .collect();
        Ok(Box::new(records.into_iter()))
    }

    fn add_link(&self, link: LinkRecord) -> Result<bool> {
        let added = self.inner.links.write().insert(link);
        if added {
            self.inner
                .links_by_target
                .write()
                .insert((link.target, link.prop, link.source));
        }
        Ok(added)
    }

    fn delete_link(&self, link: LinkRecord) -> Result<bool> {
        let removed = self.inner.links.write().remove(&link);
        if removed {
            self.inner
                .links_by_target
                .write()
                .remove(&(link.target, link.prop, link.source));
        }
        Ok(removed)
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            id_ordered_scans: true,
            cascading_delete: true,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
