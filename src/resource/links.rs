//! Link slots and link mutation.
//!
//! A link from A to B of type T is held twice: in A's forward slot `T` and
//! in B's mirror slot (`-T` for directed types, `T` otherwise). Both sides
//! are updated under one dual lock, acquired in original-id order.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::change_set::{ChangeSet, LinkChangeKind};
use crate::model::*;
use crate::store::{CorruptionKind, CorruptionReport, StoreInner};
use crate::sync::lock_pair;
use crate::{Error, Result};

use super::Resource;

/// Link targets per slot, each list ascending and duplicate-free.
#[derive(Debug, Default, Clone)]
pub(crate) struct LinkSlots {
    slots: HashMap<PropId, SmallVec<[ResourceId; 4]>>,
}

impl LinkSlots {
    pub(crate) fn get(&self, slot: PropId) -> &[ResourceId] {
        self.slots.get(&slot).map_or(&[], |targets| targets.as_slice())
    }

    pub(crate) fn contains(&self, slot: PropId, target: ResourceId) -> bool {
        self.get(slot).binary_search(&target).is_ok()
    }

    /// Returns false if the link was already present.
    pub(crate) fn insert(&mut self, slot: PropId, target: ResourceId) -> bool {
        let targets = self.slots.entry(slot).or_default();
        match targets.binary_search(&target) {
            Ok(_) => false,
            Err(pos) => {
                targets.insert(pos, target);
                true
            }
        }
    }

    /// Returns false if the link was not present.
    pub(crate) fn remove(&mut self, slot: PropId, target: ResourceId) -> bool {
        let Some(targets) = self.slots.get_mut(&slot) else { return false };
        let Ok(pos) = targets.binary_search(&target) else { return false };
        targets.remove(pos);
        if targets.is_empty() {
            self.slots.remove(&slot);
        }
        true
    }

    /// Every (slot, target) pair.
    pub(crate) fn entries(&self) -> Vec<(PropId, ResourceId)> {
        let mut out: Vec<_> = self
            .slots
            .iter()
            .flat_map(|(slot, targets)| targets.iter().map(move |t| (*slot, *t)))
            .collect();
        out.sort_unstable();
        out
    }

    /// Non-empty slots.
    pub(crate) fn slot_ids(&self) -> Vec<PropId> {
        let mut ids: Vec<PropId> = self.slots.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

// ============================================================================
// Link loading and queries
// ============================================================================

impl Resource {
    /// Load link records on first touch. Records of unknown or non-link
    /// types, and records pointing at missing resources, are reported and
    /// skipped.
    pub(crate) fn ensure_links(&self, store: &StoreInner) -> Result<()> {
        if self.state.lock().links_loaded {
            return Ok(());
        }
        let records: Vec<LinkRecord> = store.backend.load_links(self.original_id)?.collect();

        let mut loaded = LinkSlots::default();
        for record in records {
            let report = |kind| CorruptionReport {
                resource: self.original_id,
                prop: Some(record.prop),
                kind,
            };
            let Some(def) = store.schema.prop_type(record.prop) else {
                store.report_corruption(report(CorruptionKind::UnknownPropType));
                continue;
            };
            if !def.is_link() {
                store.report_corruption(report(CorruptionKind::TypeMismatch));
                continue;
            }
            let Some(other) = record.other(self.original_id) else { continue };
            if store.backend.resource_type(other)?.is_none() {
                store.report_corruption(report(CorruptionKind::MissingRecord));
                continue;
            }
            if record.source == self.original_id {
                loaded.insert(def.id, record.target);
            }
            if record.target == self.original_id {
                loaded.insert(def.mirror_slot(def.id), record.source);
            }
        }

        let mut st = self.state.lock();
        if !st.links_loaded {
            st.links = loaded;
            st.links_loaded = true;
        }
        Ok(())
    }

    /// Targets of the slot, ascending. `slot` may be a reverse slot.
    pub(crate) fn slot_targets(&self, store: &StoreInner, slot: PropId) -> Result<Vec<ResourceId>> {
        self.ensure_links(store)?;
        Ok(self.state.lock().links.get(slot).to_vec())
    }

    /// Resources linked to this one through `prop` in the given direction,
    /// ascending by id. A reverse `prop` flips the direction.
    pub fn links(&self, prop: PropId, direction: LinkDirection) -> Result<Vec<ResourceId>> {
        let store = self.store_inner()?;
        let (prop, direction) = direction.normalize(prop);
        let def = store.schema.require_link_type(prop)?;
        self.ensure_links(&store)?;

        let st = self.state.lock();
        let mut slots = direction.slots(def.id, def.directed);
        let mut out = match slots.next() {
            Some(slot) => st.links.get(slot).to_vec(),
            None => Vec::new(),
        };
        let mut merged = false;
        for slot in slots {
            out.extend_from_slice(st.links.get(slot));
            merged = true;
        }
        if merged {
            out.sort_unstable();
            out.dedup();
        }
        Ok(out)
    }

    pub fn link_count(&self, prop: PropId, direction: LinkDirection) -> Result<usize> {
        Ok(self.links(prop, direction)?.len())
    }

    /// Whether `target` sits in the slot addressed by `prop` (negative for
    /// the reverse slot of a directed type).
    pub fn has_link(&self, prop: PropId, target: ResourceId) -> Result<bool> {
        let store = self.store_inner()?;
        let def = store.schema.require_link_type(prop)?;
        self.ensure_links(&store)?;
        let slot = if def.directed { prop } else { def.id };
        Ok(self.state.lock().links.contains(slot, target))
    }

    /// Link slots currently holding at least one target.
    pub fn link_types(&self) -> Result<Vec<PropId>> {
        let store = self.store_inner()?;
        self.ensure_links(&store)?;
        Ok(self.state.lock().links.slot_ids())
    }
}

// ============================================================================
// Link mutation
// ============================================================================

impl Resource {
    /// Link this resource to `target`.
    ///
    /// Adding a link that already exists does nothing. A reverse `prop`
    /// adds the forward link from `target` to this resource instead.
    pub fn add_link(&self, prop: PropId, target: &Resource) -> Result<()> {
        if prop.is_reverse() {
            return target.add_link(prop.base(), self);
        }
        let store = self.store_inner()?;
        let def = store.schema.require_link_type(prop)?;
        self.check_linkable(target)?;
        self.ensure_links(&store)?;
        target.ensure_links(&store)?;
        if self.state.lock().links.contains(def.id, target.original_id) {
            return Ok(());
        }
        store.restrictions().check_link(self, def.id, target)?;
        self.attach(&store, &def, target)
    }

    /// Remove the link to `target`. Removing the forward side always
    /// removes the mirror on `target`.
    pub fn delete_link(&self, prop: PropId, target: &Resource) -> Result<()> {
        if prop.is_reverse() {
            return target.delete_link(prop.base(), self);
        }
        let store = self.store_inner()?;
        let def = store.schema.require_link_type(prop)?;
        self.check_alive()?;
        self.ensure_links(&store)?;
        if !self.state.lock().links.contains(def.id, target.original_id) {
            return Ok(());
        }
        store.restrictions().check_unlink(self, def.id, target)?;
        self.detach(&store, &def, def.id, target)
    }

    /// Make `target` the only outgoing link of type `prop`.
    ///
    /// If `target` is already linked it stays, and only the other links
    /// are removed. Everything is announced as one change.
    pub fn set_link(&self, prop: PropId, target: &Resource) -> Result<()> {
        let store = self.store_inner()?;
        self.update(|r| {
            for other in r.links(prop, LinkDirection::Outgoing)? {
                if other == target.original_id {
                    continue;
                }
                if let Some(other) = store.resource(other)? {
                    r.delete_link(prop, &other)?;
                }
            }
            r.add_link(prop, target)
        })
    }

    /// Remove every link of type `prop`, in both directions.
    pub fn delete_links(&self, prop: PropId) -> Result<()> {
        let store = self.store_inner()?;
        let def = store.schema.require_link_type(prop)?;
        self.update(|r| {
            for slot in LinkDirection::Both.slots(def.id, def.directed) {
                for other in r.slot_targets(&store, slot)? {
                    let Some(other) = store.resource(other)? else { continue };
                    if slot.is_reverse() {
                        other.delete_link(def.id, r)?;
                    } else {
                        r.delete_link(def.id, &other)?;
                    }
                }
            }
            Ok(())
        })
    }

    fn check_linkable(&self, target: &Resource) -> Result<()> {
        if self.original_id == target.original_id {
            return Err(Error::SelfLink(self.original_id));
        }
        self.check_alive()?;
        if self.is_deleting() {
            return Err(Error::ResourceDeleting(self.original_id));
        }
        if target.is_deleted() {
            return Err(Error::LinkToDeleted { from: self.original_id, to: target.original_id });
        }
        if target.is_deleting() {
            return Err(Error::ResourceDeleting(target.original_id));
        }
        Ok(())
    }

    /// Insert the forward link and its mirror, persist, then announce both sides.
    fn attach(&self, store: &StoreInner, def: &PropType, target: &Resource) -> Result<()> {
        let slot = def.id;
        let mirror = def.mirror_slot(slot);
        let added = {
            let mut pair = lock_pair(&self.state, self.lock_key(), &target.state, target.lock_key());
            let (mine, theirs) = pair.both_mut().ok_or(Error::SelfLink(self.original_id))?;
            let added = mine.links.insert(slot, target.original_id);
            if added {
                theirs.links.insert(mirror, self.original_id);
            }
            added
        };
        if !added {
            return Ok(());
        }
        if !self.is_transient() && !target.is_transient() {
            store.backend.add_link(LinkRecord::new(self.original_id, slot, target.original_id))?;
        }
        self.record(store, ChangeSet::link(slot, target.original_id, LinkChangeKind::Added));
        target.record(store, ChangeSet::link(mirror, self.original_id, LinkChangeKind::Added));
        Ok(())
    }

    /// Remove the link held in this resource's `slot` towards `other`,
    /// together with its mirror. No restriction check.
    pub(crate) fn detach(
        &self,
        store: &StoreInner,
        def: &PropType,
        slot: PropId,
        other: &Resource,
    ) -> Result<()> {
        let mirror = def.mirror_slot(slot);
        let removed = {
            let mut pair = lock_pair(&self.state, self.lock_key(), &other.state, other.lock_key());
            let (mine, theirs) = pair.both_mut().ok_or(Error::SelfLink(self.original_id))?;
            let removed = mine.links.remove(slot, other.original_id);
            if removed {
                theirs.links.remove(mirror, self.original_id);
            }
            removed
        };
        if !removed {
            return Ok(());
        }
        if !self.is_transient() && !other.is_transient() {
            let forward = if slot.is_reverse() {
                LinkRecord::new(other.original_id, slot, self.original_id)
            } else {
                LinkRecord::new(self.original_id, slot, other.original_id)
            };
            store.backend.delete_link(forward)?;
            if !def.directed {
                // undirected records may have been written from either end
                store.backend.delete_link(LinkRecord::new(forward.target, slot, forward.source))?;
            }
        }
        self.record(store, ChangeSet::link(slot, other.original_id, LinkChangeKind::Deleted));
        other.record(store, ChangeSet::link(mirror, self.original_id, LinkChangeKind::Deleted));
        Ok(())
    }
}
