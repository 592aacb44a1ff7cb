//! # Resources
//!
//! One node of the graph: a typed entity with typed properties and typed,
//! bidirectional links.
//!
//! Property values are loaded lazily, one storage category at a time, and
//! links are loaded as a whole on first touch. Every resource guards its
//! maps with its own mutex. The mutex is never held across backend I/O,
//! restriction checks or notification dispatch.
//!
//! ## Update scopes
//!
//! `begin_update`/`end_update` pairs nest. Changes made inside a scope are
//! merged into one [`ChangeSet`] and announced once, when the outermost
//! scope ends.

mod links;
mod props;

pub(crate) use links::LinkSlots;

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::change_set::ChangeSet;
use crate::model::*;
use crate::notify::{EventKind, ResourceEvent};
use crate::store::{ResourceStore, StoreInner};
use crate::{Error, Result};

const TRANSIENT: u8 = 0b001;
const DELETING: u8 = 0b010;
const DELETED: u8 = 0b100;

/// Loaded-categories mask with every category marked present.
const ALL_CATEGORIES: u16 = u16::MAX;

/// Cached property value.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Value(PropValue),
    /// A long string of a persistent resource; the value lives in the
    /// store's long-string cache.
    LongString,
}

#[derive(Debug)]
pub(crate) struct ResourceState {
    pub(crate) props: HashMap<PropId, Slot>,
    pub(crate) loaded: u16,
    pub(crate) links: LinkSlots,
    pub(crate) links_loaded: bool,
    display_name: Option<Arc<str>>,
    update_depth: u32,
    pending: Option<ChangeSet>,
}

impl ResourceState {
    fn new(loaded: bool) -> Self {
        Self {
            props: HashMap::new(),
            loaded: if loaded { ALL_CATEGORIES } else { 0 },
            links: LinkSlots::default(),
            links_loaded: loaded,
            display_name: None,
            update_depth: 0,
            pending: None,
        }
    }
}

/// A graph node.
///
/// Resources are handed out as `Arc<Resource>` by the
/// [`ResourceStore`]; at most one instance exists per id.
pub struct Resource {
    id: AtomicI32,
    original_id: ResourceId,
    type_id: AtomicI32,
    flags: AtomicU8,
    store: Weak<StoreInner>,
    me: Weak<Resource>,
    pub(crate) state: Mutex<ResourceState>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id())
            .field("original_id", &self.original_id)
            .field("type_id", &self.type_id())
            .field("transient", &self.is_transient())
            .field("deleting", &self.is_deleting())
            .finish()
    }
}

// ============================================================================
// Identity and lifecycle flags
// ============================================================================

impl Resource {
    /// `loaded` marks every category and the links as already present,
    /// which is the case for resources that were just created.
    pub(crate) fn new(
        store: &Arc<StoreInner>,
        id: ResourceId,
        type_id: ResourceTypeId,
        transient: bool,
        loaded: bool,
    ) -> Arc<Resource> {
        Arc::new_cyclic(|me| Resource {
            id: AtomicI32::new(id.0),
            original_id: id,
            type_id: AtomicI32::new(type_id.0),
            flags: AtomicU8::new(if transient { TRANSIENT } else { 0 }),
            store: Arc::downgrade(store),
            me: me.clone(),
            state: Mutex::new(ResourceState::new(loaded)),
        })
    }

    /// Current id; [`ResourceId::DELETED`] once the resource is gone.
    pub fn id(&self) -> ResourceId {
        ResourceId(self.id.load(Ordering::Acquire))
    }

    /// The id the resource was created with, retained after deletion.
    pub fn original_id(&self) -> ResourceId {
        self.original_id
    }

    pub fn type_id(&self) -> ResourceTypeId {
        ResourceTypeId(self.type_id.load(Ordering::Acquire))
    }

    pub fn is_transient(&self) -> bool {
        self.flags.load(Ordering::Acquire) & TRANSIENT != 0
    }

    /// True from the moment `delete` starts, including after it completes.
    pub fn is_deleting(&self) -> bool {
        self.flags.load(Ordering::Acquire) & (DELETING | DELETED) != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.load(Ordering::Acquire) & DELETED != 0
    }

    /// The store this resource belongs to.
    pub fn store(&self) -> Result<ResourceStore> {
        self.store_inner().map(ResourceStore::from_inner)
    }

    pub(crate) fn store_inner(&self) -> Result<Arc<StoreInner>> {
        let store = self.store.upgrade().ok_or(Error::StoreClosed)?;
        if store.is_closed() {
            return Err(Error::StoreClosed);
        }
        Ok(store)
    }

    pub(crate) fn handle(&self) -> Option<Arc<Resource>> {
        self.me.upgrade()
    }

    /// Key for ordered dual locking. Storage never hands out negative
    /// ids, so widening keeps id order.
    pub(crate) fn lock_key(&self) -> u64 {
        debug_assert!(self.original_id.0 >= 0, "negative resource id {}", self.original_id);
        self.original_id.0 as u64
    }

    fn check_alive(&self) -> Result<()> {
        if self.is_deleted() {
            return Err(Error::ResourceDeleted(self.original_id));
        }
        Ok(())
    }

    /// Change the resource type.
    pub fn set_type(&self, type_id: ResourceTypeId) -> Result<()> {
        self.check_alive()?;
        let store = self.store_inner()?;
        store.schema.require_resource_type(type_id)?;
        let old = self.type_id();
        if old == type_id {
            return Ok(());
        }
        if !self.is_transient() {
            store.backend.set_resource_type(self.original_id, type_id)?;
        }
        self.type_id.store(type_id.0, Ordering::Release);
        self.record(&store, ChangeSet::retyped(old));
        Ok(())
    }
}

// ============================================================================
// Update scopes and notification
// ============================================================================

impl Resource {
    /// Open an update scope. Notifications are held back until the
    /// matching outermost `end_update`.
    pub fn begin_update(&self) {
        self.state.lock().update_depth += 1;
    }

    /// Close an update scope, announcing the merged changes if this was
    /// the outermost one.
    pub fn end_update(&self) -> Result<()> {
        let pending = {
            let mut st = self.state.lock();
            if st.update_depth == 0 {
                return Err(Error::UnbalancedUpdate(self.original_id));
            }
            st.update_depth -= 1;
            if st.update_depth == 0 { st.pending.take() } else { None }
        };
        if let Some(changes) = pending {
            let store = self.store_inner()?;
            self.notify(&store, changes);
        }
        Ok(())
    }

    /// Run `f` inside an update scope. The scope is closed even if `f` fails.
    pub fn update<T>(&self, f: impl FnOnce(&Resource) -> Result<T>) -> Result<T> {
        self.begin_update();
        let result = f(self);
        let ended = self.end_update();
        let value = result?;
        ended?;
        Ok(value)
    }

    /// Drop every open scope and its pending changes without announcing them.
    pub(crate) fn discard_updates(&self) {
        let mut st = self.state.lock();
        st.update_depth = 0;
        st.pending = None;
    }

    /// Announce `changes` now, or fold them into the open update scope.
    pub(crate) fn record(&self, store: &StoreInner, changes: ChangeSet) {
        if changes.is_empty() {
            return;
        }
        let ready = {
            let mut st = self.state.lock();
            if changes.is_display_name_affected() {
                st.display_name = None;
            }
            if st.update_depth > 0 {
                match st.pending.as_mut() {
                    Some(pending) => pending.merge(changes),
                    None => st.pending = Some(changes),
                }
                None
            } else {
                Some(changes)
            }
        };
        if let Some(changes) = ready {
            self.notify(store, changes);
        }
    }

    fn notify(&self, store: &StoreInner, changes: ChangeSet) {
        if changes.is_empty() || self.is_transient() || self.is_deleted() {
            return;
        }
        let Some(resource) = self.handle() else { return };
        let kind = if changes.is_new_resource() { EventKind::Added } else { EventKind::Changed };
        store.hub.dispatch(&ResourceEvent { resource, kind, changes: Arc::new(changes) });
    }
}

// ============================================================================
// Persistence and deletion
// ============================================================================

impl Resource {
    /// Write a transient resource out to storage and announce it as new.
    /// Persistent resources are left untouched.
    pub fn persist(&self) -> Result<()> {
        self.check_alive()?;
        if !self.is_transient() {
            return Ok(());
        }
        let store = self.store_inner()?;
        store.backend.create_resource(self.original_id, self.type_id())?;

        let (props, links) = {
            let st = self.state.lock();
            let props: Vec<(PropId, PropValue)> = st
                .props
                .iter()
                .filter_map(|(p, slot)| match slot {
                    Slot::Value(v) => Some((*p, v.clone())),
                    Slot::LongString => None,
                })
                .collect();
            (props, st.links.entries())
        };
        for (prop, value) in &props {
            store.backend.write_property(self.original_id, *prop, value)?;
        }
        for (slot, other) in links {
            let Some(other) = store.resource(other)? else { continue };
            if other.is_transient() {
                continue;
            }
            let record = if slot.is_reverse() {
                LinkRecord::new(other.original_id, slot, self.original_id)
            } else {
                LinkRecord::new(self.original_id, slot, other.original_id)
            };
            store.backend.add_link(record)?;
        }

        {
            let mut st = self.state.lock();
            for (prop, value) in &props {
                if let PropValue::LongString(s) = value {
                    st.props.insert(*prop, Slot::LongString);
                    store.long_strings.lock().insert(self.original_id, *prop, s.clone());
                }
            }
        }
        self.flags.fetch_and(!TRANSIENT, Ordering::AcqRel);
        debug!(resource = self.original_id.0, "transient resource persisted");
        self.record(&store, ChangeSet::new_resource());
        Ok(())
    }

    /// Delete the resource.
    ///
    /// Deleting twice is a no-op. All links are detached first, then a
    /// `Deleting` notification is dispatched while the resource is still
    /// readable, then its records are removed.
    pub fn delete(&self) -> Result<()> {
        let previous = self.flags.fetch_or(DELETING, Ordering::AcqRel);
        if previous & (DELETING | DELETED) != 0 {
            return Ok(());
        }
        let result = self.delete_flagged();
        if result.is_err() {
            self.flags.fetch_and(!DELETING, Ordering::AcqRel);
        }
        result
    }

    fn delete_flagged(&self) -> Result<()> {
        let store = self.store_inner()?;
        store.restrictions().check_delete(self)?;

        self.ensure_links(&store)?;
        let attached = self.state.lock().links.entries();
        for (slot, other_id) in attached {
            let Some(def) = store.schema.prop_type(slot) else { continue };
            match store.resource(other_id)? {
                Some(other) => self.detach(&store, &def, slot, &other)?,
                None => {
                    self.state.lock().links.remove(slot, other_id);
                }
            }
        }

        if !self.is_transient() {
            if let Some(resource) = self.handle() {
                store.hub.dispatch(&ResourceEvent {
                    resource,
                    kind: EventKind::Deleting,
                    changes: Arc::new(ChangeSet::new()),
                });
            }
            if !store.capabilities.cascading_delete {
                let props: Vec<PropId> = self.state.lock().props.keys().copied().collect();
                for prop in props {
                    store.backend.delete_property(self.original_id, prop)?;
                }
            }
            store.backend.delete_resource(self.original_id)?;
        }

        store.long_strings.lock().invalidate_resource(self.original_id);
        store.evict(self.original_id);
        {
            let mut st = self.state.lock();
            st.props.clear();
            st.links = LinkSlots::default();
            st.loaded = ALL_CATEGORIES;
            st.links_loaded = true;
            st.display_name = None;
            st.pending = None;
        }
        self.flags.fetch_or(DELETED, Ordering::AcqRel);
        self.id.store(ResourceId::DELETED.0, Ordering::Release);
        debug!(resource = self.original_id.0, "resource deleted");
        Ok(())
    }
}
