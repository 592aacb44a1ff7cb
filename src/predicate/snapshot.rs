//! Snapshot wrapper used to instantiate non-live lists.
//!
//! While the wrapped predicate is being selected, the wrapper listens to
//! the store's notifications and remembers every resource that stops
//! matching. Those ids are added back to the result and keep counting as
//! matches, so a selection racing with concurrent mutation never silently
//! drops a resource that matched when it started.
//!
//! The remembered set is never pruned.

use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::Mutex;

use crate::change_set::ChangeSet;
use crate::model::ResourceId;
use crate::notify::{EventKind, ResourceEvent};
use crate::resource::Resource;
use crate::store::ResourceStore;
use crate::Result;

use super::{sorted, Predicate, PredicateMatch};

#[derive(Debug)]
pub(crate) struct Snapshot {
    inner: Predicate,
    removed: Arc<Mutex<HashSet<ResourceId>>>,
}

impl Snapshot {
    pub(crate) fn new(inner: Predicate) -> Self {
        Self { inner, removed: Arc::new(Mutex::new(HashSet::new())) }
    }

    pub(crate) fn inner(&self) -> &Predicate {
        &self.inner
    }

    pub(crate) fn same_as(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.removed, &other.removed)
    }

    pub(crate) fn removed(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.removed.lock().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn select(&self, store: &ResourceStore) -> Result<Vec<ResourceId>> {
        let inner = self.inner.clone();
        let removed = self.removed.clone();
        let watched = store.clone();
        let subscription = store.subscribe(move |event: &ResourceEvent| {
            let left = match event.kind {
                EventKind::Deleting => inner.test(&watched, &event.resource),
                _ => inner
                    .match_resource(&watched, &event.resource, &event.changes)
                    .map(|m| m == PredicateMatch::Del),
            };
            if matches!(left, Ok(true)) {
                removed.lock().insert(event.resource.original_id());
            }
        });

        let selected = self.inner.select(store);
        store.unsubscribe(subscription);
        let mut ids = selected?;

        let removed = self.removed();
        if !removed.is_empty() {
            ids = sorted::union(&ids, &removed);
        }
        Ok(ids)
    }

    pub(crate) fn test(&self, store: &ResourceStore, resource: &Resource) -> Result<bool> {
        if self.removed.lock().contains(&resource.original_id()) {
            return Ok(true);
        }
        self.inner.test(store, resource)
    }

    pub(crate) fn transition(
        &self,
        store: &ResourceStore,
        resource: &Resource,
        changes: &ChangeSet,
    ) -> Result<(bool, bool)> {
        if self.removed.lock().contains(&resource.original_id()) {
            return Ok((true, true));
        }
        self.inner.transition(store, resource, changes)
    }
}
