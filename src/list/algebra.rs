//! Set algebra over lists.
//!
//! A live operand contributes its predicate; a non-live one contributes its
//! frozen ids as a cached-list predicate. The result is live when either
//! operand is, watches the union of both watch filters (no filter wins)
//! and keeps the more specific sort order.

use std::sync::atomic::Ordering;

use hashbrown::HashSet;
use tracing::debug;

use crate::model::{PropId, ResourceId};
use crate::predicate::Predicate;
use crate::Result;

use super::{ResourceList, SortOrder, INSTANTIATED};

impl ResourceList {
    fn operand(&self) -> Result<Predicate> {
        if self.is_live() {
            return Ok(self.predicate());
        }
        self.instantiate()?;
        Ok(Predicate::cached_list(self.inner.data.clone()))
    }

    fn merged_watch(&self, other: &ResourceList) -> Option<Vec<PropId>> {
        let mine = self.watched_properties()?;
        let theirs = other.watched_properties()?;
        let mut all = mine;
        all.extend(theirs);
        all.sort_unstable();
        all.dedup();
        Some(all)
    }

    fn merged_sort(&self, other: &ResourceList) -> SortOrder {
        let mine = self.sort_order();
        let theirs = other.sort_order();
        if theirs.specificity() > mine.specificity() { theirs } else { mine }
    }

    fn combine(&self, other: &ResourceList, predicate: Predicate) -> Result<ResourceList> {
        let list = self.store().list(predicate, self.is_live() || other.is_live());
        if let Some(watch) = self.merged_watch(other) {
            list.watch_properties(watch);
        }
        list.sort(self.merged_sort(other))?;
        Ok(list)
    }

    /// Members of either list, in a fresh list.
    pub fn union(&self, other: &ResourceList) -> Result<ResourceList> {
        let predicate = self.operand()?.or(&other.operand()?);
        self.combine(other, predicate)
    }

    /// Members of this list that are not in `other`, in a fresh list.
    pub fn minus(&self, other: &ResourceList) -> Result<ResourceList> {
        let predicate = self.operand()?.except(&other.operand()?);
        self.combine(other, predicate)
    }

    /// Members of both lists.
    ///
    /// With `allow_merge`, an instantiated intersection list absorbs
    /// `other` in place: its predicate is replaced by an extended copy and
    /// its ids are filtered instead of selected again. The receiver is
    /// returned. Otherwise, or when merging would turn a non-live list
    /// live, a fresh list is built.
    pub fn intersect(&self, other: &ResourceList, allow_merge: bool) -> Result<ResourceList> {
        let operand = other.operand()?;
        let mergeable = allow_merge
            && self.is_instantiated()
            && self.predicate().is_intersection()
            && (self.is_live() || !other.is_live());
        if !mergeable {
            let predicate = self.operand()?.and(&operand);
            return self.combine(other, predicate);
        }

        let inner = &self.inner;
        let merged = {
            let _guard = inner.instantiate_lock.lock();
            let mut predicate = inner.predicate.write();
            match predicate.extended(operand.clone()) {
                Some(extended) if inner.phase.load(Ordering::Acquire) == INSTANTIATED => {
                    *predicate = extended;
                    true
                }
                _ => false,
            }
        };
        if !merged {
            let predicate = self.operand()?.and(&operand);
            return self.combine(other, predicate);
        }

        let snapshot = inner.data.state.lock().ids.clone();
        let store = self.store();
        let mut dropped: HashSet<ResourceId> = HashSet::new();
        for &id in &snapshot {
            let keep = match inner.store.inner.resource(id)? {
                Some(resource) if !resource.is_deleted() => operand.test(store, &resource)?,
                _ => false,
            };
            if !keep {
                dropped.insert(id);
            }
        }
        inner.data.state.lock().ids.retain(|id| !dropped.contains(id));
        debug!(kept = snapshot.len() - dropped.len(), dropped = dropped.len(), "intersection merged in place");

        match self.merged_watch(other) {
            Some(watch) => self.watch_properties(watch),
            None => *inner.watch.write() = None,
        }
        let order = self.merged_sort(other);
        if order.specificity() > self.sort_order().specificity() {
            self.sort(order)?;
        }
        Ok(self.clone())
    }
}
