//! # Resource Lists
//!
//! A list wraps a predicate and materializes its match set on first access.
//! A live list then subscribes to the store's notifications and keeps its
//! ids current by classifying every change set against the predicate; it
//! never re-runs the query. A non-live list is a frozen result.
//!
//! ## Lifecycle
//!
//! ```text
//! uninstantiated ──(first access)──► instantiated ──(deinstantiate)──► deinstantiated
//!                                          ▲                                │
//!                                          └────────(next access)───────────┘
//! ```
//!
//! A live list subscribes *before* it selects. Events arriving while the
//! selection runs are queued and replayed against the fresh result, so a
//! mutation racing the instantiation is never lost.
//!
//! ## Events
//!
//! Listeners added with [`ResourceList::add_listener`] see [`ListEvent`]s.
//! `Removing` fires before the id leaves the list so the listener can still
//! read the resource and its index. Listeners run on the mutating thread
//! without any list lock held.

mod algebra;
mod sort;

pub use sort::{ResourceComparer, SortField, SortKey, SortOrder};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use hashbrown::HashSet;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::change_set::ChangeSet;
use crate::model::*;
use crate::notify::{panic_message, ChangeListener, EventKind, ResourceEvent, SubscriptionId};
use crate::predicate::{IdArray, Predicate};
use crate::resource::Resource;
use crate::store::ResourceStore;
use crate::Result;

const UNINSTANTIATED: u8 = 0;
const INSTANTIATING: u8 = 1;
const INSTANTIATED: u8 = 2;
const DEINSTANTIATED: u8 = 3;

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListEventKind {
    /// The resource entered the list, or moved within it when
    /// `reposition` is set.
    Added { reposition: bool },
    /// The resource is about to leave the list.
    Removing,
    /// A watched property of a member changed.
    Changed,
}

#[derive(Debug, Clone)]
pub struct ListEvent {
    pub kind: ListEventKind,
    pub resource: Arc<Resource>,
    /// Position in the list when the event fired.
    pub index: usize,
    pub changes: Arc<ChangeSet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

type ListListener = Arc<dyn Fn(&ListEvent) + Send + Sync>;

// ============================================================================
// Shared state
// ============================================================================

pub(crate) struct ListInner {
    store: ResourceStore,
    predicate: RwLock<Predicate>,
    live: bool,
    phase: AtomicU8,
    optimized: AtomicBool,
    instantiate_lock: Mutex<()>,
    /// Some while a live list is between subscribing and finishing its
    /// first selection.
    backlog: Mutex<Option<Vec<ResourceEvent>>>,
    pub(crate) data: Arc<IdArray>,
    sort: RwLock<SortOrder>,
    externally_sorted: AtomicBool,
    watch: RwLock<Option<HashSet<PropId>>>,
    listeners: RwLock<Vec<(ListenerId, ListListener)>>,
    next_listener: AtomicU64,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl Drop for ListInner {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.get_mut().take() {
            self.store.unsubscribe(id);
        }
    }
}

impl ChangeListener for ListInner {
    fn on_event(&self, event: &ResourceEvent) {
        {
            let mut backlog = self.backlog.lock();
            if let Some(pending) = backlog.as_mut() {
                pending.push(event.clone());
                return;
            }
        }
        if self.phase.load(Ordering::Acquire) == INSTANTIATED {
            self.apply(event);
        }
    }
}

/// A possibly live, possibly sorted result of a predicate. Cheap to clone;
/// clones share the same state.
#[derive(Clone)]
pub struct ResourceList {
    pub(crate) inner: Arc<ListInner>,
}

impl std::fmt::Debug for ResourceList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceList")
            .field("predicate", &*self.inner.predicate.read())
            .field("live", &self.inner.live)
            .field("phase", &self.inner.phase.load(Ordering::Relaxed))
            .field("sort", &*self.inner.sort.read())
            .finish()
    }
}

// ============================================================================
// Construction and instantiation
// ============================================================================

impl ResourceList {
    pub(crate) fn new(store: ResourceStore, predicate: Predicate, live: bool) -> Self {
        Self {
            inner: Arc::new(ListInner {
                store,
                predicate: RwLock::new(predicate),
                live,
                phase: AtomicU8::new(UNINSTANTIATED),
                optimized: AtomicBool::new(false),
                instantiate_lock: Mutex::new(()),
                backlog: Mutex::new(None),
                data: IdArray::new(),
                sort: RwLock::new(SortOrder::Id),
                externally_sorted: AtomicBool::new(false),
                watch: RwLock::new(None),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                subscription: Mutex::new(None),
            }),
        }
    }

    pub fn predicate(&self) -> Predicate {
        self.inner.predicate.read().clone()
    }

    pub fn is_live(&self) -> bool {
        self.inner.live
    }

    pub fn is_instantiated(&self) -> bool {
        self.inner.phase.load(Ordering::Acquire) == INSTANTIATED
    }

    pub fn store(&self) -> &ResourceStore {
        &self.inner.store
    }

    /// Materialize the list now. Later calls are no-ops until the list is
    /// deinstantiated.
    pub fn instantiate(&self) -> Result<()> {
        self.inner.instantiate()
    }

    /// Drop the ids and stop listening. The next access instantiates again.
    /// Calling this on a list that is not instantiated does nothing.
    pub fn deinstantiate(&self) {
        let inner = &self.inner;
        let _guard = inner.instantiate_lock.lock();
        if inner.phase.load(Ordering::Acquire) != INSTANTIATED {
            return;
        }
        if let Some(id) = inner.subscription.lock().take() {
            inner.store.unsubscribe(id);
        }
        *inner.backlog.lock() = None;
        inner.phase.store(DEINSTANTIATED, Ordering::Release);
        inner.data.state.lock().ids.clear();
        debug!(live = inner.live, "list deinstantiated");
    }
}

impl ListInner {
    fn instantiate(self: &Arc<Self>) -> Result<()> {
        if self.phase.load(Ordering::Acquire) == INSTANTIATED {
            return Ok(());
        }
        {
            let _guard = self.instantiate_lock.lock();
            if self.phase.load(Ordering::Acquire) == INSTANTIATED {
                return Ok(());
            }
            self.phase.store(INSTANTIATING, Ordering::Release);
            if let Err(err) = self.select_and_sort() {
                if let Some(id) = self.subscription.lock().take() {
                    self.store.unsubscribe(id);
                }
                *self.backlog.lock() = None;
                self.phase.store(UNINSTANTIATED, Ordering::Release);
                return Err(err);
            }
            self.phase.store(INSTANTIATED, Ordering::Release);
        }
        self.drain_backlog();
        Ok(())
    }

    fn select_and_sort(self: &Arc<Self>) -> Result<()> {
        let predicate = self.optimized_predicate();
        let evaluated = if !self.live && self.store.config().snapshot_non_live {
            Predicate::snapshot(predicate)
        } else {
            predicate
        };

        if self.live {
            *self.backlog.lock() = Some(Vec::new());
            let weak: Weak<ListInner> = Arc::downgrade(self);
            let weak: Weak<dyn ChangeListener> = weak;
            let id = self.store.inner.hub.subscribe_weak(weak);
            *self.subscription.lock() = Some(id);
        }

        let mut selected = evaluated.select(&self.store)?;
        if self.live {
            // A deletion announced before the subscription existed can
            // still be visible in storage.
            selected.retain(|&id| !self.store.inner.is_deleting(id));
        }
        let order = self.sort.read().clone();
        let sorted_by_id = order.is_id();
        let ids = if sorted_by_id {
            selected
        } else {
            let mut resolved = self.resolve_all(&selected);
            resolved.sort_unstable_by(|a, b| order.compare(a, b));
            resolved.iter().map(|r| r.original_id()).collect()
        };

        debug!(live = self.live, count = ids.len(), sorted_by_id, "list instantiated");
        let mut state = self.data.state.lock();
        state.ids = ids;
        state.sorted_by_id = sorted_by_id;
        Ok(())
    }

    /// The list's predicate, optimized the first time it is needed.
    fn optimized_predicate(&self) -> Predicate {
        if self.optimized.swap(true, Ordering::AcqRel) {
            return self.predicate.read().clone();
        }
        let mut predicate = self.predicate.write();
        let optimized = predicate.optimize();
        if !optimized.is_same(&predicate) {
            debug!(before = ?*predicate, after = ?optimized, "predicate optimized");
            *predicate = optimized.clone();
        }
        optimized
    }

    /// Replay queued events until the queue is found empty, then let
    /// events through directly.
    fn drain_backlog(&self) {
        loop {
            let pending = {
                let mut backlog = self.backlog.lock();
                match backlog.as_mut() {
                    Some(pending) if !pending.is_empty() => std::mem::take(pending),
                    _ => {
                        *backlog = None;
                        return;
                    }
                }
            };
            for event in &pending {
                self.apply(event);
            }
        }
    }

    fn resolve(&self, id: ResourceId) -> Option<Arc<Resource>> {
        match self.store.inner.resource(id) {
            Ok(Some(r)) if !r.is_deleted() => Some(r),
            _ => None,
        }
    }

    /// Resolve ids, dropping the ones whose resource vanished.
    fn resolve_all(&self, ids: &[ResourceId]) -> Vec<Arc<Resource>> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.resolve(id) {
                Some(r) => out.push(r),
                None => debug!(resource = id.0, "resource vanished before sorting; dropped"),
            }
        }
        out
    }
}

// ============================================================================
// Incremental maintenance
// ============================================================================

impl ListInner {
    fn apply(&self, event: &ResourceEvent) {
        let resource = &event.resource;
        let id = resource.original_id();
        // A replayed event may describe a resource deleted since.
        if event.kind == EventKind::Deleting || resource.is_deleted() {
            self.remove(resource, &event.changes);
            return;
        }

        let predicate = self.predicate.read().clone();
        let (was, is) = match predicate.transition(&self.store, resource, &event.changes) {
            Ok(t) => t,
            Err(err) => {
                warn!(resource = id.0, %err, "could not classify change; list left as is");
                return;
            }
        };
        let present = self.data.contains(id);
        match (is, present) {
            (true, false) => self.insert(resource, &event.changes, false),
            (false, true) => self.remove(resource, &event.changes),
            (true, true) if was => self.changed(resource, &event.changes),
            _ => {}
        }
    }

    fn fire(&self, kind: ListEventKind, resource: &Arc<Resource>, index: usize, changes: &Arc<ChangeSet>) {
        let listeners: Vec<ListListener> = self.listeners.read().iter().map(|(_, l)| l.clone()).collect();
        if listeners.is_empty() {
            return;
        }
        let event = ListEvent { kind, resource: resource.clone(), index, changes: changes.clone() };
        for listener in listeners {
            listener(&event);
        }
    }

    fn insert(&self, resource: &Arc<Resource>, changes: &Arc<ChangeSet>, reposition: bool) {
        let index = {
            let mut state = self.data.state.lock();
            let id = resource.original_id();
            if state.position(id).is_some() {
                return;
            }
            // Read under the state lock so a concurrent re-sort is either
            // fully before or fully after this insert.
            let order = self.sort.read().clone();
            let index = if state.sorted_by_id {
                match state.ids.binary_search(&id) {
                    Ok(_) => return,
                    Err(pos) => pos,
                }
            } else {
                self.sorted_position(&mut state.ids, resource, &order)
            };
            state.ids.insert(index, id);
            index
        };
        self.fire(ListEventKind::Added { reposition }, resource, index, changes);
    }

    /// Insertion point under `order`. Neighbours whose resource vanished
    /// are evicted on the way.
    fn sorted_position(&self, ids: &mut Vec<ResourceId>, resource: &Resource, order: &SortOrder) -> usize {
        let mut stale = Vec::new();
        let pos = ids.partition_point(|&other| match self.resolve(other) {
            Some(other) => order.compare(&other, resource).is_le(),
            None => {
                stale.push(other);
                true
            }
        });
        if stale.is_empty() {
            return pos;
        }
        warn!(stale = stale.len(), "evicting vanished resources from sorted list");
        ids.retain(|id| !stale.contains(id));
        ids.partition_point(|&other| {
            self.resolve(other).is_some_and(|other| order.compare(&other, resource).is_le())
        })
    }

    fn remove(&self, resource: &Arc<Resource>, changes: &Arc<ChangeSet>) {
        let id = resource.original_id();
        let Some(index) = self.data.state.lock().position(id) else {
            return;
        };
        let notified = panic::catch_unwind(AssertUnwindSafe(|| {
            self.fire(ListEventKind::Removing, resource, index, changes);
        }));
        {
            let mut state = self.data.state.lock();
            if let Some(index) = state.position(id) {
                state.ids.remove(index);
            }
        }
        if let Err(payload) = notified {
            error!(
                resource = id.0,
                panic = panic_message(&*payload),
                "list listener panicked during removal; resource removed anyway"
            );
        }
    }

    fn changed(&self, resource: &Arc<Resource>, changes: &Arc<ChangeSet>) {
        let relevant = match self.watch.read().as_ref() {
            Some(watched) => changes.is_any_changed(watched.iter()),
            None => true,
        };
        if !relevant {
            return;
        }

        let order = self.sort.read().clone();
        let id = resource.original_id();
        let moves = !order.is_id()
            && order
                .key_props()
                .is_none_or(|props| changes.is_display_name_affected() || changes.is_any_changed(props.iter()));
        if moves && !self.in_place(resource, &order) {
            debug!(resource = id.0, "repositioning list member");
            {
                let mut state = self.data.state.lock();
                if let Some(index) = state.position(id) {
                    state.ids.remove(index);
                }
            }
            self.insert(resource, changes, true);
        }

        let index = self.data.state.lock().position(id);
        if let Some(index) = index {
            self.fire(ListEventKind::Changed, resource, index, changes);
        }
    }

    /// Whether `resource` still sits between its immediate neighbours.
    /// Vanished neighbours are evicted.
    fn in_place(&self, resource: &Resource, order: &SortOrder) -> bool {
        let id = resource.original_id();
        let neighbours = {
            let state = self.data.state.lock();
            let Some(index) = state.position(id) else { return true };
            let before = index.checked_sub(1).map(|i| state.ids[i]);
            let after = state.ids.get(index + 1).copied();
            (before, after)
        };
        let mut ok = true;
        for (neighbour, must_be) in [(neighbours.0, true), (neighbours.1, false)] {
            let Some(other_id) = neighbour else { continue };
            match self.resolve(other_id) {
                Some(other) => {
                    let ord = if must_be {
                        order.compare(&other, resource)
                    } else {
                        order.compare(resource, &other)
                    };
                    ok &= ord.is_le();
                }
                None => {
                    warn!(resource = other_id.0, "evicting vanished neighbour from sorted list");
                    let mut state = self.data.state.lock();
                    if let Some(i) = state.position(other_id) {
                        state.ids.remove(i);
                    }
                    ok = false;
                }
            }
        }
        ok
    }
}

// ============================================================================
// Reading
// ============================================================================

impl ResourceList {
    /// Number of members. Every reader instantiates the list first and
    /// fails with the instantiation error, if any.
    pub fn len(&self) -> Result<usize> {
        self.inner.instantiate()?;
        Ok(self.inner.data.state.lock().ids.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, id: ResourceId) -> Result<bool> {
        self.inner.instantiate()?;
        Ok(self.inner.data.contains(id))
    }

    pub fn index_of(&self, id: ResourceId) -> Result<Option<usize>> {
        self.inner.instantiate()?;
        Ok(self.inner.data.state.lock().position(id))
    }

    /// Member ids in list order.
    pub fn ids(&self) -> Result<Vec<ResourceId>> {
        self.inner.instantiate()?;
        Ok(self.inner.data.state.lock().ids.clone())
    }

    pub fn get(&self, index: usize) -> Result<Option<Arc<Resource>>> {
        self.inner.instantiate()?;
        let id = self.inner.data.state.lock().ids.get(index).copied();
        match id {
            Some(id) => self.inner.store.inner.resource(id),
            None => Ok(None),
        }
    }

    /// Members in list order. Resources deleted since instantiation are
    /// skipped.
    pub fn resources(&self) -> Result<Vec<Arc<Resource>>> {
        self.inner.instantiate()?;
        let ids = self.inner.data.state.lock().ids.clone();
        Ok(self.inner.resolve_all(&ids))
    }
}

// ============================================================================
// Sorting, watching and listeners
// ============================================================================

impl ResourceList {
    pub fn sort_order(&self) -> SortOrder {
        self.inner.sort.read().clone()
    }

    /// Order the list. An instantiated list is re-sorted immediately; a
    /// list sorted by anything but id before keeps the relative order of
    /// members that compare equal.
    ///
    /// Sorting runs without the list lock. Members added or removed by
    /// other threads meanwhile are reconciled when the new order is
    /// committed.
    pub fn sort(&self, order: SortOrder) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.instantiate_lock.lock();
        let stable = inner.externally_sorted.swap(!order.is_id(), Ordering::AcqRel);
        if inner.phase.load(Ordering::Acquire) != INSTANTIATED {
            *inner.sort.write() = order;
            return Ok(());
        }

        let before = inner.data.state.lock().ids.clone();
        let sorted: Vec<ResourceId> = if order.is_id() {
            let mut ids = before.clone();
            ids.sort_unstable();
            ids
        } else {
            let mut resolved = inner.resolve_all(&before);
            if stable {
                resolved.sort_by(|a, b| order.compare(a, b));
            } else {
                resolved.sort_unstable_by(|a, b| order.compare(a, b));
            }
            resolved.iter().map(|r| r.original_id()).collect()
        };

        let mut state = inner.data.state.lock();
        *inner.sort.write() = order.clone();
        state.sorted_by_id = order.is_id();
        let now: HashSet<ResourceId> = state.ids.iter().copied().collect();
        let seen: HashSet<ResourceId> = before.iter().copied().collect();
        let arrived: Vec<ResourceId> = state.ids.iter().copied().filter(|id| !seen.contains(id)).collect();
        state.ids = sorted.into_iter().filter(|id| now.contains(id)).collect();
        if !arrived.is_empty() {
            debug!(arrived = arrived.len(), "members added during sort; placing them");
        }
        for id in arrived {
            if state.sorted_by_id {
                if let Err(pos) = state.ids.binary_search(&id) {
                    state.ids.insert(pos, id);
                }
            } else if let Some(resource) = inner.resolve(id) {
                let pos = inner.sorted_position(&mut state.ids, &resource, &order);
                state.ids.insert(pos, id);
            }
        }
        Ok(())
    }

    /// Limit `Changed` events and repositioning to changes touching
    /// `props`. Link types are matched by their positive id.
    pub fn watch_properties(&self, props: impl IntoIterator<Item = PropId>) {
        let set: HashSet<PropId> = props.into_iter().map(PropId::base).collect();
        *self.inner.watch.write() = Some(set);
    }

    pub fn watched_properties(&self) -> Option<Vec<PropId>> {
        self.inner.watch.read().as_ref().map(|set| {
            let mut props: Vec<PropId> = set.iter().copied().collect();
            props.sort_unstable();
            props
        })
    }

    /// Register a listener and instantiate the list so events start flowing.
    /// The listener is dropped again if the list cannot be instantiated.
    pub fn add_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&ListEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push((id, Arc::new(listener)));
        if let Err(err) = self.inner.instantiate() {
            self.remove_listener(id);
            return Err(err);
        }
        Ok(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PropDataType;
    use pretty_assertions::assert_eq;

    struct Fixture {
        store: ResourceStore,
        size: PropId,
        name: PropId,
        file: ResourceTypeId,
    }

    fn fixture() -> Fixture {
        let store = ResourceStore::open_memory();
        let size = store.register_prop_type("Size", PropDataType::Int).unwrap();
        let name = store.register_prop_type("Name", PropDataType::String).unwrap();
        let file = store.register_resource_type("File", &[name]).unwrap();
        Fixture { store, size, name, file }
    }

    fn recorder(list: &ResourceList) -> Arc<Mutex<Vec<(ListEventKind, ResourceId, usize)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        list.add_listener(move |e: &ListEvent| {
            sink.lock().push((e.kind, e.resource.original_id(), e.index));
        })
        .unwrap();
        seen
    }

    #[test]
    fn test_lazy_instantiation() {
        let f = fixture();
        let a = f.store.create_resource(f.file, |r| r.set_prop(f.size, 1)).unwrap();
        let list = f.store.find(f.size, 1, true);
        assert!(!list.is_instantiated());
        assert_eq!(list.ids().unwrap(), vec![a.original_id()]);
        assert!(list.is_instantiated());
    }

    #[test]
    fn test_live_list_follows_changes() {
        let f = fixture();
        let list = f.store.find(f.size, 1, true);
        assert!(list.is_empty().unwrap());
        let seen = recorder(&list);

        let a = f.store.create_resource(f.file, |r| r.set_prop(f.size, 1)).unwrap();
        let b = f.store.create_resource(f.file, |r| r.set_prop(f.size, 2)).unwrap();
        assert_eq!(list.ids().unwrap(), vec![a.original_id()]);

        b.set_prop(f.size, 1).unwrap();
        a.set_prop(f.size, 3).unwrap();
        assert_eq!(list.ids().unwrap(), vec![b.original_id()]);

        assert_eq!(
            *seen.lock(),
            vec![
                (ListEventKind::Added { reposition: false }, a.original_id(), 0),
                (ListEventKind::Added { reposition: false }, b.original_id(), 1),
                (ListEventKind::Removing, a.original_id(), 0),
            ]
        );
    }

    #[test]
    fn test_non_live_list_is_frozen() {
        let f = fixture();
        let a = f.store.create_resource(f.file, |r| r.set_prop(f.size, 1)).unwrap();
        let list = f.store.find(f.size, 1, false);
        assert_eq!(list.len().unwrap(), 1);
        f.store.create_resource(f.file, |r| r.set_prop(f.size, 1)).unwrap();
        a.delete().unwrap();
        assert_eq!(list.ids().unwrap(), vec![a.original_id()]);
    }

    #[test]
    fn test_removing_fires_while_readable() {
        let f = fixture();
        let a = f.store.create_resource(f.file, |r| r.set_prop(f.name, "doomed")).unwrap();
        let list = f.store.all_of_type(f.file, true);
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = names.clone();
        let probe = list.clone();
        let name = f.name;
        list.add_listener(move |e: &ListEvent| {
            if e.kind == ListEventKind::Removing {
                assert_eq!(probe.index_of(e.resource.original_id()).unwrap(), Some(e.index));
                sink.lock().push(e.resource.get_string(name).ok().flatten());
            }
        })
        .unwrap();
        a.delete().unwrap();
        assert!(list.is_empty().unwrap());
        assert_eq!(*names.lock(), vec![Some("doomed".to_string())]);
    }

    #[test]
    fn test_sorted_insert_and_reposition() {
        let f = fixture();
        let list = f.store.all_of_type(f.file, true);
        list.sort(SortOrder::by_prop(f.size, true)).unwrap();
        let a = f.store.create_resource(f.file, |r| r.set_prop(f.size, 30)).unwrap();
        let b = f.store.create_resource(f.file, |r| r.set_prop(f.size, 10)).unwrap();
        let c = f.store.create_resource(f.file, |r| r.set_prop(f.size, 20)).unwrap();
        assert_eq!(list.ids().unwrap(), vec![b.original_id(), c.original_id(), a.original_id()]);

        let seen = recorder(&list);
        b.set_prop(f.size, 40).unwrap();
        assert_eq!(list.ids().unwrap(), vec![c.original_id(), a.original_id(), b.original_id()]);
        assert_eq!(
            *seen.lock(),
            vec![
                (ListEventKind::Added { reposition: true }, b.original_id(), 2),
                (ListEventKind::Changed, b.original_id(), 2),
            ]
        );
    }

    #[test]
    fn test_watch_filter_limits_changed_events() {
        let f = fixture();
        let a = f.store.create_resource(f.file, |r| r.set_prop(f.size, 1)).unwrap();
        let list = f.store.all_of_type(f.file, true);
        list.watch_properties([f.name]);
        let seen = recorder(&list);

        a.set_prop(f.size, 2).unwrap();
        assert!(seen.lock().is_empty());
        a.set_prop(f.name, "x").unwrap();
        assert_eq!(*seen.lock(), vec![(ListEventKind::Changed, a.original_id(), 0)]);
    }

    #[test]
    fn test_resort_is_stable() {
        let f = fixture();
        let ids: Vec<ResourceId> = [2, 1, 2, 1]
            .into_iter()
            .map(|n| f.store.create_resource(f.file, |r| r.set_prop(f.size, n)).unwrap().original_id())
            .collect();
        let list = f.store.all_of_type(f.file, true);
        list.sort(SortOrder::Keys(vec![
            SortKey::asc(SortField::Prop(f.size)),
            SortKey::desc(SortField::Id),
        ]))
        .unwrap();
        assert_eq!(list.ids().unwrap(), vec![ids[3], ids[1], ids[2], ids[0]]);

        let size = f.size;
        let parity = move |a: &Resource, b: &Resource| {
            let key = |r: &Resource| r.get_int(size).ok().flatten().unwrap_or(0) % 2;
            key(a).cmp(&key(b))
        };
        list.sort(SortOrder::custom(parity)).unwrap();
        assert_eq!(list.ids().unwrap(), vec![ids[2], ids[0], ids[3], ids[1]]);
    }

    #[test]
    fn test_deinstantiate_is_idempotent() {
        let f = fixture();
        let list = f.store.all_of_type(f.file, true);
        list.deinstantiate();
        assert_eq!(list.len().unwrap(), 0);
        let subscribers = f.store.inner.hub.subscriber_count();
        list.deinstantiate();
        list.deinstantiate();
        assert_eq!(f.store.inner.hub.subscriber_count(), subscribers - 1);

        let a = f.store.new_resource(f.file).unwrap();
        assert_eq!(list.ids().unwrap(), vec![a.original_id()]);
    }

    #[test]
    fn test_dropping_list_releases_subscription() {
        let f = fixture();
        let before = f.store.inner.hub.subscriber_count();
        {
            let list = f.store.all_of_type(f.file, true);
            list.instantiate().unwrap();
            assert_eq!(f.store.inner.hub.subscriber_count(), before + 1);
        }
        assert_eq!(f.store.inner.hub.subscriber_count(), before);
    }

    #[test]
    fn test_listener_removal() {
        let f = fixture();
        let list = f.store.all_of_type(f.file, true);
        let seen = Arc::new(AtomicU64::new(0));
        let count = seen.clone();
        let id = list.add_listener(move |_: &ListEvent| {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        f.store.new_resource(f.file).unwrap();
        assert!(list.remove_listener(id));
        assert!(!list.remove_listener(id));
        f.store.new_resource(f.file).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
