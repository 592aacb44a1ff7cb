//! Global change notification stream.
//!
//! Every state-changing mutation ends with one [`ResourceEvent`] dispatched
//! synchronously to every subscriber, on the mutating thread, after the
//! resource's own lock has been released. Events of one resource therefore
//! reach each subscriber in mutation order; there is no ordering across
//! resources mutated from different threads.
//!
//! A subscriber that panics is logged and skipped; the remaining
//! subscribers still see the event and the mutation still completes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{error, trace};

use crate::change_set::ChangeSet;
use crate::resource::Resource;

/// What happened to the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A new resource was created (or a transient one persisted).
    Added,
    /// Properties, links or the type changed.
    Changed,
    /// The resource is about to be removed. It is still readable.
    Deleting,
}

/// One notification.
#[derive(Clone)]
pub struct ResourceEvent {
    pub resource: Arc<Resource>,
    pub kind: EventKind,
    pub changes: Arc<ChangeSet>,
}

impl std::fmt::Debug for ResourceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceEvent")
            .field("resource", &self.resource.original_id())
            .field("kind", &self.kind)
            .field("changes", &self.changes)
            .finish()
    }
}

/// Receiver of resource events.
pub trait ChangeListener: Send + Sync {
    fn on_event(&self, event: &ResourceEvent);
}

impl<F> ChangeListener for F
where
    F: Fn(&ResourceEvent) + Send + Sync,
{
    fn on_event(&self, event: &ResourceEvent) {
        self(event)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

enum Subscriber {
    /// Owned by the hub (user callbacks).
    Owned(Arc<dyn ChangeListener>),
    /// Owned elsewhere (lists); silently dropped once the owner goes away.
    Borrowed(Weak<dyn ChangeListener>),
}

impl Subscriber {
    fn get(&self) -> Option<Arc<dyn ChangeListener>> {
        match self {
            Subscriber::Owned(l) => Some(l.clone()),
            Subscriber::Borrowed(w) => w.upgrade(),
        }
    }
}

/// The subscriber registry.
pub(crate) struct NotificationHub {
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
    next_id: AtomicU64,
}

impl NotificationHub {
    pub(crate) fn new() -> Self {
        Self { subscribers: RwLock::new(Vec::new()), next_id: AtomicU64::new(1) }
    }

    pub(crate) fn subscribe(&self, listener: Arc<dyn ChangeListener>) -> SubscriptionId {
        self.insert(Subscriber::Owned(listener))
    }

    pub(crate) fn subscribe_weak(&self, listener: Weak<dyn ChangeListener>) -> SubscriptionId {
        self.insert(Subscriber::Borrowed(listener))
    }

    fn insert(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, subscriber));
        id
    }

    /// Remove a subscription. Unknown or already removed ids are ignored.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write();
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        subs.len() != before
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver `event` to every live subscriber. The registry lock is not
    /// held while listeners run, so listeners may subscribe or unsubscribe.
    pub(crate) fn dispatch(&self, event: &ResourceEvent) {
        let (targets, stale) = {
            let subs = self.subscribers.read();
            let mut targets = Vec::with_capacity(subs.len());
            let mut stale = false;
            for (_, sub) in subs.iter() {
                match sub.get() {
                    Some(l) => targets.push(l),
                    None => stale = true,
                }
            }
            (targets, stale)
        };

        trace!(
            resource = event.resource.original_id().0,
            kind = ?event.kind,
            listeners = targets.len(),
            "dispatching resource event"
        );
        for listener in targets {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                error!(
                    resource = event.resource.original_id().0,
                    kind = ?event.kind,
                    panic = panic_message(&*payload),
                    "change listener panicked; event delivery continues"
                );
            }
        }

        if stale {
            self.subscribers.write().retain(|(_, sub)| sub.get().is_some());
        }
    }
}

/// Text of a caught panic payload, for logging.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    impl ChangeListener for Counter {
        fn on_event(&self, _event: &ResourceEvent) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let hub = NotificationHub::new();
        let id = hub.subscribe(Arc::new(|_: &ResourceEvent| {}));
        assert_eq!(hub.subscriber_count(), 1);
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_delivery() {
        let store = crate::ResourceStore::open_memory();
        let t = store.register_resource_type("T", &[]).unwrap();
        store.subscribe(|_: &ResourceEvent| {
            panic!("subscriber failure");
        });
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        store.subscribe_listener(counter.clone());

        store.new_resource(t).unwrap();
        store.new_resource(t).unwrap();
        assert_eq!(counter.0.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_weak_subscriber_dropped_with_owner() {
        let hub = NotificationHub::new();
        let counter: Arc<dyn ChangeListener> = Arc::new(Counter(AtomicUsize::new(0)));
        hub.subscribe_weak(Arc::downgrade(&counter));
        assert_eq!(hub.subscriber_count(), 1);
        drop(counter);
        // pruned lazily on the next dispatch; get() already reports it gone
        assert!(hub.subscribers.read().iter().all(|(_, s)| s.get().is_none()));
    }
}
