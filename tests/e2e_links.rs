//! End-to-end tests for link maintenance and restriction enforcement.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use livestore::{
    CardinalityRestrictions, Error, LinkDirection, PropId, Resource, ResourceEvent, ResourceStore,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn is_ascending_unique(ids: &[livestore::ResourceId]) -> bool {
    ids.windows(2).all(|w| w[0] < w[1])
}

fn check_symmetry(pool: &[Arc<Resource>], prop: PropId, directed: bool) -> Result<(), TestCaseError> {
    for x in pool {
        let outgoing = x.links(prop, LinkDirection::Outgoing).unwrap();
        let incoming = x.links(prop, LinkDirection::Incoming).unwrap();
        prop_assert!(is_ascending_unique(&outgoing));
        prop_assert!(is_ascending_unique(&incoming));
        for y in pool {
            if x.id() == y.id() {
                continue;
            }
            let forward = outgoing.contains(&y.id());
            let mirrored = if directed {
                y.links(prop, LinkDirection::Incoming).unwrap().contains(&x.id())
            } else {
                y.links(prop, LinkDirection::Both).unwrap().contains(&x.id())
            };
            prop_assert_eq!(forward, mirrored);
            prop_assert_eq!(forward, x.has_link(prop, y.id()).unwrap());
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_links_stay_symmetric(
        ops in proptest::collection::vec((any::<bool>(), any::<bool>(), 0..6usize, 0..6usize), 1..60)
    ) {
        let store = ResourceStore::open_memory();
        let parent = store.register_link_type("Parent", true).unwrap();
        let peer = store.register_link_type("Peer", false).unwrap();
        let t = store.register_resource_type("T", &[]).unwrap();
        let pool: Vec<_> = (0..6).map(|_| store.new_resource(t).unwrap()).collect();

        for (add, directed, a, b) in ops {
            if a == b {
                continue;
            }
            let prop = if directed { parent } else { peer };
            let (x, y) = (&pool[a], &pool[b]);
            if add {
                x.add_link(prop, y).unwrap();
            } else {
                x.delete_link(prop, y).unwrap();
            }
        }

        check_symmetry(&pool, parent, true)?;
        check_symmetry(&pool, peer, false)?;

        // Storage agrees with memory.
        let stored = store.backend().scan_links(parent).unwrap().count();
        let held: usize = pool.iter().map(|r| r.link_count(parent, LinkDirection::Outgoing).unwrap()).sum();
        prop_assert_eq!(stored, held);
    }
}

#[test]
fn test_restriction_aborts_mutation() {
    let store = ResourceStore::open_memory();
    let owner = store.register_link_type("Owner", true).unwrap();
    let t = store.register_resource_type("T", &[]).unwrap();
    store.set_restrictions(Arc::new(CardinalityRestrictions::new().with_max_outgoing(owner, 1)));
    let a = store.new_resource(t).unwrap();
    let b = store.new_resource(t).unwrap();
    let c = store.new_resource(t).unwrap();
    a.add_link(owner, &b).unwrap();

    let events = Arc::new(AtomicUsize::new(0));
    let counter = events.clone();
    store.subscribe(move |_: &ResourceEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let err = a.add_link(owner, &c).unwrap_err();
    assert!(matches!(err, Error::Restriction(_)));
    assert!(!err.is_programmer_error());
    assert_eq!(a.links(owner, LinkDirection::Outgoing).unwrap(), vec![b.id()]);
    assert!(c.links(owner, LinkDirection::Incoming).unwrap().is_empty());
    assert_eq!(events.load(Ordering::SeqCst), 0);

    // Replacing the only link stays within the bound: one batched change on
    // `a`, plus one each for the old and new target's mirror slot.
    a.set_link(owner, &c).unwrap();
    assert_eq!(a.links(owner, LinkDirection::Outgoing).unwrap(), vec![c.id()]);
    assert_eq!(events.load(Ordering::SeqCst), 3);
}

#[test]
fn test_links_reload_from_storage() {
    let store = ResourceStore::open_memory();
    let parent = store.register_link_type("Parent", true).unwrap();
    let t = store.register_resource_type("T", &[]).unwrap();
    let a = store.new_resource(t).unwrap();
    let b = store.new_resource(t).unwrap();
    b.add_link(parent, &a).unwrap();

    let reopened = ResourceStore::open(store.backend().clone(), Default::default()).unwrap();
    reopened.register_link_type("Parent", true).unwrap();
    reopened.register_resource_type("T", &[]).unwrap();
    let a2 = reopened.get(a.id()).unwrap();
    let b2 = reopened.get(b.id()).unwrap();
    assert_eq!(a2.links(parent, LinkDirection::Incoming).unwrap(), vec![b.id()]);
    assert_eq!(b2.links(parent, LinkDirection::Outgoing).unwrap(), vec![a.id()]);
    assert_eq!(b2.link_types().unwrap(), vec![parent]);
}

#[test]
fn test_delete_detaches_links() {
    let store = ResourceStore::open_memory();
    let parent = store.register_link_type("Parent", true).unwrap();
    let peer = store.register_link_type("Peer", false).unwrap();
    let t = store.register_resource_type("T", &[]).unwrap();
    let a = store.new_resource(t).unwrap();
    let b = store.new_resource(t).unwrap();
    let c = store.new_resource(t).unwrap();
    b.add_link(parent, &a).unwrap();
    c.add_link(peer, &b).unwrap();

    b.delete().unwrap();
    assert!(a.links(parent, LinkDirection::Both).unwrap().is_empty());
    assert!(c.links(peer, LinkDirection::Both).unwrap().is_empty());
    assert_eq!(store.backend().scan_links(parent).unwrap().count(), 0);
    assert_eq!(store.backend().scan_links(peer).unwrap().count(), 0);
}
