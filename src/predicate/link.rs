//! Link predicate: the resources a fixed base resource reaches through one
//! link type.
//!
//! A resource R matches when the base holds R in one of the queried slots,
//! which is the same as R holding the base in the mirror slot. Incremental
//! matching therefore looks at R's mirror slots and at R's link deltas
//! towards the base. When both slots of a directed type are queried, an add
//! on one slot and a delete on the other cancel out to a plain match.

use crate::change_set::{ChangeSet, LinkChangeKind};
use crate::model::*;
use crate::resource::Resource;
use crate::store::ResourceStore;
use crate::Result;

pub(super) fn select(
    store: &ResourceStore,
    base: ResourceId,
    prop: PropId,
    direction: LinkDirection,
) -> Result<Vec<ResourceId>> {
    match store.inner.resource(base)? {
        Some(base) if !base.is_deleted() => base.links(prop, direction),
        _ => Ok(Vec::new()),
    }
}

fn mirror_slots(
    store: &ResourceStore,
    prop: PropId,
    direction: LinkDirection,
) -> Result<impl Iterator<Item = PropId>> {
    let def = store.inner.schema.require_link_type(prop)?;
    Ok(direction.reversed().slots(def.id, def.directed))
}

pub(super) fn test(
    store: &ResourceStore,
    resource: &Resource,
    base: ResourceId,
    prop: PropId,
    direction: LinkDirection,
) -> Result<bool> {
    for slot in mirror_slots(store, prop, direction)? {
        if resource.slot_targets(&store.inner, slot)?.binary_search(&base).is_ok() {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(super) fn transition(
    store: &ResourceStore,
    resource: &Resource,
    changes: &ChangeSet,
    base: ResourceId,
    prop: PropId,
    direction: LinkDirection,
) -> Result<(bool, bool)> {
    let (mut was, mut is) = (false, false);
    for slot in mirror_slots(store, prop, direction)? {
        let held = resource.slot_targets(&store.inner, slot)?.binary_search(&base).is_ok();
        let held_before = match changes.link_change(slot, base) {
            LinkChangeKind::Added => false,
            LinkChangeKind::Deleted => true,
            LinkChangeKind::None => held,
        };
        is |= held;
        was |= held_before;
    }
    if changes.is_new_resource() {
        was = false;
    }
    Ok((was, is))
}
