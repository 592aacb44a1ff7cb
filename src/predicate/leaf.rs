//! Leaf predicates answered by storage scans: type, property value,
//! property presence, link presence and single resource.

use crate::change_set::ChangeSet;
use crate::model::*;
use crate::resource::Resource;
use crate::storage::ScanRange;
use crate::store::ResourceStore;
use crate::Result;

use super::sorted;

pub(super) fn select_type(store: &ResourceStore, type_id: ResourceTypeId) -> Result<Vec<ResourceId>> {
    let ids: Vec<ResourceId> = store.inner.backend.resources_of_type(type_id)?.collect();
    Ok(sorted::from_scan(ids, store.inner.capabilities.id_ordered_scans))
}

pub(super) fn select_scan(
    store: &ResourceStore,
    prop: PropId,
    range: &ScanRange,
) -> Result<Vec<ResourceId>> {
    let ids: Vec<ResourceId> = store
        .inner
        .backend
        .scan_property(prop, range)?
        .map(|(id, _)| id)
        .collect();
    Ok(sorted::from_scan(ids, store.inner.capabilities.id_ordered_scans))
}

pub(super) fn select_has_link(
    store: &ResourceStore,
    prop: PropId,
    direction: LinkDirection,
) -> Result<Vec<ResourceId>> {
    let def = store.inner.schema.require_link_type(prop)?;
    let mut ids = Vec::new();
    for record in store.inner.backend.scan_links(def.id)? {
        match (def.directed, direction) {
            (true, LinkDirection::Outgoing) => ids.push(record.source),
            (true, LinkDirection::Incoming) => ids.push(record.target),
            _ => {
                ids.push(record.source);
                ids.push(record.target);
            }
        }
    }
    sorted::normalize(&mut ids);
    Ok(ids)
}

pub(super) fn select_single(store: &ResourceStore, id: ResourceId) -> Result<Vec<ResourceId>> {
    Ok(match store.inner.resource(id)? {
        Some(resource) if !resource.is_deleted() => vec![id],
        _ => Vec::new(),
    })
}

pub(super) fn value_matches(value: Option<&PropValue>, range: &ScanRange) -> bool {
    value.is_some_and(|v| range.contains(v))
}

/// Before/after for a predicate over one property's value. The old value
/// comes from the change set; the new one from the resource.
pub(super) fn value_transition(
    resource: &Resource,
    changes: &ChangeSet,
    prop: PropId,
    range: &ScanRange,
) -> Result<(bool, bool)> {
    let is = value_matches(resource.get_prop(prop)?.as_ref(), range);
    let was = if changes.is_new_resource() {
        false
    } else {
        match changes.old_value(prop) {
            Some(old) => value_matches(old, range),
            None => is,
        }
    };
    Ok((was, is))
}

/// Before/after for link presence, reconstructing the old slot sizes from
/// the change set's link deltas.
pub(super) fn has_link_transition(
    store: &ResourceStore,
    resource: &Resource,
    changes: &ChangeSet,
    prop: PropId,
    direction: LinkDirection,
) -> Result<(bool, bool)> {
    let def = store.inner.schema.require_link_type(prop)?;
    let mut now = 0isize;
    let mut before = 0isize;
    for slot in direction.slots(def.id, def.directed) {
        let len = resource.slot_targets(&store.inner, slot)?.len() as isize;
        now += len;
        before += len - changes.link_delta(slot);
    }
    let is = now > 0;
    let was = !changes.is_new_resource() && before > 0;
    Ok((was, is))
}
