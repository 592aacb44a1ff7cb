//! Change sets: what changed on one resource during one update.
//!
//! A change set records the *old* value of every touched property; the new
//! value is read from the resource itself. Link deltas record the slot
//! (forward or reverse), the other endpoint and whether the link was added
//! or removed.
//!
//! Change sets produced inside a nested update scope are merged into one.
//! The first old value observed for a property wins, so a property written
//! twice inside a scope reports the value it had before the scope began.
//! A link added and removed again inside one scope cancels out.

use smallvec::SmallVec;

use crate::model::{PropId, PropValue, ResourceId, ResourceTypeId};

/// Net effect of an update on one (slot, target) link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkChangeKind {
    None,
    Added,
    Deleted,
}

impl LinkChangeKind {
    fn opposite(self) -> LinkChangeKind {
        match self {
            LinkChangeKind::Added => LinkChangeKind::Deleted,
            LinkChangeKind::Deleted => LinkChangeKind::Added,
            LinkChangeKind::None => LinkChangeKind::None,
        }
    }
}

/// One link delta. `slot` is negative for the reverse side of a directed link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkChange {
    pub slot: PropId,
    pub target: ResourceId,
    pub kind: LinkChangeKind,
}

type PropEntry = (PropId, Option<PropValue>);

/// Old values of changed properties. Most updates touch one property, so
/// that case skips the vector.
#[derive(Debug, Clone, PartialEq, Default)]
enum PropDeltas {
    #[default]
    Empty,
    Single(PropEntry),
    Multi(Vec<PropEntry>),
}

impl PropDeltas {
    fn as_slice(&self) -> &[PropEntry] {
        match self {
            PropDeltas::Empty => &[],
            PropDeltas::Single(entry) => std::slice::from_ref(entry),
            PropDeltas::Multi(entries) => entries,
        }
    }

    /// Add an entry unless the property is already recorded.
    fn push_first(&mut self, entry: PropEntry) {
        if self.as_slice().iter().any(|(p, _)| *p == entry.0) {
            return;
        }
        *self = match std::mem::take(self) {
            PropDeltas::Empty => PropDeltas::Single(entry),
            PropDeltas::Single(first) => PropDeltas::Multi(vec![first, entry]),
            PropDeltas::Multi(mut entries) => {
                entries.push(entry);
                PropDeltas::Multi(entries)
            }
        };
    }
}

/// Description of what changed on one resource.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeSet {
    props: PropDeltas,
    links: SmallVec<[LinkChange; 2]>,
    old_type: Option<ResourceTypeId>,
    is_new: bool,
    display_name_affected: bool,
}

// ============================================================================
// Construction
// ============================================================================

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A property went from `old` to whatever the resource now holds.
    pub fn property(prop: PropId, old: Option<PropValue>, display_name_affected: bool) -> Self {
        Self {
            props: PropDeltas::Single((prop, old)),
            display_name_affected,
            ..Self::default()
        }
    }

    /// A link in `slot` towards `target` was added or removed.
    pub fn link(slot: PropId, target: ResourceId, kind: LinkChangeKind) -> Self {
        let mut cs = Self::default();
        if kind != LinkChangeKind::None {
            cs.links.push(LinkChange { slot, target, kind });
        }
        cs
    }

    /// The resource changed type; `old` is the type before the change.
    pub fn retyped(old: ResourceTypeId) -> Self {
        Self {
            old_type: Some(old),
            display_name_affected: true,
            ..Self::default()
        }
    }

    /// Announces a resource that did not exist before.
    pub fn new_resource() -> Self {
        Self { is_new: true, display_name_affected: true, ..Self::default() }
    }

    /// Fold a later change set of the same resource into this one.
    pub fn merge(&mut self, later: ChangeSet) {
        let ChangeSet { props, links, old_type, is_new, display_name_affected } = later;
        for entry in props.as_slice().iter().cloned() {
            self.props.push_first(entry);
        }
        for change in links {
            self.merge_link(change);
        }
        if self.old_type.is_none() {
            self.old_type = old_type;
        }
        self.is_new |= is_new;
        self.display_name_affected |= display_name_affected;
    }

    fn merge_link(&mut self, change: LinkChange) {
        let existing = self
            .links
            .iter()
            .position(|l| l.slot == change.slot && l.target == change.target);
        match existing {
            Some(i) if self.links[i].kind == change.kind.opposite() => {
                self.links.remove(i);
            }
            Some(_) => {}
            None => self.links.push(change),
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

impl ChangeSet {
    /// True if nothing observable changed.
    pub fn is_empty(&self) -> bool {
        self.props.as_slice().is_empty()
            && self.links.is_empty()
            && self.old_type.is_none()
            && !self.is_new
    }

    pub fn is_new_resource(&self) -> bool {
        self.is_new
    }

    pub fn is_display_name_affected(&self) -> bool {
        self.display_name_affected
    }

    /// Type before a re-type, if one happened.
    pub fn old_type(&self) -> Option<ResourceTypeId> {
        self.old_type
    }

    /// Ids of changed properties, including link types whose links changed.
    /// Link types are reported by their positive id.
    pub fn changed_props(&self) -> Vec<PropId> {
        let mut ids: Vec<PropId> = self.props.as_slice().iter().map(|(p, _)| *p).collect();
        for link in &self.links {
            let base = link.slot.base();
            if !ids.contains(&base) {
                ids.push(base);
            }
        }
        ids
    }

    /// Whether `prop` (or any slot of the link type `prop`) changed.
    pub fn is_changed(&self, prop: PropId) -> bool {
        let base = prop.base();
        self.props.as_slice().iter().any(|(p, _)| *p == base)
            || self.links.iter().any(|l| l.slot.base() == base)
    }

    /// Whether any of `props` changed.
    pub fn is_any_changed<'a>(&self, props: impl IntoIterator<Item = &'a PropId>) -> bool {
        props.into_iter().any(|p| self.is_changed(*p))
    }

    /// Value of `prop` before the update.
    ///
    /// The outer `None` means the property did not change; `Some(None)`
    /// means it had no value before.
    pub fn old_value(&self, prop: PropId) -> Option<Option<&PropValue>> {
        self.props
            .as_slice()
            .iter()
            .find(|(p, _)| *p == prop)
            .map(|(_, old)| old.as_ref())
    }

    /// Net change of the link in `slot` towards `target`.
    pub fn link_change(&self, slot: PropId, target: ResourceId) -> LinkChangeKind {
        self.links
            .iter()
            .find(|l| l.slot == slot && l.target == target)
            .map_or(LinkChangeKind::None, |l| l.kind)
    }

    /// Added minus removed links in `slot`.
    pub fn link_delta(&self, slot: PropId) -> isize {
        self.links
            .iter()
            .filter(|l| l.slot == slot)
            .map(|l| match l.kind {
                LinkChangeKind::Added => 1,
                LinkChangeKind::Deleted => -1,
                LinkChangeKind::None => 0,
            })
            .sum()
    }

    pub fn link_changes(&self) -> &[LinkChange] {
        &self.links
    }

    /// Number of changed properties (link types not included).
    pub fn prop_count(&self) -> usize {
        self.props.as_slice().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: PropId = PropId(1);
    const Q: PropId = PropId(2);
    const L: PropId = PropId(3);

    #[test]
    fn test_single_property() {
        let cs = ChangeSet::property(P, Some(PropValue::Int(1)), false);
        assert!(cs.is_changed(P));
        assert!(!cs.is_changed(Q));
        assert_eq!(cs.old_value(P), Some(Some(&PropValue::Int(1))));
        assert_eq!(cs.old_value(Q), None);
        assert_eq!(cs.prop_count(), 1);
    }

    #[test]
    fn test_merge_keeps_first_old_value() {
        let mut cs = ChangeSet::property(P, Some(PropValue::Int(0)), false);
        cs.merge(ChangeSet::property(P, Some(PropValue::Int(1)), false));
        cs.merge(ChangeSet::property(Q, None, true));

        assert_eq!(cs.old_value(P), Some(Some(&PropValue::Int(0))));
        assert_eq!(cs.old_value(Q), Some(None));
        assert_eq!(cs.prop_count(), 2);
        assert!(cs.is_display_name_affected());
    }

    #[test]
    fn test_link_add_then_delete_cancels() {
        let mut cs = ChangeSet::link(L, ResourceId(9), LinkChangeKind::Added);
        assert_eq!(cs.link_change(L, ResourceId(9)), LinkChangeKind::Added);
        cs.merge(ChangeSet::link(L, ResourceId(9), LinkChangeKind::Deleted));
        assert_eq!(cs.link_change(L, ResourceId(9)), LinkChangeKind::None);
        assert!(cs.is_empty());
    }

    #[test]
    fn test_link_delta_and_changed_props() {
        let mut cs = ChangeSet::link(L.reverse(), ResourceId(1), LinkChangeKind::Added);
        cs.merge(ChangeSet::link(L.reverse(), ResourceId(2), LinkChangeKind::Added));
        cs.merge(ChangeSet::link(L.reverse(), ResourceId(3), LinkChangeKind::Deleted));

        assert_eq!(cs.link_delta(L.reverse()), 1);
        assert_eq!(cs.link_delta(L), 0);
        assert!(cs.is_changed(L));
        assert_eq!(cs.changed_props(), vec![L]);
    }

    #[test]
    fn test_retype_keeps_earliest_type() {
        let mut cs = ChangeSet::retyped(ResourceTypeId(1));
        cs.merge(ChangeSet::retyped(ResourceTypeId(2)));
        assert_eq!(cs.old_type(), Some(ResourceTypeId(1)));
    }

    #[test]
    fn test_new_resource_not_empty() {
        let cs = ChangeSet::new_resource();
        assert!(!cs.is_empty());
        assert!(ChangeSet::new().is_empty());
    }
}
