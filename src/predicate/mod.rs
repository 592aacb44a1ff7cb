//! # Predicates
//!
//! A predicate is an immutable expression tree describing a set of
//! resources. Every node answers three questions:
//!
//! - **select**: the full match set, ascending by id, computed from storage
//! - **match_resource**: how one resource's membership moved given the
//!   [`ChangeSet`] of its latest update
//! - **selection_cost**: a small integer estimate, lower is cheaper, used
//!   to order the members of an intersection
//!
//! Nodes are shared behind an `Arc`. Nothing mutates a node once built
//! except the cached evaluation plan of a composite; merges that extend a
//! composite build a new node.
//!
//! | Variant | Cost | Selection |
//! |---------|------|-----------|
//! | `single` | 0 | fixed id |
//! | cached list | 1 | ids of a list |
//! | `link` | 1 | link slots of the base resource |
//! | `prop_value` | 2 | equality scan |
//! | `prop_range` | 3 | range scan |
//! | `has_link` | 3 | link-type scan |
//! | `has_prop` | 4 | property scan |
//! | `of_type` | 5 | type table scan |

mod composite;
mod leaf;
mod link;
mod minus;
mod optimize;
mod snapshot;
pub(crate) mod sorted;

pub(crate) use sorted::IdArray;

use std::ops::Bound;
use std::sync::Arc;

use crate::change_set::ChangeSet;
use crate::model::*;
use crate::resource::Resource;
use crate::storage::ScanRange;
use crate::store::ResourceStore;
use crate::Result;

use composite::Composite;
use snapshot::Snapshot;

/// Selection costs.
pub mod cost {
    pub const SINGLE: u32 = 0;
    pub const CACHED_LIST: u32 = 1;
    pub const LINK: u32 = 1;
    pub const PROP_VALUE: u32 = 2;
    pub const PROP_RANGE: u32 = 3;
    pub const HAS_LINK: u32 = 3;
    pub const HAS_PROP: u32 = 4;
    pub const TYPE: u32 = 5;

    /// From this cost on, a minus tests each left-hand candidate against
    /// the right side instead of selecting the right side.
    pub const SCAN_AND_TEST: u32 = HAS_PROP;
}

// ============================================================================
// Match classification
// ============================================================================

/// How one resource's membership changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateMatch {
    /// Did not match before and does not match now.
    None,
    /// Newly matches.
    Add,
    /// Matched before, no longer matches.
    Del,
    /// Matched before and still matches.
    Match,
}

impl PredicateMatch {
    pub fn from_transition(was: bool, is: bool) -> Self {
        match (was, is) {
            (false, false) => PredicateMatch::None,
            (false, true) => PredicateMatch::Add,
            (true, false) => PredicateMatch::Del,
            (true, true) => PredicateMatch::Match,
        }
    }

    pub fn was(self) -> bool {
        matches!(self, PredicateMatch::Del | PredicateMatch::Match)
    }

    pub fn is(self) -> bool {
        matches!(self, PredicateMatch::Add | PredicateMatch::Match)
    }
}

// ============================================================================
// Predicate tree
// ============================================================================

#[derive(Debug)]
pub(crate) enum Node {
    Type(ResourceTypeId),
    PropValue { prop: PropId, value: PropValue },
    PropRange { prop: PropId, lo: Bound<PropValue>, hi: Bound<PropValue> },
    HasProp(PropId),
    HasLink { prop: PropId, direction: LinkDirection },
    Link { base: ResourceId, prop: PropId, direction: LinkDirection },
    Intersection(Composite),
    Union(Composite),
    Minus { include: Predicate, exclude: Predicate },
    Single(ResourceId),
    CachedList(Arc<IdArray>),
    Snapshot(Snapshot),
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Type(a), Node::Type(b)) => a == b,
            (Node::PropValue { prop: p, value: v }, Node::PropValue { prop: q, value: w }) => {
                p == q && v == w
            }
            (
                Node::PropRange { prop: p, lo: l1, hi: h1 },
                Node::PropRange { prop: q, lo: l2, hi: h2 },
            ) => p == q && l1 == l2 && h1 == h2,
            (Node::HasProp(a), Node::HasProp(b)) => a == b,
            (
                Node::HasLink { prop: p, direction: d },
                Node::HasLink { prop: q, direction: e },
            ) => p == q && d == e,
            (
                Node::Link { base: a, prop: p, direction: d },
                Node::Link { base: b, prop: q, direction: e },
            ) => a == b && p == q && d == e,
            (Node::Intersection(a), Node::Intersection(b)) | (Node::Union(a), Node::Union(b)) => {
                a.members == b.members
            }
            (
                Node::Minus { include: a, exclude: x },
                Node::Minus { include: b, exclude: y },
            ) => a == b && x == y,
            (Node::Single(a), Node::Single(b)) => a == b,
            (Node::CachedList(a), Node::CachedList(b)) => Arc::ptr_eq(a, b),
            (Node::Snapshot(a), Node::Snapshot(b)) => a.same_as(b),
            _ => false,
        }
    }
}

/// A shared, immutable predicate node.
#[derive(Debug, Clone)]
pub struct Predicate(Arc<Node>);

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

// ============================================================================
// Construction
// ============================================================================

impl Predicate {
    fn from_node(node: Node) -> Self {
        Self(Arc::new(node))
    }

    pub(crate) fn node(&self) -> &Node {
        &self.0
    }

    /// Same node, not merely structurally equal.
    pub fn is_same(&self, other: &Predicate) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Resources of one type.
    pub fn of_type(type_id: ResourceTypeId) -> Self {
        Self::from_node(Node::Type(type_id))
    }

    /// Resources whose `prop` equals `value`.
    pub fn prop_value(prop: PropId, value: impl Into<PropValue>) -> Self {
        Self::from_node(Node::PropValue { prop: prop.base(), value: value.into() })
    }

    /// Resources whose `prop` lies within the bounds. Values of another
    /// type never match.
    pub fn prop_range(prop: PropId, lo: Bound<PropValue>, hi: Bound<PropValue>) -> Self {
        Self::from_node(Node::PropRange { prop: prop.base(), lo, hi })
    }

    /// Resources carrying any value for `prop`.
    pub fn has_prop(prop: PropId) -> Self {
        Self::from_node(Node::HasProp(prop.base()))
    }

    /// Resources with at least one link of type `prop` in `direction`.
    pub fn has_link(prop: PropId, direction: LinkDirection) -> Self {
        let (prop, direction) = direction.normalize(prop);
        Self::from_node(Node::HasLink { prop, direction })
    }

    /// Resources that `base` reaches through `prop` in `direction`.
    ///
    /// `link(a, parent, Incoming)` selects the resources whose `parent`
    /// link points at `a`; `Both` also includes `a`'s own parents.
    pub fn link(base: ResourceId, prop: PropId, direction: LinkDirection) -> Self {
        let (prop, direction) = direction.normalize(prop);
        Self::from_node(Node::Link { base, prop, direction })
    }

    /// Exactly one resource.
    pub fn single(id: ResourceId) -> Self {
        Self::from_node(Node::Single(id))
    }

    pub fn intersection(members: Vec<Predicate>) -> Self {
        Self::from_node(Node::Intersection(Composite::new(members)))
    }

    pub fn union(members: Vec<Predicate>) -> Self {
        Self::from_node(Node::Union(Composite::new(members)))
    }

    /// Resources matching `include` but not `exclude`.
    pub fn minus(include: Predicate, exclude: Predicate) -> Self {
        Self::from_node(Node::Minus { include, exclude })
    }

    pub fn and(&self, other: &Predicate) -> Self {
        Self::intersection(vec![self.clone(), other.clone()])
    }

    pub fn or(&self, other: &Predicate) -> Self {
        Self::union(vec![self.clone(), other.clone()])
    }

    pub fn except(&self, other: &Predicate) -> Self {
        Self::minus(self.clone(), other.clone())
    }

    /// Pass-through to the ids of a list.
    pub(crate) fn cached_list(ids: Arc<IdArray>) -> Self {
        Self::from_node(Node::CachedList(ids))
    }

    /// Wrap `inner` so that resources leaving its match set while the
    /// selection runs are kept in the result.
    pub(crate) fn snapshot(inner: Predicate) -> Self {
        Self::from_node(Node::Snapshot(Snapshot::new(inner)))
    }

    /// A new composite of the same kind with `extra` appended. The
    /// receiver is left untouched. None for non-composites.
    pub(crate) fn extended(&self, extra: Predicate) -> Option<Predicate> {
        let (members, intersection) = match self.node() {
            Node::Intersection(c) => (&c.members, true),
            Node::Union(c) => (&c.members, false),
            _ => return None,
        };
        let mut members = members.clone();
        members.push(extra);
        Some(if intersection { Self::intersection(members) } else { Self::union(members) })
    }

    pub(crate) fn is_intersection(&self) -> bool {
        matches!(self.node(), Node::Intersection(_))
    }
}

// ============================================================================
// Evaluation
// ============================================================================

impl Predicate {
    pub fn selection_cost(&self) -> u32 {
        match self.node() {
            Node::Single(_) => cost::SINGLE,
            Node::CachedList(_) => cost::CACHED_LIST,
            Node::Link { .. } => cost::LINK,
            Node::PropValue { .. } => cost::PROP_VALUE,
            Node::PropRange { .. } => cost::PROP_RANGE,
            Node::HasLink { .. } => cost::HAS_LINK,
            Node::HasProp(_) => cost::HAS_PROP,
            Node::Type(_) => cost::TYPE,
            Node::Intersection(c) => c.members.iter().map(Predicate::selection_cost).min().unwrap_or(0),
            Node::Union(c) => c.members.iter().map(Predicate::selection_cost).max().unwrap_or(0),
            Node::Minus { include, .. } => include.selection_cost(),
            Node::Snapshot(s) => s.inner().selection_cost(),
        }
    }

    /// The resource type every match is known to have, if any.
    pub fn known_type(&self) -> Option<ResourceTypeId> {
        match self.node() {
            Node::Type(t) => Some(*t),
            Node::Intersection(c) => c.members.iter().find_map(Predicate::known_type),
            Node::Union(c) => {
                let mut types = c.members.iter().map(Predicate::known_type);
                let first = types.next()??;
                types.all(|t| t == Some(first)).then_some(first)
            }
            Node::Minus { include, .. } => include.known_type(),
            Node::Snapshot(s) => s.inner().known_type(),
            _ => None,
        }
    }

    /// Every matching resource id, ascending.
    pub fn select(&self, store: &ResourceStore) -> Result<Vec<ResourceId>> {
        match self.node() {
            Node::Type(t) => leaf::select_type(store, *t),
            Node::PropValue { prop, value } => {
                leaf::select_scan(store, *prop, &ScanRange::Eq(value.clone()))
            }
            Node::PropRange { prop, lo, hi } => leaf::select_scan(
                store,
                *prop,
                &ScanRange::Range { lo: lo.clone(), hi: hi.clone() },
            ),
            Node::HasProp(prop) => leaf::select_scan(store, *prop, &ScanRange::All),
            Node::HasLink { prop, direction } => leaf::select_has_link(store, *prop, *direction),
            Node::Link { base, prop, direction } => link::select(store, *base, *prop, *direction),
            Node::Intersection(c) => c.select_intersection(store),
            Node::Union(c) => c.select_union(store),
            Node::Minus { include, exclude } => minus::select(store, include, exclude),
            Node::Single(id) => leaf::select_single(store, *id),
            Node::CachedList(ids) => Ok(ids.sorted_ids()),
            Node::Snapshot(s) => s.select(store),
        }
    }

    /// Whether `resource` matches right now.
    pub fn test(&self, store: &ResourceStore, resource: &Resource) -> Result<bool> {
        Ok(match self.node() {
            Node::Type(t) => resource.type_id() == *t,
            Node::PropValue { prop, value } => {
                leaf::value_matches(resource.get_prop(*prop)?.as_ref(), &ScanRange::Eq(value.clone()))
            }
            Node::PropRange { prop, lo, hi } => leaf::value_matches(
                resource.get_prop(*prop)?.as_ref(),
                &ScanRange::Range { lo: lo.clone(), hi: hi.clone() },
            ),
            Node::HasProp(prop) => resource.has_prop(*prop)?,
            Node::HasLink { prop, direction } => resource.link_count(*prop, *direction)? > 0,
            Node::Link { base, prop, direction } => link::test(store, resource, *base, *prop, *direction)?,
            Node::Intersection(c) => {
                for member in &c.members {
                    if !member.test(store, resource)? {
                        return Ok(false);
                    }
                }
                !c.members.is_empty()
            }
            Node::Union(c) => {
                for member in &c.members {
                    if member.test(store, resource)? {
                        return Ok(true);
                    }
                }
                false
            }
            Node::Minus { include, exclude } => {
                include.test(store, resource)? && !exclude.test(store, resource)?
            }
            Node::Single(id) => resource.original_id() == *id && !resource.is_deleted(),
            Node::CachedList(ids) => ids.contains(resource.original_id()),
            Node::Snapshot(s) => s.test(store, resource)?,
        })
    }

    /// Classify how `resource`'s membership moved with `changes`.
    pub fn match_resource(
        &self,
        store: &ResourceStore,
        resource: &Resource,
        changes: &ChangeSet,
    ) -> Result<PredicateMatch> {
        let (was, is) = self.transition(store, resource, changes)?;
        Ok(PredicateMatch::from_transition(was, is))
    }

    /// (matched before the update, matches now)
    pub(crate) fn transition(
        &self,
        store: &ResourceStore,
        resource: &Resource,
        changes: &ChangeSet,
    ) -> Result<(bool, bool)> {
        let fresh = changes.is_new_resource();
        match self.node() {
            Node::Type(t) => {
                let is = resource.type_id() == *t;
                let was = !fresh && changes.old_type().map_or(is, |old| old == *t);
                Ok((was, is))
            }
            Node::PropValue { prop, value } => {
                leaf::value_transition(resource, changes, *prop, &ScanRange::Eq(value.clone()))
            }
            Node::PropRange { prop, lo, hi } => leaf::value_transition(
                resource,
                changes,
                *prop,
                &ScanRange::Range { lo: lo.clone(), hi: hi.clone() },
            ),
            Node::HasProp(prop) => leaf::value_transition(resource, changes, *prop, &ScanRange::All),
            Node::HasLink { prop, direction } => {
                leaf::has_link_transition(store, resource, changes, *prop, *direction)
            }
            Node::Link { base, prop, direction } => {
                link::transition(store, resource, changes, *base, *prop, *direction)
            }
            Node::Intersection(c) => {
                let (mut was, mut is) = (!c.members.is_empty(), !c.members.is_empty());
                for member in &c.members {
                    let (w, i) = member.transition(store, resource, changes)?;
                    was &= w;
                    is &= i;
                }
                Ok((was, is))
            }
            Node::Union(c) => {
                let (mut was, mut is) = (false, false);
                for member in &c.members {
                    let (w, i) = member.transition(store, resource, changes)?;
                    was |= w;
                    is |= i;
                }
                Ok((was, is))
            }
            Node::Minus { include, exclude } => {
                let (lw, li) = include.transition(store, resource, changes)?;
                let (rw, ri) = exclude.transition(store, resource, changes)?;
                Ok((lw && !rw, li && !ri))
            }
            Node::Single(id) => {
                if resource.original_id() != *id {
                    return Ok((false, false));
                }
                Ok((!fresh, !resource.is_deleted()))
            }
            Node::CachedList(ids) => {
                let held = ids.contains(resource.original_id());
                Ok((held, held))
            }
            Node::Snapshot(s) => s.transition(store, resource, changes),
        }
    }
}
