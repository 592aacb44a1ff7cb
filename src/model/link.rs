//! Link direction and link slots.

use serde::{Deserialize, Serialize};
use super::PropId;

/// Which side of a link is being queried.
///
/// For undirected link types every direction addresses the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkDirection {
    /// Links this resource holds towards others (forward slot).
    Outgoing,
    /// Links others hold towards this resource (reverse slot).
    Incoming,
    Both,
}

impl LinkDirection {
    /// The same direction seen from the other endpoint.
    pub fn reversed(self) -> LinkDirection {
        match self {
            LinkDirection::Outgoing => LinkDirection::Incoming,
            LinkDirection::Incoming => LinkDirection::Outgoing,
            LinkDirection::Both => LinkDirection::Both,
        }
    }

    /// Fold a reverse slot id into its base id plus a flipped direction.
    pub fn normalize(self, prop: PropId) -> (PropId, LinkDirection) {
        if prop.is_reverse() { (prop.base(), self.reversed()) } else { (prop, self) }
    }

    /// Slots of `prop` covered by this direction.
    pub fn slots(self, prop: PropId, directed: bool) -> impl Iterator<Item = PropId> {
        let prop = prop.base();
        let (first, second) = match (directed, self) {
            (false, _) => (Some(prop), None),
            (true, LinkDirection::Outgoing) => (Some(prop), None),
            (true, LinkDirection::Incoming) => (Some(prop.reverse()), None),
            (true, LinkDirection::Both) => (Some(prop), Some(prop.reverse())),
        };
        first.into_iter().chain(second)
    }
}

/// A stored link record: `source` holds the forward slot of `prop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkRecord {
    pub source: super::ResourceId,
    pub prop: PropId,
    pub target: super::ResourceId,
}

impl LinkRecord {
    pub fn new(source: super::ResourceId, prop: PropId, target: super::ResourceId) -> Self {
        Self { source, prop: prop.base(), target }
    }

    /// The other endpoint of the link, seen from `from`.
    pub fn other(&self, from: super::ResourceId) -> Option<super::ResourceId> {
        if from == self.source { Some(self.target) }
        else if from == self.target { Some(self.source) }
        else { None }
    }
}
