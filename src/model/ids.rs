//! Identifiers for resources, resource types and property types.

use serde::{Deserialize, Serialize};

/// Stable resource identifier.
///
/// Ids are allocated by the storage backend and never reused while the
/// resource is alive. A deleted resource reports [`ResourceId::DELETED`]
/// from [`Resource::id`](crate::Resource::id); its original id stays
/// available through `Resource::original_id` for readers still holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub i32);

impl ResourceId {
    /// Sentinel carried by resources that have been removed.
    pub const DELETED: ResourceId = ResourceId(-1);

    pub fn is_deleted(self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Property type identifier.
///
/// Registered property ids are always positive. For directed link types
/// the negated id addresses the reverse link slot of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropId(pub i32);

impl PropId {
    /// The opposite link slot of the same link type.
    pub fn reverse(self) -> PropId {
        PropId(-self.0)
    }

    pub fn is_reverse(self) -> bool {
        self.0 < 0
    }

    /// The registered (positive) id, whichever slot this addresses.
    pub fn base(self) -> PropId {
        PropId(self.0.abs())
    }
}

impl std::fmt::Display for PropId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceTypeId(pub i32);

impl std::fmt::Display for ResourceTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_slot() {
        let p = PropId(7);
        assert_eq!(p.reverse(), PropId(-7));
        assert!(p.reverse().is_reverse());
        assert_eq!(p.reverse().base(), p);
        assert_eq!(p.reverse().reverse(), p);
    }

    #[test]
    fn test_deleted_sentinel() {
        assert!(ResourceId::DELETED.is_deleted());
        assert!(!ResourceId(0).is_deleted());
    }
}
