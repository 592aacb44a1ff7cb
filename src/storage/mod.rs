//! # Storage Backend Trait
//!
//! The contract between the live-query engine and the record store that
//! actually holds resources, property records and link records.
//!
//! The engine only requires that records be independently scannable by
//! (resource id, property id), by property value, and by link type. How
//! they are laid out is the backend's business.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryBackend` | `memory` | In-memory B-tree tables for testing/embedding |
//!
//! ## Cursors
//!
//! Scans return owned cursors. A cursor may be dropped at any point without
//! affecting the tables it was read from, so callers can stop early.

pub mod memory;

use std::ops::Bound;

use crate::model::*;
use crate::Result;

pub use memory::MemoryBackend;

/// Owned iterator over scan results.
pub type ScanCursor<'a, T> = Box<dyn Iterator<Item = T> + Send + 'a>;

// ============================================================================
// Scan ranges
// ============================================================================

/// Value filter for a property scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanRange {
    /// Every resource carrying the property.
    All,
    /// Equality scan.
    Eq(PropValue),
    /// Range scan; values of incompatible types never match.
    Range { lo: Bound<PropValue>, hi: Bound<PropValue> },
}

impl ScanRange {
    pub fn contains(&self, value: &PropValue) -> bool {
        use std::cmp::Ordering::*;
        match self {
            ScanRange::All => true,
            ScanRange::Eq(v) => v == value || value.compare(v) == Some(Equal),
            ScanRange::Range { lo, hi } => {
                let above = match lo {
                    Bound::Unbounded => true,
                    Bound::Included(lo) => matches!(value.compare(lo), Some(Greater | Equal)),
                    Bound::Excluded(lo) => matches!(value.compare(lo), Some(Greater)),
                };
                let below = match hi {
                    Bound::Unbounded => true,
                    Bound::Included(hi) => matches!(value.compare(hi), Some(Less | Equal)),
                    Bound::Excluded(hi) => matches!(value.compare(hi), Some(Less)),
                };
                above && below
            }
        }
    }
}

// ============================================================================
// Backend capabilities
// ============================================================================

/// What a backend guarantees about its scans.
///
/// All fields default to false. Predicates sort scan output themselves
/// unless the backend promises id order.
#[derive(Debug, Clone, Default)]
pub struct BackendCapabilities {
    /// Property, type and link scans yield resource ids in ascending order.
    pub id_ordered_scans: bool,
    /// Deleting a resource record also drops its property and link records.
    pub cascading_delete: bool,
}

// ============================================================================
// StorageBackend Trait
// ============================================================================

/// The record-store contract.
///
/// All methods are synchronous: the engine calls them with no resource lock
/// held, from whichever thread performs the read or mutation.
pub trait StorageBackend: Send + Sync + 'static {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Flush and release backend resources.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    // ========================================================================
    // Resource records
    // ========================================================================

    /// Reserve a fresh resource id. Transient resources get one too.
    fn allocate_id(&self) -> Result<ResourceId>;

    /// Persist a resource record under a previously allocated id.
    fn create_resource(&self, id: ResourceId, type_id: ResourceTypeId) -> Result<()>;

    /// Type of a stored resource, or None if no record exists.
    fn resource_type(&self, id: ResourceId) -> Result<Option<ResourceTypeId>>;

    /// Change the type of a stored resource.
    fn set_resource_type(&self, id: ResourceId, type_id: ResourceTypeId) -> Result<()>;

    /// Remove a resource record. Returns true if it existed.
    fn delete_resource(&self, id: ResourceId) -> Result<bool>;

    /// Equality scan on the type table.
    fn resources_of_type(&self, type_id: ResourceTypeId) -> Result<ScanCursor<'_, ResourceId>>;

    /// Number of stored resources.
    fn resource_count(&self) -> Result<u64>;

    // ========================================================================
    // Property records
    // ========================================================================

    /// All property records of one resource whose values belong to `category`.
    ///
    /// The backend does not know the schema; it returns whatever records it
    /// holds and leaves validation to the caller.
    fn load_properties(
        &self,
        id: ResourceId,
        category: PropDataType,
    ) -> Result<Vec<(PropId, PropValue)>>;

    /// Single property record lookup.
    fn read_property(&self, id: ResourceId, prop: PropId) -> Result<Option<PropValue>>;

    /// Upsert a property record.
    fn write_property(&self, id: ResourceId, prop: PropId, value: &PropValue) -> Result<()>;

    /// Remove a property record. Returns true if it existed.
    fn delete_property(&self, id: ResourceId, prop: PropId) -> Result<bool>;

    /// Range/equality scan by property id and value.
    fn scan_property(
        &self,
        prop: PropId,
        range: &ScanRange,
    ) -> Result<ScanCursor<'_, (ResourceId, PropValue)>>;

    // ========================================================================
    // Link records
    // ========================================================================

    /// Link records where `id` is either endpoint.
    fn load_links(&self, id: ResourceId) -> Result<ScanCursor<'_, LinkRecord>>;

    /// All link records of one link type.
    fn scan_links(&self, prop: PropId) -> Result<ScanCursor<'_, LinkRecord>>;

    /// Store a link record. Returns false if it was already present.
    fn add_link(&self, link: LinkRecord) -> Result<bool>;

    /// Remove a link record. Returns true if it existed.
    fn delete_link(&self, link: LinkRecord) -> Result<bool>;

    // ========================================================================
    // Capability negotiation
    // ========================================================================

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_range_bounds() {
        let range = ScanRange::Range {
            lo: Bound::Included(PropValue::Int(10)),
            hi: Bound::Excluded(PropValue::Int(20)),
        };
        assert!(range.contains(&PropValue::Int(10)));
        assert!(range.contains(&PropValue::Double(19.5)));
        assert!(!range.contains(&PropValue::Int(20)));
        assert!(!range.contains(&PropValue::from("15")));
    }

    #[test]
    fn test_scan_range_eq_numeric() {
        let eq = ScanRange::Eq(PropValue::Int(3));
        assert!(eq.contains(&PropValue::Int(3)));
        assert!(eq.contains(&PropValue::Double(3.0)));
        assert!(!eq.contains(&PropValue::Int(4)));
    }
}
