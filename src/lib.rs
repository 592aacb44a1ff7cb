//! # livestore: Live Queries over an In-Memory Resource Graph
//!
//! A graph of typed resources connected by typed links, queried through
//! composable predicates whose results are kept up to date as the graph
//! mutates.
//!
//! ## Design Principles
//!
//! 1. **Trait-first storage**: `StorageBackend` is the contract between the
//!    engine and the record store; nothing reaches storage any other way
//! 2. **Lazy resources**: property categories and links load on first touch
//! 3. **Closed predicate algebra**: one sum type, every rewrite rule in one place
//! 4. **Incremental lists**: a live list never re-runs its query; it reacts to
//!    change sets broadcast after each mutation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use livestore::{LinkDirection, Predicate, PropDataType, ResourceStore};
//!
//! # fn example() -> livestore::Result<()> {
//! let store = ResourceStore::open_memory();
//! let name = store.register_prop_type("Name", PropDataType::String)?;
//! let parent = store.register_link_type("Parent", true)?;
//! let folder = store.register_resource_type("Folder", &[name])?;
//!
//! let root = store.create_resource(folder, |r| r.set_prop(name, "root"))?;
//! let children = store.list(Predicate::link(root.id(), parent, LinkDirection::Both), true);
//!
//! let child = store.create_resource(folder, |r| r.set_prop(name, "child"))?;
//! child.add_link(parent, &root)?;
//! assert_eq!(children.len()?, 1);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod storage;
pub mod config;
pub mod schema;
pub mod change_set;
pub mod notify;
pub mod restrictions;
pub mod resource;
pub mod predicate;
pub mod list;
pub mod store;

mod cache;
mod sync;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    LinkDirection, LinkRecord, PropDataType, PropId, PropType, PropValue,
    ResourceId, ResourceType, ResourceTypeId,
};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{BackendCapabilities, MemoryBackend, ScanCursor, ScanRange, StorageBackend};

// ============================================================================
// Re-exports: Engine
// ============================================================================

pub use config::StoreConfig;
pub use schema::Schema;
pub use change_set::{ChangeSet, LinkChange, LinkChangeKind};
pub use notify::{ChangeListener, EventKind, ResourceEvent, SubscriptionId};
pub use restrictions::{CardinalityRestrictions, NoRestrictions, RestrictionEnforcer, RestrictionViolation};
pub use resource::Resource;
pub use predicate::{Predicate, PredicateMatch};
pub use list::{ListEvent, ListEventKind, ListenerId, ResourceComparer, ResourceList, SortField, SortKey, SortOrder};
pub use store::{CorruptionKind, CorruptionReport, ResourceStore};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Wrong data type for property {prop}: expected {expected}, got {got}")]
    WrongDataType { prop: PropId, expected: PropDataType, got: PropDataType },

    #[error("Property {0} is not a link type")]
    NotALinkProperty(PropId),

    #[error("Resource {0} cannot link to itself")]
    SelfLink(ResourceId),

    #[error("Cannot link resource {from} to deleted resource {to}")]
    LinkToDeleted { from: ResourceId, to: ResourceId },

    #[error("Resource {0} is being deleted")]
    ResourceDeleting(ResourceId),

    #[error("Resource {0} has been deleted")]
    ResourceDeleted(ResourceId),

    #[error("Unknown property type: {0}")]
    UnknownPropType(String),

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    #[error("end_update on resource {0} without a matching begin_update")]
    UnbalancedUpdate(ResourceId),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Restriction(#[from] RestrictionViolation),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Store has been closed")]
    StoreClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl Error {
    /// Misuse of the API. These are never retried and never recovered
    /// internally; the caller has a bug.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Error::WrongDataType { .. }
                | Error::NotALinkProperty(_)
                | Error::SelfLink(_)
                | Error::LinkToDeleted { .. }
                | Error::ResourceDeleted(_)
                | Error::UnknownPropType(_)
                | Error::UnknownResourceType(_)
                | Error::UnbalancedUpdate(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
