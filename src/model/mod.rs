//! # Resource Graph Model
//!
//! Plain data shared by storage, resources, predicates and lists:
//! identifiers, typed property values, link records and schema definitions.
//!
//! Design rule: no locks, no I/O, no store handles here.

pub mod ids;
pub mod link;
pub mod schema;
pub mod value;

pub use ids::{PropId, ResourceId, ResourceTypeId};
pub use link::{LinkDirection, LinkRecord};
pub use schema::{PropType, ResourceType};
pub use value::{PropDataType, PropValue};
