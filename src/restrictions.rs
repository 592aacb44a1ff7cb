//! Restriction enforcement boundary.
//!
//! Link cardinality and uniqueness rules are owned by an external
//! collaborator. The engine calls it synchronously before applying a
//! mutation, with no resource lock held; a violation aborts the mutation
//! and surfaces as [`Error::Restriction`](crate::Error::Restriction).

use hashbrown::HashMap;

use crate::model::{LinkDirection, PropId, PropValue, ResourceId};
use crate::resource::Resource;

/// A rule rejected a mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Restriction violated on resource {resource}: {message}")]
pub struct RestrictionViolation {
    pub resource: ResourceId,
    pub prop: Option<PropId>,
    pub message: String,
}

/// Validation hooks invoked before mutations. Every hook defaults to allow.
pub trait RestrictionEnforcer: Send + Sync {
    /// `source` is about to gain a forward link of type `prop` to `target`.
    fn check_link(
        &self,
        _source: &Resource,
        _prop: PropId,
        _target: &Resource,
    ) -> Result<(), RestrictionViolation> {
        Ok(())
    }

    /// The forward link `source -prop-> target` is about to be removed.
    /// Not consulted while a resource is being deleted.
    fn check_unlink(
        &self,
        _source: &Resource,
        _prop: PropId,
        _target: &Resource,
    ) -> Result<(), RestrictionViolation> {
        Ok(())
    }

    /// `prop` is about to be set (`Some`) or removed (`None`).
    fn check_property(
        &self,
        _resource: &Resource,
        _prop: PropId,
        _value: Option<&PropValue>,
    ) -> Result<(), RestrictionViolation> {
        Ok(())
    }

    /// `resource` is about to be deleted.
    fn check_delete(&self, _resource: &Resource) -> Result<(), RestrictionViolation> {
        Ok(())
    }
}

/// Enforcer that allows everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRestrictions;

impl RestrictionEnforcer for NoRestrictions {}

/// Upper bounds on the number of outgoing links per link type.
#[derive(Debug, Default, Clone)]
pub struct CardinalityRestrictions {
    max_outgoing: HashMap<PropId, usize>,
}

impl CardinalityRestrictions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_outgoing(mut self, prop: PropId, max: usize) -> Self {
        self.max_outgoing.insert(prop.base(), max);
        self
    }
}

impl RestrictionEnforcer for CardinalityRestrictions {
    fn check_link(
        &self,
        source: &Resource,
        prop: PropId,
        target: &Resource,
    ) -> Result<(), RestrictionViolation> {
        let Some(&max) = self.max_outgoing.get(&prop.base()) else {
            return Ok(());
        };
        let current = source.links(prop, LinkDirection::Outgoing).unwrap_or_default();
        if current.contains(&target.original_id()) || current.len() < max {
            return Ok(());
        }
        Err(RestrictionViolation {
            resource: source.original_id(),
            prop: Some(prop),
            message: format!("at most {max} outgoing links of type {prop} allowed"),
        })
    }
}
