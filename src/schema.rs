//! Property type and resource type registry.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::model::*;
use crate::{Error, Result};

/// Registry of property types and resource types.
///
/// Registration is idempotent by name. Ids are handed out sequentially
/// starting at 1; property id 0 is never used so that negation always
/// addresses a distinct reverse slot.
pub struct Schema {
    inner: RwLock<SchemaInner>,
}

#[derive(Default)]
struct SchemaInner {
    props: HashMap<PropId, Arc<PropType>>,
    prop_names: HashMap<String, PropId>,
    types: HashMap<ResourceTypeId, Arc<ResourceType>>,
    type_names: HashMap<String, ResourceTypeId>,
}

impl Schema {
    pub fn new() -> Self {
        Self { inner: RwLock::new(SchemaInner::default()) }
    }

    /// Register a property type. Re-registering the same name with the same
    /// data type and direction returns the existing id.
    pub fn register_prop_type(
        &self,
        name: &str,
        data_type: PropDataType,
        directed: bool,
    ) -> Result<PropId> {
        let mut inner = self.inner.write();
        if let Some(id) = inner.prop_names.get(name) {
            let existing = &inner.props[id];
            if existing.data_type != data_type || existing.directed != directed {
                return Err(Error::SchemaConflict(format!(
                    "property '{name}' already registered as {}{}",
                    existing.data_type,
                    if existing.directed { " (directed)" } else { "" },
                )));
            }
            return Ok(*id);
        }

        let id = PropId(inner.props.len() as i32 + 1);
        let def = PropType {
            id,
            name: name.to_owned(),
            data_type,
            directed: directed && data_type == PropDataType::Link,
        };
        inner.props.insert(id, Arc::new(def));
        inner.prop_names.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Register a resource type whose display name is built from `template`.
    pub fn register_resource_type(&self, name: &str, template: &[PropId]) -> Result<ResourceTypeId> {
        let mut inner = self.inner.write();
        for prop in template {
            match inner.props.get(prop) {
                Some(def) if !def.is_link() => {}
                Some(_) => {
                    return Err(Error::SchemaConflict(format!(
                        "display name of '{name}' cannot use link {prop}"
                    )));
                }
                None => return Err(Error::UnknownPropType(prop.to_string())),
            }
        }
        if let Some(id) = inner.type_names.get(name) {
            let existing = &inner.types[id];
            if existing.display_name_template != template {
                return Err(Error::SchemaConflict(format!(
                    "resource type '{name}' already registered with another display name template"
                )));
            }
            return Ok(*id);
        }

        let id = ResourceTypeId(inner.types.len() as i32 + 1);
        inner.types.insert(id, Arc::new(ResourceType {
            id,
            name: name.to_owned(),
            display_name_template: template.to_vec(),
        }));
        inner.type_names.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Definition of a property type; reverse slot ids resolve to their base type.
    pub fn prop_type(&self, id: PropId) -> Option<Arc<PropType>> {
        self.inner.read().props.get(&id.base()).cloned()
    }

    /// Like `prop_type`, but an unknown id is an error.
    pub fn require_prop_type(&self, id: PropId) -> Result<Arc<PropType>> {
        self.prop_type(id).ok_or_else(|| Error::UnknownPropType(id.to_string()))
    }

    /// Like `require_prop_type`, but the property must be a link type.
    pub fn require_link_type(&self, id: PropId) -> Result<Arc<PropType>> {
        let def = self.require_prop_type(id)?;
        if def.is_link() { Ok(def) } else { Err(Error::NotALinkProperty(id)) }
    }

    pub fn prop_id(&self, name: &str) -> Option<PropId> {
        self.inner.read().prop_names.get(name).copied()
    }

    pub fn resource_type(&self, id: ResourceTypeId) -> Option<Arc<ResourceType>> {
        self.inner.read().types.get(&id).cloned()
    }

    pub fn require_resource_type(&self, id: ResourceTypeId) -> Result<Arc<ResourceType>> {
        self.resource_type(id).ok_or_else(|| Error::UnknownResourceType(id.to_string()))
    }

    pub fn resource_type_id(&self, name: &str) -> Option<ResourceTypeId> {
        self.inner.read().type_names.get(name).copied()
    }

    /// Whether changing `prop` on a resource of `type_id` invalidates its display name.
    pub fn affects_display_name(&self, type_id: ResourceTypeId, prop: PropId) -> bool {
        self.inner
            .read()
            .types
            .get(&type_id)
            .is_some_and(|t| t.affects_display_name(prop))
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let schema = Schema::new();
        let a = schema.register_prop_type("Name", PropDataType::String, false).unwrap();
        let b = schema.register_prop_type("Name", PropDataType::String, false).unwrap();
        assert_eq!(a, b);
        assert_eq!(schema.prop_id("Name"), Some(a));
    }

    #[test]
    fn test_conflicting_registration() {
        let schema = Schema::new();
        schema.register_prop_type("Size", PropDataType::Int, false).unwrap();
        let err = schema.register_prop_type("Size", PropDataType::String, false).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict(_)));
    }

    #[test]
    fn test_directed_only_for_links() {
        let schema = Schema::new();
        let p = schema.register_prop_type("Flag", PropDataType::Bool, true).unwrap();
        assert!(!schema.prop_type(p).unwrap().directed);
        let l = schema.register_prop_type("Parent", PropDataType::Link, true).unwrap();
        assert!(schema.prop_type(l.reverse()).unwrap().directed);
    }

    #[test]
    fn test_display_template_validation() {
        let schema = Schema::new();
        let name = schema.register_prop_type("Name", PropDataType::String, false).unwrap();
        let link = schema.register_prop_type("Parent", PropDataType::Link, true).unwrap();

        let folder = schema.register_resource_type("Folder", &[name]).unwrap();
        assert!(schema.affects_display_name(folder, name));
        assert!(schema.register_resource_type("Bad", &[link]).is_err());
        assert!(schema.register_resource_type("Worse", &[PropId(99)]).is_err());
    }

    #[test]
    fn test_require_link_type() {
        let schema = Schema::new();
        let name = schema.register_prop_type("Name", PropDataType::String, false).unwrap();
        assert!(matches!(schema.require_link_type(name), Err(Error::NotALinkProperty(_))));
    }
}
