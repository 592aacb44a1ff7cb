//! Property access and mutation.

use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::change_set::ChangeSet;
use crate::model::*;
use crate::store::{CorruptionKind, CorruptionReport, StoreInner};
use crate::{Error, Result};

use super::{Resource, Slot};

// ============================================================================
// Loading
// ============================================================================

impl Resource {
    /// Load every property of `category` on first touch. Records with an
    /// unknown property id or a value of the wrong type are reported and
    /// skipped.
    pub(crate) fn ensure_category(&self, store: &StoreInner, category: PropDataType) -> Result<()> {
        let bit = category.category_bit();
        if category == PropDataType::Link || self.state.lock().loaded & bit != 0 {
            return Ok(());
        }
        let records = store.backend.load_properties(self.original_id, category)?;

        let mut valid = Vec::with_capacity(records.len());
        for (prop, value) in records {
            let kind = match store.schema.prop_type(prop) {
                None => CorruptionKind::UnknownPropType,
                Some(def) if def.data_type != value.data_type() => CorruptionKind::TypeMismatch,
                Some(_) => {
                    valid.push((prop, value));
                    continue;
                }
            };
            store.report_corruption(CorruptionReport {
                resource: self.original_id,
                prop: Some(prop),
                kind,
            });
        }

        let mut long_strings = Vec::new();
        {
            let mut st = self.state.lock();
            if st.loaded & bit != 0 {
                return Ok(());
            }
            for (prop, value) in valid {
                let slot = match value {
                    PropValue::LongString(s) => {
                        long_strings.push((prop, s));
                        Slot::LongString
                    }
                    other => Slot::Value(other),
                };
                st.props.entry(prop).or_insert(slot);
            }
            st.loaded |= bit;
        }
        if !long_strings.is_empty() {
            let mut cache = store.long_strings.lock();
            for (prop, value) in long_strings {
                cache.insert(self.original_id, prop, value);
            }
        }
        Ok(())
    }

    /// Current value of a non-link property.
    pub(crate) fn load_value(
        &self,
        store: &StoreInner,
        prop: PropId,
        data_type: PropDataType,
    ) -> Result<Option<PropValue>> {
        self.ensure_category(store, data_type)?;
        {
            let st = self.state.lock();
            match st.props.get(&prop) {
                None => return Ok(None),
                Some(Slot::Value(v)) => return Ok(Some(v.clone())),
                Some(Slot::LongString) => {}
            }
        }
        Ok(self.long_string(store, prop)?.map(PropValue::LongString))
    }

    /// Long-string value through the store cache, reloading after eviction.
    fn long_string(&self, store: &StoreInner, prop: PropId) -> Result<Option<Arc<str>>> {
        if let Some(value) = store.long_strings.lock().get(self.original_id, prop) {
            return Ok(Some(value));
        }
        let value: Arc<str> = match store.backend.read_property(self.original_id, prop)? {
            Some(PropValue::LongString(s)) => s,
            Some(PropValue::String(s)) => Arc::from(s),
            found => {
                let kind = if found.is_some() {
                    CorruptionKind::TypeMismatch
                } else {
                    CorruptionKind::MissingRecord
                };
                store.report_corruption(CorruptionReport {
                    resource: self.original_id,
                    prop: Some(prop),
                    kind,
                });
                self.state.lock().props.remove(&prop);
                return Ok(None);
            }
        };
        store.long_strings.lock().insert(self.original_id, prop, value.clone());
        Ok(Some(value))
    }
}

// ============================================================================
// Reads
// ============================================================================

impl Resource {
    /// Value of `prop`, or None if unset. Links are not values; use
    /// [`links`](Resource::links) for them.
    pub fn get_prop(&self, prop: PropId) -> Result<Option<PropValue>> {
        let store = self.store_inner()?;
        let def = store.schema.require_prop_type(prop)?;
        if def.is_link() {
            return Ok(None);
        }
        self.load_value(&store, def.id, def.data_type)
    }

    fn typed(&self, prop: PropId, requested: PropDataType) -> Result<Option<PropValue>> {
        let store = self.store_inner()?;
        let def = store.schema.require_prop_type(prop)?;
        let compatible = def.data_type == requested
            || (requested == PropDataType::String && def.data_type == PropDataType::LongString);
        if !compatible {
            return Err(Error::WrongDataType { prop, expected: def.data_type, got: requested });
        }
        self.load_value(&store, def.id, def.data_type)
    }

    pub fn get_int(&self, prop: PropId) -> Result<Option<i64>> {
        Ok(self.typed(prop, PropDataType::Int)?.and_then(|v| v.as_int()))
    }

    /// Works for both string and long-string properties.
    pub fn get_string(&self, prop: PropId) -> Result<Option<String>> {
        Ok(self
            .typed(prop, PropDataType::String)?
            .and_then(|v| v.as_str().map(str::to_owned)))
    }

    pub fn get_double(&self, prop: PropId) -> Result<Option<f64>> {
        Ok(self.typed(prop, PropDataType::Double)?.and_then(|v| v.as_double()))
    }

    pub fn get_date(&self, prop: PropId) -> Result<Option<NaiveDateTime>> {
        Ok(self.typed(prop, PropDataType::Date)?.and_then(|v| v.as_date()))
    }

    pub fn get_bool(&self, prop: PropId) -> Result<Option<bool>> {
        Ok(self.typed(prop, PropDataType::Bool)?.and_then(|v| v.as_bool()))
    }

    pub fn get_blob(&self, prop: PropId) -> Result<Option<Arc<[u8]>>> {
        Ok(match self.typed(prop, PropDataType::Blob)? {
            Some(PropValue::Blob(b)) => Some(b),
            _ => None,
        })
    }

    pub fn get_string_list(&self, prop: PropId) -> Result<Option<Vec<String>>> {
        Ok(match self.typed(prop, PropDataType::StringList)? {
            Some(PropValue::StringList(l)) => Some(l),
            _ => None,
        })
    }

    /// Whether a non-link property is set. Does not fetch long strings.
    pub fn has_prop(&self, prop: PropId) -> Result<bool> {
        let store = self.store_inner()?;
        let def = store.schema.require_prop_type(prop)?;
        if def.is_link() {
            return Ok(false);
        }
        self.ensure_category(&store, def.data_type)?;
        Ok(self.state.lock().props.contains_key(&def.id))
    }

    /// Every set property, ordered by property id.
    pub fn properties(&self) -> Result<Vec<(PropId, PropValue)>> {
        let store = self.store_inner()?;
        for category in PropDataType::ALL {
            self.ensure_category(&store, category)?;
        }
        let mut ids: Vec<PropId> = self.state.lock().props.keys().copied().collect();
        ids.sort_unstable();

        let mut out = Vec::with_capacity(ids.len());
        for prop in ids {
            let Some(def) = store.schema.prop_type(prop) else { continue };
            if let Some(value) = self.load_value(&store, prop, def.data_type)? {
                out.push((prop, value));
            }
        }
        Ok(out)
    }

    /// Display name built from the resource type's template: non-empty
    /// values joined with single spaces.
    pub fn display_name(&self) -> Result<String> {
        if let Some(name) = self.state.lock().display_name.clone() {
            return Ok(name.to_string());
        }
        let store = self.store_inner()?;
        let mut parts = Vec::new();
        if let Some(ty) = store.schema.resource_type(self.type_id()) {
            for prop in &ty.display_name_template {
                if let Some(value) = self.get_prop(*prop)? {
                    let text = value.to_string();
                    if !text.is_empty() {
                        parts.push(text);
                    }
                }
            }
        }
        let name = parts.join(" ");
        self.state.lock().display_name = Some(Arc::from(name.as_str()));
        Ok(name)
    }
}

// ============================================================================
// Writes
// ============================================================================

impl Resource {
    /// Set a property.
    ///
    /// Writing the value already held is a no-op, except for blobs, which
    /// are always rewritten. Writing the minimum date deletes the property.
    /// A plain string written to a long-string property is stored as a
    /// long string.
    pub fn set_prop(&self, prop: PropId, value: impl Into<PropValue>) -> Result<()> {
        self.check_alive()?;
        let store = self.store_inner()?;
        let def = store.schema.require_prop_type(prop)?;
        let prop = def.id;

        let value = match (def.data_type, value.into()) {
            (PropDataType::LongString, PropValue::String(s)) => PropValue::LongString(Arc::from(s)),
            (_, value) => value,
        };
        if def.data_type == PropDataType::Date && value.is_min_date() {
            return self.delete_prop(prop);
        }
        if def.is_link() || value.data_type() != def.data_type {
            return Err(Error::WrongDataType { prop, expected: def.data_type, got: value.data_type() });
        }

        let old = self.load_value(&store, prop, def.data_type)?;
        if def.data_type != PropDataType::Blob && old.as_ref() == Some(&value) {
            return Ok(());
        }
        store.restrictions().check_property(self, prop, Some(&value))?;

        let persistent = !self.is_transient();
        if persistent {
            store.backend.write_property(self.original_id, prop, &value)?;
        }
        let cached = match &value {
            PropValue::LongString(s) if persistent => Some(s.clone()),
            _ => None,
        };
        {
            let mut st = self.state.lock();
            let slot = if cached.is_some() { Slot::LongString } else { Slot::Value(value) };
            st.props.insert(prop, slot);
        }
        if let Some(s) = cached {
            store.long_strings.lock().insert(self.original_id, prop, s);
        }

        let affected = store.schema.affects_display_name(self.type_id(), prop);
        self.record(&store, ChangeSet::property(prop, old, affected));
        Ok(())
    }

    /// Remove a property. On a link type this removes every link of that type.
    pub fn delete_prop(&self, prop: PropId) -> Result<()> {
        self.check_alive()?;
        let store = self.store_inner()?;
        let def = store.schema.require_prop_type(prop)?;
        if def.is_link() {
            return self.delete_links(def.id);
        }
        let prop = def.id;

        let old = self.load_value(&store, prop, def.data_type)?;
        if old.is_none() {
            return Ok(());
        }
        store.restrictions().check_property(self, prop, None)?;

        if !self.is_transient() {
            store.backend.delete_property(self.original_id, prop)?;
        }
        self.state.lock().props.remove(&prop);
        store.long_strings.lock().invalidate(self.original_id, prop);

        let affected = store.schema.affects_display_name(self.type_id(), prop);
        self.record(&store, ChangeSet::property(prop, old, affected));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use crate::notify::ResourceEvent;
    use crate::{CorruptionKind, ResourceStore};

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_set_get_and_wrong_type() {
        let store = ResourceStore::open_memory();
        let name = store.register_prop_type("Name", PropDataType::String).unwrap();
        let size = store.register_prop_type("Size", PropDataType::Int).unwrap();
        let file = store.register_resource_type("File", &[name]).unwrap();
        let r = store.new_resource(file).unwrap();

        r.set_prop(name, "a.txt").unwrap();
        r.set_prop(size, 12).unwrap();
        assert_eq!(r.get_string(name).unwrap(), Some("a.txt".to_owned()));
        assert_eq!(r.get_int(size).unwrap(), Some(12));

        let err = r.get_int(name).unwrap_err();
        assert!(matches!(err, Error::WrongDataType { .. }));
        assert!(err.is_programmer_error());
        assert!(matches!(r.set_prop(size, "twelve"), Err(Error::WrongDataType { .. })));
    }

    #[test]
    fn test_equal_write_is_silent_but_blob_is_not() {
        let store = ResourceStore::open_memory();
        let name = store.register_prop_type("Name", PropDataType::String).unwrap();
        let data = store.register_prop_type("Data", PropDataType::Blob).unwrap();
        let file = store.register_resource_type("File", &[]).unwrap();
        let r = store.new_resource(file).unwrap();
        r.set_prop(name, "x").unwrap();
        r.set_prop(data, vec![1u8, 2]).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        store.subscribe(move |_: &ResourceEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        r.set_prop(name, "x").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        r.set_prop(data, vec![1u8, 2]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_min_date_deletes() {
        let store = ResourceStore::open_memory();
        let due = store.register_prop_type("Due", PropDataType::Date).unwrap();
        let task = store.register_resource_type("Task", &[]).unwrap();
        let r = store.new_resource(task).unwrap();

        r.set_prop(due, date(2024, 5, 1)).unwrap();
        assert_eq!(r.get_date(due).unwrap(), Some(date(2024, 5, 1)));
        r.set_prop(due, NaiveDateTime::MIN).unwrap();
        assert_eq!(r.get_date(due).unwrap(), None);
        assert!(!r.has_prop(due).unwrap());
    }

    #[test]
    fn test_long_string_survives_cache_eviction() {
        let store = ResourceStore::open_memory();
        let body = store.register_prop_type("Body", PropDataType::LongString).unwrap();
        let mail = store.register_resource_type("Mail", &[]).unwrap();
        let r = store.new_resource(mail).unwrap();

        r.set_prop(body, "hello world").unwrap();
        store.clear_long_string_cache();
        assert_eq!(r.get_string(body).unwrap(), Some("hello world".to_owned()));
        assert_eq!(
            r.get_prop(body).unwrap().map(|v| v.data_type()),
            Some(PropDataType::LongString)
        );
    }

    #[test]
    fn test_display_name_invalidated() {
        let store = ResourceStore::open_memory();
        let first = store.register_prop_type("First", PropDataType::String).unwrap();
        let last = store.register_prop_type("Last", PropDataType::String).unwrap();
        let person = store.register_resource_type("Person", &[first, last]).unwrap();
        let r = store
            .create_resource(person, |r| r.set_prop(first, "Ada"))
            .unwrap();

        assert_eq!(r.display_name().unwrap(), "Ada");
        r.set_prop(last, "Lovelace").unwrap();
        assert_eq!(r.display_name().unwrap(), "Ada Lovelace");
    }

    #[test]
    fn test_unknown_property_record_reported() {
        let store = ResourceStore::open_memory();
        let size = store.register_prop_type("Size", PropDataType::Int).unwrap();
        let file = store.register_resource_type("File", &[]).unwrap();

        let backend = store.backend().clone();
        let id = backend.allocate_id().unwrap();
        backend.create_resource(id, file).unwrap();
        backend.write_property(id, size, &PropValue::Int(3)).unwrap();
        backend.write_property(id, PropId(99), &PropValue::Int(4)).unwrap();

        let reports = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = reports.clone();
        store.on_index_corruption(move |report| sink.lock().push(report.clone()));

        let r = store.get(id).unwrap();
        assert_eq!(r.get_int(size).unwrap(), Some(3));
        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].prop, Some(PropId(99)));
        assert_eq!(reports[0].kind, CorruptionKind::UnknownPropType);
    }

    #[test]
    fn test_properties_listing() {
        let store = ResourceStore::open_memory();
        let a = store.register_prop_type("A", PropDataType::Int).unwrap();
        let b = store.register_prop_type("B", PropDataType::Bool).unwrap();
        let t = store.register_resource_type("T", &[]).unwrap();
        let r = store.new_resource(t).unwrap();
        r.set_prop(b, true).unwrap();
        r.set_prop(a, 1).unwrap();

        assert_eq!(
            r.properties().unwrap(),
            vec![(a, PropValue::Int(1)), (b, PropValue::Bool(true))]
        );
        r.delete_prop(a).unwrap();
        assert_eq!(r.properties().unwrap(), vec![(b, PropValue::Bool(true))]);
    }
}
