//! # Resource Store
//!
//! Entry point of the engine. A store owns the storage backend handle, the
//! schema, the identity map of loaded resources and the notification hub,
//! and hands out resources and lists.
//!
//! The backend is injected at construction; nothing in the engine reaches
//! storage except through the handle held here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::cache::LongStringCache;
use crate::change_set::ChangeSet;
use crate::config::StoreConfig;
use crate::list::ResourceList;
use crate::model::*;
use crate::notify::{ChangeListener, NotificationHub, ResourceEvent, SubscriptionId};
use crate::predicate::Predicate;
use crate::resource::Resource;
use crate::restrictions::{NoRestrictions, RestrictionEnforcer};
use crate::schema::Schema;
use crate::storage::{BackendCapabilities, MemoryBackend, StorageBackend};
use crate::{Error, Result};

// ============================================================================
// Corruption reports
// ============================================================================

/// Kind of data-integrity problem found while reading storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorruptionKind {
    /// A record carries a property id the schema does not know.
    UnknownPropType,
    /// A record's value does not match its property's data type.
    TypeMismatch,
    /// A record refers to a resource or value that does not exist.
    MissingRecord,
}

/// A skipped record. Reads continue after reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionReport {
    pub resource: ResourceId,
    pub prop: Option<PropId>,
    pub kind: CorruptionKind,
}

type CorruptionCallback = Arc<dyn Fn(&CorruptionReport) + Send + Sync>;

// ============================================================================
// Shared state
// ============================================================================

pub(crate) struct StoreInner {
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) schema: Schema,
    pub(crate) config: StoreConfig,
    pub(crate) capabilities: BackendCapabilities,
    pub(crate) hub: NotificationHub,
    pub(crate) long_strings: Mutex<LongStringCache>,
    resources: RwLock<HashMap<ResourceId, Arc<Resource>>>,
    restrictions: RwLock<Arc<dyn RestrictionEnforcer>>,
    corruption: RwLock<Option<CorruptionCallback>>,
    closed: AtomicBool,
}

impl StoreInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn restrictions(&self) -> Arc<dyn RestrictionEnforcer> {
        self.restrictions.read().clone()
    }

    pub(crate) fn report_corruption(&self, report: CorruptionReport) {
        warn!(
            resource = report.resource.0,
            prop = ?report.prop,
            kind = ?report.kind,
            "index corruption: record skipped"
        );
        let callback = self.corruption.read().clone();
        if let Some(callback) = callback {
            callback(&report);
        }
    }

    /// The loaded resource with this id, loading it from storage if needed.
    pub(crate) fn resource(self: &Arc<Self>, id: ResourceId) -> Result<Option<Arc<Resource>>> {
        if let Some(resource) = self.resources.read().get(&id) {
            return Ok(Some(resource.clone()));
        }
        let Some(type_id) = self.backend.resource_type(id)? else {
            return Ok(None);
        };
        let mut resources = self.resources.write();
        let resource = resources
            .entry(id)
            .or_insert_with(|| Resource::new(self, id, type_id, false, false));
        Ok(Some(resource.clone()))
    }

    /// True if the loaded resource with this id is being deleted. Ids
    /// that were never loaded cannot be mid-deletion.
    pub(crate) fn is_deleting(&self, id: ResourceId) -> bool {
        self.resources.read().get(&id).is_some_and(|r| r.is_deleting())
    }

    pub(crate) fn evict(&self, id: ResourceId) {
        self.resources.write().remove(&id);
    }

    fn register(&self, resource: &Arc<Resource>) {
        self.resources.write().insert(resource.original_id(), resource.clone());
    }
}

// ============================================================================
// ResourceStore
// ============================================================================

/// Handle to one resource graph. Cheap to clone.
#[derive(Clone)]
pub struct ResourceStore {
    pub(crate) inner: Arc<StoreInner>,
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("loaded", &self.inner.resources.read().len())
            .field("subscribers", &self.inner.hub.subscriber_count())
            .finish()
    }
}

impl ResourceStore {
    /// Open a store over `backend`.
    pub fn open(backend: Arc<dyn StorageBackend>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(backend, config))
    }

    /// A store over a fresh [`MemoryBackend`] with default configuration.
    pub fn open_memory() -> Self {
        Self::build(Arc::new(MemoryBackend::new()), StoreConfig::default())
    }

    fn build(backend: Arc<dyn StorageBackend>, config: StoreConfig) -> Self {
        let capabilities = backend.capabilities();
        debug!(?capabilities, "opening resource store");
        Self {
            inner: Arc::new(StoreInner {
                long_strings: Mutex::new(LongStringCache::new(config.long_string_cache_bytes)),
                backend,
                schema: Schema::new(),
                config,
                capabilities,
                hub: NotificationHub::new(),
                resources: RwLock::new(HashMap::new()),
                restrictions: RwLock::new(Arc::new(NoRestrictions)),
                corruption: RwLock::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    /// Shut the backend down. Every later operation fails with `StoreClosed`.
    pub fn shutdown(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("shutting down resource store");
        self.inner.backend.shutdown()
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.inner.backend
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.is_closed() { Err(Error::StoreClosed) } else { Ok(()) }
    }
}

// ============================================================================
// Schema registration
// ============================================================================

impl ResourceStore {
    /// Register a value property type.
    pub fn register_prop_type(&self, name: &str, data_type: PropDataType) -> Result<PropId> {
        self.inner.schema.register_prop_type(name, data_type, false)
    }

    /// Register a link type. Directed types keep a separate reverse slot.
    pub fn register_link_type(&self, name: &str, directed: bool) -> Result<PropId> {
        self.inner.schema.register_prop_type(name, PropDataType::Link, directed)
    }

    /// Register a resource type whose display name joins `display_name_template`.
    pub fn register_resource_type(
        &self,
        name: &str,
        display_name_template: &[PropId],
    ) -> Result<ResourceTypeId> {
        self.inner.schema.register_resource_type(name, display_name_template)
    }
}

// ============================================================================
// Resources
// ============================================================================

impl ResourceStore {
    /// Create and announce an empty persistent resource.
    pub fn new_resource(&self, type_id: ResourceTypeId) -> Result<Arc<Resource>> {
        let resource = self.allocate(type_id)?;
        resource.record(&self.inner, ChangeSet::new_resource());
        Ok(resource)
    }

    /// Create a persistent resource and initialize it inside one update
    /// scope, so subscribers see a single "new resource" notification that
    /// already carries the initial values. If `init` fails the resource is
    /// deleted again.
    pub fn create_resource(
        &self,
        type_id: ResourceTypeId,
        init: impl FnOnce(&Resource) -> Result<()>,
    ) -> Result<Arc<Resource>> {
        let resource = self.allocate(type_id)?;
        resource.begin_update();
        resource.record(&self.inner, ChangeSet::new_resource());
        if let Err(err) = init(&resource) {
            resource.discard_updates();
            if let Err(cleanup) = resource.delete() {
                warn!(resource = resource.original_id().0, %cleanup, "failed to remove half-built resource");
            }
            return Err(err);
        }
        resource.end_update()?;
        Ok(resource)
    }

    /// Create a resource that lives only in memory until `persist` is called.
    pub fn new_transient(&self, type_id: ResourceTypeId) -> Result<Arc<Resource>> {
        self.check_open()?;
        self.inner.schema.require_resource_type(type_id)?;
        let id = self.inner.backend.allocate_id()?;
        let resource = Resource::new(&self.inner, id, type_id, true, true);
        self.inner.register(&resource);
        Ok(resource)
    }

    fn allocate(&self, type_id: ResourceTypeId) -> Result<Arc<Resource>> {
        self.check_open()?;
        self.inner.schema.require_resource_type(type_id)?;
        let id = self.inner.backend.allocate_id()?;
        // Registered before the record exists, so a concurrent scan that
        // finds the record resolves to this instance.
        let resource = Resource::new(&self.inner, id, type_id, false, true);
        self.inner.register(&resource);
        if let Err(err) = self.inner.backend.create_resource(id, type_id) {
            self.inner.evict(id);
            return Err(err);
        }
        Ok(resource)
    }

    /// Look a resource up by id. Returns None if it does not exist.
    pub fn resource(&self, id: ResourceId) -> Result<Option<Arc<Resource>>> {
        self.check_open()?;
        self.inner.resource(id)
    }

    /// Like [`resource`](Self::resource), but a missing resource is an error.
    pub fn get(&self, id: ResourceId) -> Result<Arc<Resource>> {
        self.resource(id)?
            .ok_or_else(|| Error::NotFound(format!("Resource {id}")))
    }

    /// Drop every cached long-string value; they reload from storage on demand.
    pub fn clear_long_string_cache(&self) {
        let mut cache = self.inner.long_strings.lock();
        *cache = LongStringCache::new(self.inner.config.long_string_cache_bytes);
    }
}

// ============================================================================
// Notifications, restrictions and integrity reports
// ============================================================================

impl ResourceStore {
    /// Receive every resource event until unsubscribed.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ResourceEvent) + Send + Sync + 'static,
    {
        self.inner.hub.subscribe(Arc::new(listener))
    }

    pub fn subscribe_listener(&self, listener: Arc<dyn ChangeListener>) -> SubscriptionId {
        self.inner.hub.subscribe(listener)
    }

    /// Idempotent; returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.hub.unsubscribe(id)
    }

    pub fn set_restrictions(&self, enforcer: Arc<dyn RestrictionEnforcer>) {
        *self.inner.restrictions.write() = enforcer;
    }

    /// Install the callback receiving data-integrity reports.
    pub fn on_index_corruption<F>(&self, callback: F)
    where
        F: Fn(&CorruptionReport) + Send + Sync + 'static,
    {
        *self.inner.corruption.write() = Some(Arc::new(callback));
    }
}

// ============================================================================
// Lists
// ============================================================================

impl ResourceStore {
    /// Wrap `predicate` in a list. The list is evaluated on first access.
    pub fn list(&self, predicate: Predicate, live: bool) -> ResourceList {
        ResourceList::new(self.clone(), predicate, live)
    }

    pub fn all_of_type(&self, type_id: ResourceTypeId, live: bool) -> ResourceList {
        self.list(Predicate::of_type(type_id), live)
    }

    /// Resources whose `prop` equals `value`.
    pub fn find(&self, prop: PropId, value: impl Into<PropValue>, live: bool) -> ResourceList {
        self.list(Predicate::prop_value(prop, value), live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_map() {
        let store = ResourceStore::open_memory();
        let file = store.register_resource_type("File", &[]).unwrap();
        let r = store.new_resource(file).unwrap();
        let again = store.get(r.id()).unwrap();
        assert!(Arc::ptr_eq(&r, &again));
        assert!(store.resource(ResourceId(9999)).unwrap().is_none());
        assert!(matches!(store.get(ResourceId(9999)), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let store = ResourceStore::open_memory();
        let err = store.new_resource(ResourceTypeId(42)).unwrap_err();
        assert!(matches!(err, Error::UnknownResourceType(_)));
    }

    #[test]
    fn test_create_resource_failure_rolls_back() {
        let store = ResourceStore::open_memory();
        let size = store.register_prop_type("Size", PropDataType::Int).unwrap();
        let file = store.register_resource_type("File", &[]).unwrap();
        let before = store.backend().resource_count().unwrap();

        let result = store.create_resource(file, |r| r.set_prop(size, "not a number"));
        assert!(result.is_err());
        assert_eq!(store.backend().resource_count().unwrap(), before);
    }

    #[test]
    fn test_shutdown_closes_store() {
        let store = ResourceStore::open_memory();
        let file = store.register_resource_type("File", &[]).unwrap();
        let r = store.new_resource(file).unwrap();
        store.shutdown().unwrap();
        assert!(matches!(store.new_resource(file), Err(Error::StoreClosed)));
        assert!(matches!(r.get_prop(PropId(1)), Err(Error::StoreClosed)));
    }

    #[test]
    fn test_open_rejects_bad_config() {
        let config = StoreConfig { intersection_fold_threshold: 0, ..StoreConfig::default() };
        let err = ResourceStore::open(Arc::new(MemoryBackend::new()), config).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
