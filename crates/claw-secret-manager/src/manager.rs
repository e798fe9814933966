//! Manager facade.
//!
//! This module provides the capability traits the node agent depends on,
//! [`SecretManager`] and [`ConfigMapManager`], and [`CacheBasedManager`],
//! the caching engine implementing them. The engine is parameterized by an
//! [`ObjectKind`] marker that selects which references of a workload it
//! tracks.
//!
//! Managers are plain values: the node agent constructs them at startup,
//! shares them as `Arc<dyn SecretManager>`, and calls
//! [`CacheBasedManager::shutdown`] when it stops.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::registry::WorkloadRegistry;
use crate::source::ObjectSource;
use crate::store::{ObjectStore, StoreStats};
use crate::types::{Object, ObjectKey, WorkloadId};
use crate::workload::Workload;

/// Retrieves secrets for workloads scheduled on this node.
pub trait SecretManager: Send + Sync {
    /// Returns the secret `name` in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no registered workload references the secret,
    /// or the error of fetching it from the remote store.
    fn get_secret(&self, namespace: &str, name: &str) -> Result<Arc<Object>>;

    /// Registers the secrets referenced by a workload.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` error if the reference bookkeeping is corrupt.
    fn register_pod(&self, workload: &Workload) -> Result<()>;

    /// Releases the secrets referenced by a workload. Unknown workloads are ignored.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` error if the reference bookkeeping is corrupt.
    fn unregister_pod(&self, workload: &Workload) -> Result<()>;

    /// Returns the workloads whose secrets should be refreshed proactively.
    fn get_pods_need_sync_objects(&self) -> Vec<WorkloadId>;
}

/// Retrieves config maps for workloads scheduled on this node.
pub trait ConfigMapManager: Send + Sync {
    /// Returns the config map `name` in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no registered workload references the config
    /// map, or the error of fetching it from the remote store.
    fn get_config_map(&self, namespace: &str, name: &str) -> Result<Arc<Object>>;

    /// Registers the config maps referenced by a workload.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` error if the reference bookkeeping is corrupt.
    fn register_pod(&self, workload: &Workload) -> Result<()>;

    /// Releases the config maps referenced by a workload. Unknown workloads are ignored.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` error if the reference bookkeeping is corrupt.
    fn unregister_pod(&self, workload: &Workload) -> Result<()>;

    /// Returns the workloads whose config maps should be refreshed proactively.
    fn get_pods_need_sync_objects(&self) -> Vec<WorkloadId>;
}

/// Selects which objects a [`CacheBasedManager`] tracks.
pub trait ObjectKind: Send + Sync + 'static {
    /// Name of the kind, used in logs.
    const NAME: &'static str;

    /// Returns the keys of the objects of this kind a workload references.
    fn referenced_keys(workload: &Workload) -> BTreeSet<ObjectKey>;
}

/// Secrets: volumes, projections, env, envFrom and image pull secrets.
#[derive(Debug, Clone, Copy, Default)]
pub struct Secrets;

impl ObjectKind for Secrets {
    const NAME: &'static str = "secret";

    fn referenced_keys(workload: &Workload) -> BTreeSet<ObjectKey> {
        workload.secret_keys()
    }
}

/// Config maps: volumes, projections, env and envFrom.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigMaps;

impl ObjectKind for ConfigMaps {
    const NAME: &'static str = "configmap";

    fn referenced_keys(workload: &Workload) -> BTreeSet<ObjectKey> {
        workload.config_map_keys()
    }
}

/// A manager serving objects from a reference-counted, TTL-bounded cache.
pub struct CacheBasedManager<K: ObjectKind> {
    store: Arc<ObjectStore>,
    registry: WorkloadRegistry,
    _kind: PhantomData<K>,
}

/// The caching secret manager.
pub type CachingSecretManager = CacheBasedManager<Secrets>;

/// The caching config map manager.
pub type CachingConfigMapManager = CacheBasedManager<ConfigMaps>;

impl<K: ObjectKind> CacheBasedManager<K> {
    /// Creates a manager fetching objects from `source`.
    #[must_use]
    pub fn new(source: Arc<dyn ObjectSource>, config: &ManagerConfig) -> Self {
        let store = Arc::new(ObjectStore::new(source, config));
        info!(
            kind = K::NAME,
            ttl_secs = config.ttl_secs,
            stale_policy = ?config.stale_policy,
            "created object manager"
        );
        Self {
            registry: WorkloadRegistry::new(Arc::clone(&store)),
            store,
            _kind: PhantomData,
        }
    }

    /// Returns the object `name` in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no registered workload references the object,
    /// or the error of fetching it.
    pub fn get_object(&self, namespace: &str, name: &str) -> Result<Arc<Object>> {
        self.store.get(&ObjectKey::new(namespace, name))
    }

    /// Registers or reconciles the references of a workload.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` error if the reference bookkeeping is corrupt.
    pub fn register_workload(&self, workload: &Workload) -> Result<()> {
        let keys = K::referenced_keys(workload);
        debug!(kind = K::NAME, uid = %workload.uid, keys = keys.len(), "registering workload");
        self.registry
            .register(&workload.uid, &workload.namespace, keys)
    }

    /// Releases the references of a workload.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` error if the reference bookkeeping is corrupt.
    pub fn unregister_workload(&self, workload: &Workload) -> Result<()> {
        self.registry.unregister(&workload.uid)
    }

    /// Returns the workloads with at least one object due for refresh.
    #[must_use]
    pub fn objects_needing_sync(&self) -> Vec<WorkloadId> {
        self.registry.due_for_sync()
    }

    /// Drops the cached payload of an object so the next read re-fetches it.
    ///
    /// Returns false if the object is not referenced by any workload.
    pub fn invalidate(&self, namespace: &str, name: &str) -> bool {
        self.store.invalidate(&ObjectKey::new(namespace, name))
    }

    /// Changes the refresh TTL, e.g. after reading the node's TTL annotation.
    pub fn set_ttl(&self, ttl: Duration) {
        self.store.set_ttl(ttl);
    }

    /// Returns the cache activity counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    /// Returns the workload reference registry.
    #[must_use]
    pub const fn registry(&self) -> &WorkloadRegistry {
        &self.registry
    }

    /// Releases every registration and evicts every cached object.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` error if the reference bookkeeping is corrupt.
    pub fn shutdown(&self) -> Result<()> {
        let released = self.registry.clear()?;
        info!(kind = K::NAME, workloads = released, "object manager shut down");
        Ok(())
    }
}

impl<K: ObjectKind> std::fmt::Debug for CacheBasedManager<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBasedManager")
            .field("kind", &K::NAME)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl SecretManager for CacheBasedManager<Secrets> {
    fn get_secret(&self, namespace: &str, name: &str) -> Result<Arc<Object>> {
        self.get_object(namespace, name)
    }

    fn register_pod(&self, workload: &Workload) -> Result<()> {
        self.register_workload(workload)
    }

    fn unregister_pod(&self, workload: &Workload) -> Result<()> {
        self.unregister_workload(workload)
    }

    fn get_pods_need_sync_objects(&self) -> Vec<WorkloadId> {
        self.objects_needing_sync()
    }
}

impl ConfigMapManager for CacheBasedManager<ConfigMaps> {
    fn get_config_map(&self, namespace: &str, name: &str) -> Result<Arc<Object>> {
        self.get_object(namespace, name)
    }

    fn register_pod(&self, workload: &Workload) -> Result<()> {
        self.register_workload(workload)
    }

    fn unregister_pod(&self, workload: &Workload) -> Result<()> {
        self.unregister_workload(workload)
    }

    fn get_pods_need_sync_objects(&self) -> Vec<WorkloadId> {
        self.objects_needing_sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::source::InMemorySource;
    use crate::workload::Container;

    fn secret_manager() -> (Arc<InMemorySource>, CachingSecretManager) {
        let source = Arc::new(InMemorySource::new());
        source.put(Object::new(ObjectKey::new("ns", "db-cred")).with_data("password", "pw"));
        source.put(Object::new(ObjectKey::new("ns", "api-key")).with_data("key", "k"));
        let manager = CachingSecretManager::new(
            Arc::clone(&source) as Arc<dyn ObjectSource>,
            &ManagerConfig::default(),
        );
        (source, manager)
    }

    #[test]
    fn register_extracts_secret_references() {
        let (_, manager) = secret_manager();
        let workload = Workload::new("w1", "ns")
            .with_secret_volume("db-cred")
            .with_container(Container::new("app").with_secret_env("KEY", "api-key", "key"));

        manager.register_workload(&workload).expect("register");

        assert_eq!(
            manager.store().list(),
            vec![ObjectKey::new("ns", "api-key"), ObjectKey::new("ns", "db-cred")]
        );
        assert!(manager.get_object("ns", "api-key").is_ok());
    }

    #[test]
    fn unregistered_lookup_is_not_found_without_fetch() {
        let (source, manager) = secret_manager();
        let result = manager.get_object("ns", "db-cred");
        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert_eq!(source.total_fetches(), 0);
    }

    #[test]
    fn config_map_manager_ignores_secrets() {
        let source = Arc::new(InMemorySource::new());
        source.put(Object::new(ObjectKey::new("ns", "settings")).with_data("mode", "prod"));
        let manager =
            CachingConfigMapManager::new(source as Arc<dyn ObjectSource>, &ManagerConfig::default());
        let workload = Workload::new("w1", "ns")
            .with_secret_volume("db-cred")
            .with_config_map_volume("settings");

        ConfigMapManager::register_pod(&manager, &workload).expect("register");

        assert_eq!(manager.store().list(), vec![ObjectKey::new("ns", "settings")]);
        let object = manager.get_config_map("ns", "settings").expect("get");
        assert_eq!(
            object.get("mode").map(|v| v.as_bytes().to_vec()),
            Some(b"prod".to_vec())
        );
    }

    #[test]
    fn invalidate_through_manager() {
        let (source, manager) = secret_manager();
        manager
            .register_workload(&Workload::new("w1", "ns").with_secret_volume("db-cred"))
            .expect("register");
        manager.get_object("ns", "db-cred").expect("get");

        assert!(manager.invalidate("ns", "db-cred"));
        assert!(!manager.invalidate("ns", "unknown"));
        manager.get_object("ns", "db-cred").expect("get again");

        assert_eq!(source.fetch_count(&ObjectKey::new("ns", "db-cred")), 2);
    }

    #[test]
    fn set_ttl_marks_objects_for_sync() {
        let (_, manager) = secret_manager();
        let workload = Workload::new("w1", "ns").with_secret_volume("db-cred");
        manager.register_workload(&workload).expect("register");
        manager.get_object("ns", "db-cred").expect("get");
        assert!(manager.objects_needing_sync().is_empty());

        manager.set_ttl(Duration::ZERO);

        assert_eq!(manager.objects_needing_sync(), vec![WorkloadId::new("w1")]);
    }

    #[test]
    fn shutdown_releases_everything() {
        let (_, manager) = secret_manager();
        manager
            .register_workload(&Workload::new("w1", "ns").with_secret_volume("db-cred"))
            .expect("w1");
        manager
            .register_workload(&Workload::new("w2", "ns").with_image_pull_secret("api-key"))
            .expect("w2");

        manager.shutdown().expect("shutdown");

        assert!(manager.registry().is_empty());
        assert!(manager.store().is_empty());
        assert_eq!(manager.stats().evictions, 2);
    }

    #[test]
    fn usable_as_trait_object() {
        let (_, manager) = secret_manager();
        let manager: Arc<dyn SecretManager> = Arc::new(manager);
        let workload = Workload::new("w1", "ns").with_secret_volume("db-cred");

        manager.register_pod(&workload).expect("register");
        assert_eq!(manager.get_pods_need_sync_objects(), vec![WorkloadId::new("w1")]);
        assert!(manager.get_secret("ns", "db-cred").is_ok());
        assert!(manager.get_pods_need_sync_objects().is_empty());
        manager.unregister_pod(&workload).expect("unregister");
        assert!(manager.get_secret("ns", "db-cred").is_err());
    }

    #[test]
    fn debug_names_the_kind() {
        let (_, manager) = secret_manager();
        assert!(format!("{manager:?}").contains("secret"));
    }
}
