//! No-op managers.
//!
//! These satisfy the manager traits without any bookkeeping or fetching.
//! They exist to isolate workload-lifecycle tests from caching behaviour and
//! must not be used as a caching strategy.

use std::sync::Arc;

use crate::error::Result;
use crate::manager::{ConfigMapManager, SecretManager};
use crate::types::{Object, ObjectKey, WorkloadId};
use crate::workload::Workload;

/// A [`SecretManager`] that stores nothing and returns empty secrets.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSecretManager;

impl NoopSecretManager {
    /// Creates a no-op secret manager.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SecretManager for NoopSecretManager {
    fn get_secret(&self, namespace: &str, name: &str) -> Result<Arc<Object>> {
        Ok(Arc::new(Object::new(ObjectKey::new(namespace, name))))
    }

    fn register_pod(&self, _workload: &Workload) -> Result<()> {
        Ok(())
    }

    fn unregister_pod(&self, _workload: &Workload) -> Result<()> {
        Ok(())
    }

    fn get_pods_need_sync_objects(&self) -> Vec<WorkloadId> {
        Vec::new()
    }
}

/// A [`ConfigMapManager`] that stores nothing and returns empty config maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConfigMapManager;

impl NoopConfigMapManager {
    /// Creates a no-op config map manager.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ConfigMapManager for NoopConfigMapManager {
    fn get_config_map(&self, namespace: &str, name: &str) -> Result<Arc<Object>> {
        Ok(Arc::new(Object::new(ObjectKey::new(namespace, name))))
    }

    fn register_pod(&self, _workload: &Workload) -> Result<()> {
        Ok(())
    }

    fn unregister_pod(&self, _workload: &Workload) -> Result<()> {
        Ok(())
    }

    fn get_pods_need_sync_objects(&self) -> Vec<WorkloadId> {
        Vec::new()
    }
}
