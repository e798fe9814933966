//! Sources of objects.
//!
//! This module provides the [`ObjectSource`] trait through which the store
//! fetches objects from the cluster, and [`InMemorySource`], a source backed
//! by a map that is used in tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::{Object, ObjectKey};

/// A remote store that objects are fetched from.
///
/// Implementors perform a synchronous point lookup. They should map a missing
/// object to [`Error::NotFound`], a denied request to [`Error::Forbidden`] and
/// any network or server failure to [`Error::Transient`].
pub trait ObjectSource: Send + Sync {
    /// Fetches the current version of an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is absent, access is denied, or the
    /// remote store cannot be reached.
    fn fetch(&self, key: &ObjectKey) -> Result<Object>;
}

/// A configured failure returned instead of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Respond with [`Error::Forbidden`].
    Forbidden,
    /// Respond with [`Error::Transient`].
    Transient,
}

/// An [`ObjectSource`] backed by an in-memory map.
///
/// Every call to [`ObjectSource::fetch`] is counted, per key and in total.
#[derive(Debug, Default)]
pub struct InMemorySource {
    objects: RwLock<HashMap<ObjectKey, Object>>,
    failures: RwLock<HashMap<ObjectKey, InjectedFailure>>,
    fetch_counts: RwLock<HashMap<ObjectKey, u64>>,
    total_fetches: AtomicU64,
    latency: RwLock<Duration>,
}

impl InMemorySource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an object.
    pub fn put(&self, object: Object) {
        self.objects.write().insert(object.key().clone(), object);
    }

    /// Removes an object. Subsequent fetches return `NotFound`.
    pub fn remove(&self, key: &ObjectKey) -> Option<Object> {
        self.objects.write().remove(key)
    }

    /// Makes fetches of `key` fail until [`Self::clear_failure`] is called.
    pub fn fail(&self, key: &ObjectKey, failure: InjectedFailure) {
        self.failures.write().insert(key.clone(), failure);
    }

    /// Stops failing fetches of `key`.
    pub fn clear_failure(&self, key: &ObjectKey) {
        self.failures.write().remove(key);
    }

    /// Delays every fetch by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Returns how many times `key` has been fetched.
    #[must_use]
    pub fn fetch_count(&self, key: &ObjectKey) -> u64 {
        self.fetch_counts.read().get(key).copied().unwrap_or(0)
    }

    /// Returns the total number of fetches.
    #[must_use]
    pub fn total_fetches(&self) -> u64 {
        self.total_fetches.load(Ordering::SeqCst)
    }
}

impl ObjectSource for InMemorySource {
    fn fetch(&self, key: &ObjectKey) -> Result<Object> {
        self.total_fetches.fetch_add(1, Ordering::SeqCst);
        *self.fetch_counts.write().entry(key.clone()).or_insert(0) += 1;

        let latency = *self.latency.read();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        if let Some(failure) = self.failures.read().get(key).copied() {
            return Err(match failure {
                InjectedFailure::Forbidden => Error::Forbidden {
                    key: key.to_string(),
                    reason: "injected forbidden response".to_string(),
                },
                InjectedFailure::Transient => Error::Transient {
                    key: key.to_string(),
                    reason: "injected connection failure".to_string(),
                },
            });
        }

        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                key: key.to_string(),
                reason: "object does not exist in the remote store".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("ns", name)
    }

    #[test]
    fn fetch_returns_stored_object() {
        let source = InMemorySource::new();
        source.put(Object::new(key("db-cred")).with_data("password", "pw"));

        let object = source.fetch(&key("db-cred")).expect("fetch");
        assert_eq!(object.key(), &key("db-cred"));
        assert_eq!(source.fetch_count(&key("db-cred")), 1);
        assert_eq!(source.total_fetches(), 1);
    }

    #[test]
    fn fetch_missing_is_not_found() {
        let source = InMemorySource::new();
        let result = source.fetch(&key("missing"));
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[test]
    fn injected_failures_take_precedence() {
        let source = InMemorySource::new();
        source.put(Object::new(key("db-cred")));

        source.fail(&key("db-cred"), InjectedFailure::Forbidden);
        assert!(matches!(
            source.fetch(&key("db-cred")),
            Err(Error::Forbidden { .. })
        ));

        source.fail(&key("db-cred"), InjectedFailure::Transient);
        assert!(matches!(
            source.fetch(&key("db-cred")),
            Err(Error::Transient { .. })
        ));

        source.clear_failure(&key("db-cred"));
        assert!(source.fetch(&key("db-cred")).is_ok());
        assert_eq!(source.fetch_count(&key("db-cred")), 3);
    }

    #[test]
    fn remove_makes_object_missing() {
        let source = InMemorySource::new();
        source.put(Object::new(key("gone")));
        assert!(source.remove(&key("gone")).is_some());
        assert!(source.fetch(&key("gone")).is_err());
    }
}
