//! Core types for the object manager.
//!
//! This module defines the fundamental types shared by the store, the
//! registry and the manager facade:
//! - [`ObjectKey`]: The `(namespace, name)` index of a cached object
//! - [`WorkloadId`]: The UID of a workload scheduled on this node
//! - [`SecretValue`]: A single data value that zeroizes on drop
//! - [`Object`]: The payload fetched from the remote store
//! - [`CachedEntry`]: A snapshot of the store's bookkeeping for one key

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::Error;

/// Identifies a secret or config map by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    namespace: String,
    name: String,
}

impl ObjectKey {
    /// Creates a new object key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns the namespace of the object.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the name of the object.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The UID of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadId(String);

impl WorkloadId {
    /// Creates a new workload identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single data value of an object that securely zeroizes memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue {
    data: Vec<u8>,
}

impl SecretValue {
    /// Creates a new `SecretValue` from raw bytes.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns the value as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the length of the value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the value is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("len", &self.data.len())
            .field("data", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for SecretValue {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.data.ct_eq(&other.data).into()
    }
}

impl Eq for SecretValue {}

/// An object fetched from the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    key: ObjectKey,
    data: BTreeMap<String, SecretValue>,
    immutable: bool,
    resource_version: String,
}

impl Object {
    /// Creates an empty, mutable object for the given key.
    #[must_use]
    pub fn new(key: ObjectKey) -> Self {
        Self {
            key,
            data: BTreeMap::new(),
            immutable: false,
            resource_version: String::new(),
        }
    }

    /// Adds a data entry.
    #[must_use]
    pub fn with_data(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(name.into(), SecretValue::new(value.into()));
        self
    }

    /// Marks the object as immutable. Immutable objects are never refreshed.
    #[must_use]
    pub const fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Sets the resource version reported by the remote store.
    #[must_use]
    pub fn with_resource_version(mut self, version: impl Into<String>) -> Self {
        self.resource_version = version.into();
        self
    }

    /// Returns the key of the object.
    #[must_use]
    pub const fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Returns a data value by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SecretValue> {
        self.data.get(name)
    }

    /// Returns all data entries.
    #[must_use]
    pub const fn data(&self) -> &BTreeMap<String, SecretValue> {
        &self.data
    }

    /// Returns true if the object is immutable.
    #[must_use]
    pub const fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// Returns the resource version.
    #[must_use]
    pub fn resource_version(&self) -> &str {
        &self.resource_version
    }
}

/// A point-in-time view of the store's bookkeeping for one key.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    /// The key of the entry.
    pub key: ObjectKey,
    /// The last successfully fetched object, if any.
    pub object: Option<Arc<Object>>,
    /// When the object was last fetched successfully.
    pub fetched_at: Option<DateTime<Utc>>,
    /// The error recorded by the last fetch attempt, if it failed.
    pub last_error: Option<Error>,
    /// When the object becomes eligible for refresh. `None` means never.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedEntry {
    /// Creates an entry that has not been fetched yet.
    #[must_use]
    pub const fn empty(key: ObjectKey) -> Self {
        Self {
            key,
            object: None,
            fetched_at: None,
            last_error: None,
            expires_at: None,
        }
    }

    /// Returns true if the entry holds an object past its refresh deadline.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.object.is_some() && self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    /// Returns true if the cached object can be served without fetching.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.object.is_some() && self.last_error.is_none() && !self.is_expired(now)
    }

    /// Returns true if the entry should be proactively refreshed.
    ///
    /// Entries never fetched, past their deadline or carrying an error qualify.
    #[must_use]
    pub fn needs_sync(&self, now: DateTime<Utc>) -> bool {
        !self.is_fresh(now)
    }
}
