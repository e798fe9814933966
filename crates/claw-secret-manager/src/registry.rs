//! Workload reference registry.
//!
//! Tracks which object keys each registered workload depends on and keeps a
//! refcount per key. A key is admitted into the [`ObjectStore`] when its
//! refcount leaves zero and evicted the moment it returns to zero.
//!
//! All bookkeeping happens under one mutex. Store admission and eviction run
//! while that mutex is held, so a decrement-then-evict can never interleave
//! with a concurrent registration of the same key. The store never calls
//! back into the registry, which keeps the lock order one-directional.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::store::ObjectStore;
use crate::types::{ObjectKey, WorkloadId};

/// The keys a registered workload references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRecord {
    /// The workload UID.
    pub uid: WorkloadId,
    /// The namespace the workload runs in.
    pub namespace: String,
    /// The referenced keys.
    pub keys: BTreeSet<ObjectKey>,
}

#[derive(Debug, Default)]
struct RegistryState {
    workloads: HashMap<WorkloadId, WorkloadRecord>,
    refcounts: HashMap<ObjectKey, usize>,
}

impl RegistryState {
    /// Checks that releasing every key, repeats included, cannot underflow.
    fn check_releasable<'a>(&self, keys: impl IntoIterator<Item = &'a ObjectKey>) -> Result<()> {
        let mut needed: HashMap<&ObjectKey, usize> = HashMap::new();
        for key in keys {
            *needed.entry(key).or_insert(0) += 1;
        }
        for (key, n) in needed {
            let held = self.refcounts.get(key).copied().unwrap_or(0);
            if held < n {
                error!(key = %key, held, releases = n, "refcount underflow");
                return Err(Error::Internal {
                    reason: format!("refcount underflow for {key}"),
                });
            }
        }
        Ok(())
    }

    fn increment(&mut self, store: &ObjectStore, key: &ObjectKey) {
        let count = self.refcounts.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            store.admit(key);
        }
    }

    fn decrement(&mut self, store: &ObjectStore, key: &ObjectKey) -> Result<()> {
        let Some(count) = self.refcounts.get_mut(key) else {
            error!(key = %key, "refcount underflow");
            return Err(Error::Internal {
                reason: format!("refcount underflow for {key}"),
            });
        };
        *count -= 1;
        if *count == 0 {
            self.refcounts.remove(key);
            store.evict(key);
        }
        Ok(())
    }
}

/// Maps live workloads to the object keys they reference.
pub struct WorkloadRegistry {
    store: Arc<ObjectStore>,
    state: Mutex<RegistryState>,
}

impl WorkloadRegistry {
    /// Creates an empty registry that admits and evicts keys in `store`.
    #[must_use]
    pub fn new(store: Arc<ObjectStore>) -> Self {
        Self {
            store,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Registers a workload or reconciles an already registered one.
    ///
    /// For a known workload only the difference against its previous key set
    /// is applied: added keys are incremented, removed keys are decremented
    /// and evicted when no other workload references them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the refcount table is inconsistent with
    /// the workload records. Nothing is changed in that case.
    #[allow(clippy::significant_drop_tightening)] // Whole reconciliation is one critical section
    pub fn register(
        &self,
        uid: &WorkloadId,
        namespace: &str,
        keys: BTreeSet<ObjectKey>,
    ) -> Result<()> {
        let mut state = self.state.lock();

        let previous = state
            .workloads
            .get(uid)
            .map(|record| record.keys.clone())
            .unwrap_or_default();

        state.check_releasable(previous.difference(&keys))?;
        for key in keys.difference(&previous) {
            state.increment(&self.store, key);
        }
        for key in previous.difference(&keys) {
            state.decrement(&self.store, key)?;
        }

        let key_count = keys.len();
        let replaced = state
            .workloads
            .insert(
                uid.clone(),
                WorkloadRecord {
                    uid: uid.clone(),
                    namespace: namespace.to_string(),
                    keys,
                },
            )
            .is_some();

        if replaced {
            debug!(uid = %uid, keys = key_count, "reconciled workload references");
        } else {
            info!(uid = %uid, namespace = %namespace, keys = key_count, "registered workload");
        }
        Ok(())
    }

    /// Unregisters a workload, evicting keys nobody references anymore.
    ///
    /// Unregistering an unknown workload is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the refcount table is inconsistent with
    /// the workload records. Nothing is changed in that case.
    #[allow(clippy::significant_drop_tightening)] // Decrement and eviction are one critical section
    pub fn unregister(&self, uid: &WorkloadId) -> Result<()> {
        let mut state = self.state.lock();

        let Some(keys) = state.workloads.get(uid).map(|record| &record.keys) else {
            debug!(uid = %uid, "ignoring unregistration of unknown workload");
            return Ok(());
        };
        state.check_releasable(keys)?;
        let Some(record) = state.workloads.remove(uid) else {
            return Ok(());
        };

        for key in &record.keys {
            state.decrement(&self.store, key)?;
        }

        info!(uid = %uid, keys = record.keys.len(), "unregistered workload");
        Ok(())
    }

    /// Returns the workloads referencing at least one key that was never
    /// fetched, is past its TTL, or carries a fetch error. Sorted by UID.
    #[must_use]
    pub fn due_for_sync(&self) -> Vec<WorkloadId> {
        let state = self.state.lock();
        let mut due: Vec<WorkloadId> = state
            .workloads
            .values()
            .filter(|record| record.keys.iter().any(|key| self.store.needs_sync(key)))
            .map(|record| record.uid.clone())
            .collect();
        drop(state);

        due.sort();
        due
    }

    /// Unregisters every workload. Returns how many were registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the refcount table is inconsistent with
    /// the workload records. Nothing is changed in that case.
    pub fn clear(&self) -> Result<usize> {
        let mut state = self.state.lock();
        state.check_releasable(state.workloads.values().flat_map(|record| &record.keys))?;
        let count = state.workloads.len();
        let records: Vec<WorkloadRecord> = state.workloads.drain().map(|(_, r)| r).collect();
        for record in &records {
            for key in &record.keys {
                state.decrement(&self.store, key)?;
            }
        }
        Ok(count)
    }

    /// Returns the number of registered workloads referencing `key`.
    #[must_use]
    pub fn refcount(&self, key: &ObjectKey) -> usize {
        self.state.lock().refcounts.get(key).copied().unwrap_or(0)
    }

    /// Returns the record of a registered workload.
    #[must_use]
    pub fn record(&self, uid: &WorkloadId) -> Option<WorkloadRecord> {
        self.state.lock().workloads.get(uid).cloned()
    }

    /// Lists the UIDs of all registered workloads, sorted.
    #[must_use]
    pub fn workloads(&self) -> Vec<WorkloadId> {
        let mut uids: Vec<WorkloadId> = self.state.lock().workloads.keys().cloned().collect();
        uids.sort();
        uids
    }

    /// Returns the number of registered workloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().workloads.len()
    }

    /// Returns true if no workload is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the store this registry admits keys into.
    #[must_use]
    pub const fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }
}

impl std::fmt::Debug for WorkloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadRegistry")
            .field("workloads", &self.len())
            .field("store", &self.store)
            .finish()
    }
}
