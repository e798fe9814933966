//! TTL-bounded object cache with single-flight fetches.
//!
//! The [`ObjectStore`] holds one entry per admitted key. Keys are admitted and
//! evicted by the workload registry; the store itself only fetches, caches
//! and refreshes. Concurrent reads of the same key while a fetch is
//! outstanding wait for that fetch instead of issuing their own.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{MAX_TTL_SECS, ManagerConfig, StalePolicy};
use crate::error::{Error, Result};
use crate::source::ObjectSource;
use crate::types::{CachedEntry, Object, ObjectKey};

/// A fetch in progress, shared by its leader and every waiter.
struct Flight {
    result: Mutex<Option<Result<Arc<Object>>>>,
    done: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<Arc<Object>> {
        let mut result = self.result.lock();
        loop {
            if let Some(result) = result.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut result);
        }
    }

    fn complete(&self, result: Result<Arc<Object>>) {
        *self.result.lock() = Some(result);
        self.done.notify_all();
    }
}

struct Slot {
    entry: CachedEntry,
    in_flight: Option<Arc<Flight>>,
}

impl Slot {
    fn owns(&self, flight: &Arc<Flight>) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, flight))
    }
}

enum Lookup {
    Hit(Arc<Object>),
    Wait(Arc<Flight>),
    Lead(Arc<Flight>),
}

/// Releases waiters if the leader unwinds before publishing a result.
struct LeaderGuard<'a> {
    store: &'a ObjectStore,
    key: &'a ObjectKey,
    flight: &'a Arc<Flight>,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut slots = self.store.slots.lock();
            if let Some(slot) = slots.get_mut(self.key) {
                if slot.owns(self.flight) {
                    slot.in_flight = None;
                }
            }
        }
        self.flight.complete(Err(Error::Internal {
            reason: format!("fetch of {} aborted", self.key),
        }));
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    fetches: AtomicU64,
    fetch_errors: AtomicU64,
    stale_served: AtomicU64,
    evictions: AtomicU64,
}

/// Counters describing store activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Reads served from the cache without fetching.
    pub hits: u64,
    /// Fetches issued to the object source.
    pub fetches: u64,
    /// Fetches that failed.
    pub fetch_errors: u64,
    /// Failed refreshes answered with the previous object.
    pub stale_served: u64,
    /// Entries evicted because no workload references them anymore.
    pub evictions: u64,
}

/// A keyed cache of objects fetched from an [`ObjectSource`].
pub struct ObjectStore {
    source: Arc<dyn ObjectSource>,
    stale_policy: StalePolicy,
    ttl: RwLock<Duration>,
    slots: Mutex<HashMap<ObjectKey, Slot>>,
    counters: Counters,
}

impl ObjectStore {
    /// Creates a store that fetches from `source`.
    #[must_use]
    pub fn new(source: Arc<dyn ObjectSource>, config: &ManagerConfig) -> Self {
        Self {
            source,
            stale_policy: config.stale_policy,
            ttl: RwLock::new(clamp_ttl(config.ttl())),
            slots: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Returns the object for `key`, fetching it if needed.
    ///
    /// A fresh cached object is returned directly. Otherwise the calling
    /// thread either performs the fetch or waits for the fetch another
    /// thread already started for the same key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the key is not admitted, or the fetch
    /// error unless the stale policy allows serving the previous object.
    pub fn get(&self, key: &ObjectKey) -> Result<Arc<Object>> {
        let lookup = {
            let mut slots = self.slots.lock();
            let slot = slots.get_mut(key).ok_or_else(|| Error::NotFound {
                key: key.to_string(),
                reason: "not referenced by any registered workload".to_string(),
            })?;

            let fresh = if slot.entry.is_fresh(Utc::now()) {
                slot.entry.object.clone()
            } else {
                None
            };

            if let Some(object) = fresh {
                Lookup::Hit(object)
            } else if let Some(flight) = &slot.in_flight {
                Lookup::Wait(Arc::clone(flight))
            } else {
                let flight = Arc::new(Flight::new());
                slot.in_flight = Some(Arc::clone(&flight));
                Lookup::Lead(flight)
            }
        };

        match lookup {
            Lookup::Hit(object) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(object)
            }
            Lookup::Wait(flight) => flight.wait(),
            Lookup::Lead(flight) => self.lead(key, &flight),
        }
    }

    fn lead(&self, key: &ObjectKey, flight: &Arc<Flight>) -> Result<Arc<Object>> {
        let mut guard = LeaderGuard {
            store: self,
            key,
            flight,
            armed: true,
        };

        debug!(key = %key, "fetching object");
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let fetched = self.source.fetch(key);

        let result = self.settle(key, flight, fetched);
        guard.armed = false;
        flight.complete(result.clone());
        result
    }

    /// Records a fetch outcome and decides what the callers receive.
    #[allow(clippy::significant_drop_tightening)] // Entry update and policy decision are atomic
    fn settle(
        &self,
        key: &ObjectKey,
        flight: &Arc<Flight>,
        fetched: Result<Object>,
    ) -> Result<Arc<Object>> {
        if fetched.is_err() {
            self.counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
        }

        let now = Utc::now();
        let mut slots = self.slots.lock();
        let slot = match slots.get_mut(key) {
            Some(slot) if slot.owns(flight) => {
                slot.in_flight = None;
                slot
            }
            _ => {
                // Invalidated or evicted while the fetch was outstanding.
                debug!(key = %key, "discarding fetch result for superseded entry");
                return fetched.map(Arc::new);
            }
        };

        match fetched {
            Ok(object) => {
                let object = Arc::new(object);
                slot.entry.expires_at = self.deadline(now, &object);
                slot.entry.object = Some(Arc::clone(&object));
                slot.entry.fetched_at = Some(now);
                slot.entry.last_error = None;
                Ok(object)
            }
            Err(err) => {
                if !err.is_transient() {
                    // Revoked or deleted upstream; nothing may be served from here on.
                    slot.entry.object = None;
                    slot.entry.fetched_at = None;
                    slot.entry.expires_at = None;
                }
                slot.entry.last_error = Some(err.clone());
                match &slot.entry.object {
                    Some(stale)
                        if self.stale_policy == StalePolicy::ServeStale && err.is_transient() =>
                    {
                        self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                        warn!(key = %key, error = %err, "refresh failed, serving stale object");
                        Ok(Arc::clone(stale))
                    }
                    _ => {
                        warn!(key = %key, error = %err, "fetch failed");
                        Err(err)
                    }
                }
            }
        }
    }

    /// Mutable objects always get a deadline; only immutable ones get `None`.
    fn deadline(&self, fetched_at: DateTime<Utc>, object: &Object) -> Option<DateTime<Utc>> {
        if object.is_immutable() {
            return None;
        }
        let ttl = TimeDelta::from_std(*self.ttl.read()).unwrap_or(TimeDelta::zero());
        Some(fetched_at.checked_add_signed(ttl).unwrap_or(fetched_at))
    }

    /// Drops the cached object, recorded error and deadline for `key`.
    ///
    /// The key stays admitted; the next read fetches it again. A fetch that
    /// is already outstanding will not repopulate the entry.
    ///
    /// Returns false if the key is not admitted.
    pub fn invalidate(&self, key: &ObjectKey) -> bool {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return false;
        };
        slot.entry = CachedEntry::empty(key.clone());
        slot.in_flight = None;
        debug!(key = %key, "invalidated cached object");
        true
    }

    /// Admits a key so that it can be read. Returns true if it was newly admitted.
    pub(crate) fn admit(&self, key: &ObjectKey) -> bool {
        let mut slots = self.slots.lock();
        if slots.contains_key(key) {
            return false;
        }
        slots.insert(
            key.clone(),
            Slot {
                entry: CachedEntry::empty(key.clone()),
                in_flight: None,
            },
        );
        debug!(key = %key, "admitted object");
        true
    }

    /// Removes a key and its entry. Returns true if the key was admitted.
    pub(crate) fn evict(&self, key: &ObjectKey) -> bool {
        let removed = self.slots.lock().remove(key).is_some();
        if removed {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "evicted object");
        }
        removed
    }

    /// Returns true if the admitted key has never been fetched, is past its
    /// deadline, or carries a fetch error.
    #[must_use]
    pub fn needs_sync(&self, key: &ObjectKey) -> bool {
        self.slots
            .lock()
            .get(key)
            .is_some_and(|slot| slot.entry.needs_sync(Utc::now()))
    }

    /// Returns a snapshot of the entry for `key`.
    #[must_use]
    pub fn entry(&self, key: &ObjectKey) -> Option<CachedEntry> {
        self.slots.lock().get(key).map(|slot| slot.entry.clone())
    }

    /// Changes the refresh TTL, clamped to [`MAX_TTL_SECS`].
    ///
    /// Deadlines of cached mutable objects are recomputed from their last
    /// successful fetch.
    pub fn set_ttl(&self, ttl: Duration) {
        let ttl = clamp_ttl(ttl);
        *self.ttl.write() = ttl;
        let mut slots = self.slots.lock();
        for slot in slots.values_mut() {
            if let (Some(object), Some(fetched_at)) = (&slot.entry.object, slot.entry.fetched_at) {
                slot.entry.expires_at = self.deadline(fetched_at, object);
            }
        }
        debug!(ttl_secs = ttl.as_secs(), "updated object ttl");
    }

    /// Returns the refresh TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        *self.ttl.read()
    }

    /// Returns the stale policy.
    #[must_use]
    pub const fn stale_policy(&self) -> StalePolicy {
        self.stale_policy
    }

    /// Checks if a key is admitted.
    #[must_use]
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.slots.lock().contains_key(key)
    }

    /// Lists all admitted keys, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<ObjectKey> {
        let mut keys: Vec<ObjectKey> = self.slots.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the number of admitted keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns true if no key is admitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the activity counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            fetch_errors: self.counters.fetch_errors.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

fn clamp_ttl(ttl: Duration) -> Duration {
    let max = Duration::from_secs(MAX_TTL_SECS);
    if ttl > max {
        warn!(
            ttl_secs = ttl.as_secs(),
            max_secs = MAX_TTL_SECS,
            "object ttl exceeds maximum, clamping"
        );
        return max;
    }
    ttl
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("entries", &self.len())
            .field("ttl", &self.ttl())
            .field("stale_policy", &self.stale_policy)
            .finish_non_exhaustive()
    }
}
