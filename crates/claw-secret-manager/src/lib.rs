//! # Claw Secret Manager
//!
//! Node-local secret and config map management for Clawbernetes workloads:
//!
//! - **Reference counted**: an object is cached exactly while at least one
//!   registered workload references it, and evicted the moment the last one leaves
//! - **TTL bounded**: cached objects are refreshed once their TTL passes;
//!   immutable objects are fetched once
//! - **Single-flight**: concurrent reads of the same object share one fetch
//! - **Configurable staleness**: a failed refresh can either fail fast or serve
//!   the previous value
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use claw_secret_manager::{
//!     CachingSecretManager, InMemorySource, ManagerConfig, Object, ObjectKey, ObjectSource,
//!     SecretManager, Workload,
//! };
//!
//! let source = Arc::new(InMemorySource::new());
//! source.put(Object::new(ObjectKey::new("ns", "db-cred")).with_data("password", "s3cret"));
//!
//! let source: Arc<dyn ObjectSource> = source;
//! let manager = CachingSecretManager::new(source, &ManagerConfig::default());
//! let workload = Workload::new("uid-1", "ns").with_secret_volume("db-cred");
//!
//! manager.register_pod(&workload).expect("register");
//! let secret = manager.get_secret("ns", "db-cred").expect("secret");
//! assert_eq!(secret.get("password").map(|v| v.as_bytes()), Some(&b"s3cret"[..]));
//!
//! manager.unregister_pod(&workload).expect("unregister");
//! assert!(manager.get_secret("ns", "db-cred").is_err());
//! ```
//!
//! ## Security Considerations
//!
//! - Object values use `zeroize` to securely clear memory on drop
//! - Value comparison is constant time
//! - Debug output for values is redacted

pub mod config;
pub mod error;
pub mod manager;
pub mod noop;
pub mod registry;
pub mod source;
pub mod store;
pub mod types;
pub mod workload;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::{CachedEntry, Object, ObjectKey, SecretValue, WorkloadId};

pub use config::{ManagerConfig, StalePolicy, ttl_from_node_annotations};

pub use source::{InMemorySource, InjectedFailure, ObjectSource};

pub use store::{ObjectStore, StoreStats};

pub use registry::{WorkloadRecord, WorkloadRegistry};

pub use manager::{
    CacheBasedManager, CachingConfigMapManager, CachingSecretManager, ConfigMapManager,
    ConfigMaps, ObjectKind, SecretManager, Secrets,
};

pub use noop::{NoopConfigMapManager, NoopSecretManager};

pub use workload::{Container, Workload, WorkloadSpec};
