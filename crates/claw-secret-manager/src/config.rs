//! Manager configuration.
//!
//! Configuration for the object managers, including:
//! - How long a fetched object is served before it is refreshed
//! - Whether a stale object may be served when a refresh fails
//!
//! The refresh TTL can also be supplied at runtime by the node object
//! through the [`NODE_TTL_ANNOTATION`] annotation.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Node annotation carrying the object TTL in seconds.
pub const NODE_TTL_ANNOTATION: &str = "node.alpha.kubernetes.io/ttl";

/// Default refresh TTL in seconds.
pub const DEFAULT_TTL_SECS: u64 = 60;

/// Largest accepted refresh TTL in seconds (one day).
pub const MAX_TTL_SECS: u64 = 86_400;

/// What the store does when refreshing an expired object fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Surface every fetch error to the caller.
    #[default]
    FailFast,
    /// Serve the previously fetched object when the refresh failed with a
    /// transient error. Forbidden and not-found responses are still surfaced.
    ServeStale,
}

/// Configuration of an object manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Seconds a fetched object is served before it becomes eligible for refresh.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Behaviour when a refresh fails.
    #[serde(default)]
    pub stale_policy: StalePolicy,
}

const fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            stale_policy: StalePolicy::default(),
        }
    }
}

impl ManagerConfig {
    /// Returns the refresh TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Sets the refresh TTL.
    ///
    /// The TTL has whole-second resolution; sub-second parts are truncated, so
    /// `Duration::from_millis(500)` yields a TTL of zero. Values above
    /// [`MAX_TTL_SECS`] are rejected by [`Self::validate`] and clamped by the store.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }

    /// Sets the stale policy.
    #[must_use]
    pub const fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
            reason: format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ),
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config {
            reason: format!("invalid TOML: {e}"),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the TTL exceeds [`MAX_TTL_SECS`].
    pub fn validate(&self) -> Result<()> {
        if self.ttl_secs > MAX_TTL_SECS {
            return Err(Error::Config {
                reason: format!("ttl_secs cannot exceed {MAX_TTL_SECS} seconds"),
            });
        }
        Ok(())
    }
}

/// Reads the object TTL from a node's annotations.
///
/// Returns `None` when the annotation is absent or not a number of seconds.
#[must_use]
pub fn ttl_from_node_annotations(annotations: &HashMap<String, String>) -> Option<Duration> {
    let value = annotations.get(NODE_TTL_ANNOTATION)?;
    match value.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs.min(MAX_TTL_SECS))),
        Err(e) => {
            tracing::warn!(value = %value, error = %e, "ignoring malformed node ttl annotation");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.ttl(), Duration::from_secs(60));
        assert_eq!(config.stale_policy, StalePolicy::FailFast);
    }

    #[test]
    fn from_toml_full() {
        let config = ManagerConfig::from_toml(
            r#"
            ttl_secs = 30
            stale_policy = "serve_stale"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.ttl(), Duration::from_secs(30));
        assert_eq!(config.stale_policy, StalePolicy::ServeStale);
    }

    #[test]
    fn from_toml_defaults_missing_fields() {
        let config = ManagerConfig::from_toml("").expect("empty config is valid");
        assert_eq!(config, ManagerConfig::default());
    }

    #[test_case(Duration::from_millis(500), 0 ; "sub second truncates to zero")]
    #[test_case(Duration::from_millis(1_999), 1 ; "fraction dropped")]
    #[test_case(Duration::from_secs(30), 30 ; "whole seconds")]
    fn with_ttl_has_second_resolution(ttl: Duration, expected_secs: u64) {
        assert_eq!(ManagerConfig::default().with_ttl(ttl).ttl_secs, expected_secs);
    }

    #[test]
    fn with_ttl_above_maximum_fails_validation() {
        let config = ManagerConfig::default().with_ttl(Duration::from_secs(MAX_TTL_SECS + 1));
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test_case("fail_fast", StalePolicy::FailFast ; "fail fast")]
    #[test_case("serve_stale", StalePolicy::ServeStale ; "serve stale")]
    fn stale_policy_names(name: &str, expected: StalePolicy) {
        let config = ManagerConfig::from_toml(&format!("stale_policy = \"{name}\""))
            .expect("valid policy");
        assert_eq!(config.stale_policy, expected);
    }

    #[test]
    fn from_toml_rejects_unknown_policy() {
        let result = ManagerConfig::from_toml(r#"stale_policy = "sometimes""#);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn from_toml_rejects_huge_ttl() {
        let result = ManagerConfig::from_toml("ttl_secs = 100000");
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn from_file_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("manager.toml");
        std::fs::write(&path, "ttl_secs = 5\n").expect("write");

        let config = ManagerConfig::from_file(&path).expect("load");
        assert_eq!(config.ttl_secs, 5);
    }

    #[test]
    fn from_file_missing() {
        let result = ManagerConfig::from_file("/nonexistent/manager.toml");
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn builder_methods() {
        let config = ManagerConfig::default()
            .with_ttl(Duration::from_secs(10))
            .with_stale_policy(StalePolicy::ServeStale);
        assert_eq!(config.ttl_secs, 10);
        assert_eq!(config.stale_policy, StalePolicy::ServeStale);
    }

    #[test_case("120", Some(120) ; "plain seconds")]
    #[test_case(" 15 ", Some(15) ; "surrounding whitespace")]
    #[test_case("0", Some(0) ; "zero")]
    #[test_case("999999", Some(86_400) ; "clamped to max")]
    #[test_case("1m", None ; "unit suffix")]
    #[test_case("-5", None ; "negative")]
    fn node_ttl_annotation(value: &str, expected: Option<u64>) {
        let mut annotations = HashMap::new();
        annotations.insert(NODE_TTL_ANNOTATION.to_string(), value.to_string());
        assert_eq!(
            ttl_from_node_annotations(&annotations),
            expected.map(Duration::from_secs)
        );
    }

    #[test]
    fn node_ttl_annotation_absent() {
        assert_eq!(ttl_from_node_annotations(&HashMap::new()), None);
    }
}
