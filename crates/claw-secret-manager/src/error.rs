//! Error types for the object manager.

use thiserror::Error;

/// Errors that can occur while serving cached objects.
///
/// Errors are `Clone` because a single fetch result is handed to every
/// caller waiting on that fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The object is not registered by any live workload, or is absent remotely.
    #[error("object {key} not found: {reason}")]
    NotFound {
        /// The `namespace/name` of the object.
        key: String,
        /// Why the object could not be found.
        reason: String,
    },

    /// The remote store denied access to the object.
    #[error("access to object {key} forbidden: {reason}")]
    Forbidden {
        /// The `namespace/name` of the object.
        key: String,
        /// The reason reported by the remote store.
        reason: String,
    },

    /// A network or remote failure while fetching the object.
    #[error("transient failure fetching object {key}: {reason}")]
    Transient {
        /// The `namespace/name` of the object.
        key: String,
        /// The underlying failure.
        reason: String,
    },

    /// An internal invariant was violated.
    #[error("internal error: {reason}")]
    Internal {
        /// Description of the violated invariant.
        reason: String,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {reason}")]
    Config {
        /// The reason the configuration was rejected.
        reason: String,
    },
}

impl Error {
    /// Returns true if this error may be masked by serving a stale value.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns true if this is a `NotFound` error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for object manager operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats_correctly() {
        let err = Error::NotFound {
            key: "ns/db-cred".to_string(),
            reason: "not registered".to_string(),
        };
        assert_eq!(err.to_string(), "object ns/db-cred not found: not registered");

        let err = Error::Forbidden {
            key: "ns/db-cred".to_string(),
            reason: "rbac".to_string(),
        };
        assert_eq!(err.to_string(), "access to object ns/db-cred forbidden: rbac");

        let err = Error::Internal {
            reason: "refcount underflow".to_string(),
        };
        assert_eq!(err.to_string(), "internal error: refcount underflow");
    }

    #[test]
    fn only_transient_is_maskable() {
        let transient = Error::Transient {
            key: "a/b".to_string(),
            reason: "timeout".to_string(),
        };
        let forbidden = Error::Forbidden {
            key: "a/b".to_string(),
            reason: "denied".to_string(),
        };
        assert!(transient.is_transient());
        assert!(!forbidden.is_transient());
        assert!(!forbidden.is_not_found());
    }
}
