//! Error types for engine operations.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by a storage engine.
///
/// The variants mirror the exception names the browser engine raises, so an
/// engine binding can translate its native errors without losing the kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A uniqueness or key constraint was violated.
    #[error("constraint error: {message}")]
    Constraint {
        /// Description of the violation.
        message: String,
    },

    /// The supplied data is not valid for the request (bad key, bad record).
    #[error("data error: {message}")]
    Data {
        /// Description of the invalid data.
        message: String,
    },

    /// A named collection or index does not exist, or is outside the
    /// transaction's scope.
    #[error("not found: {message}")]
    NotFound {
        /// What was not found.
        message: String,
    },

    /// The request is not allowed for this object (e.g. composite auto key).
    #[error("invalid access: {message}")]
    InvalidAccess {
        /// Description of the invalid access.
        message: String,
    },

    /// The object is in the wrong state (e.g. closed connection).
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the state problem.
        message: String,
    },

    /// The transaction has already finished.
    #[error("transaction inactive: {message}")]
    TransactionInactive {
        /// Description of the request that was rejected.
        message: String,
    },

    /// A write was attempted in a read-only transaction.
    #[error("read-only transaction: {message}")]
    ReadOnly {
        /// Description of the rejected write.
        message: String,
    },

    /// The engine ran out of storage quota.
    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        /// Description of the quota failure.
        message: String,
    },

    /// The requested version is lower than the stored version.
    #[error("version error: {message}")]
    Version {
        /// Description of the version mismatch.
        message: String,
    },

    /// The open was blocked by connections holding an older version.
    #[error("open blocked: {message}")]
    Blocked {
        /// Description of the blocking connections.
        message: String,
    },

    /// The transaction was aborted.
    #[error("transaction aborted: {message}")]
    Aborted {
        /// Reason for the abort.
        message: String,
    },

    /// Any other engine error.
    #[error("{name}: {message}")]
    Unknown {
        /// Native error name.
        name: String,
        /// Native error message.
        message: String,
    },
}

impl EngineError {
    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates an invalid access error.
    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::InvalidAccess {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a transaction inactive error.
    pub fn transaction_inactive(message: impl Into<String>) -> Self {
        Self::TransactionInactive {
            message: message.into(),
        }
    }

    /// Creates a read-only error.
    pub fn read_only(message: impl Into<String>) -> Self {
        Self::ReadOnly {
            message: message.into(),
        }
    }

    /// Creates a quota exceeded error.
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            message: message.into(),
        }
    }

    /// Creates a version error.
    pub fn version(message: impl Into<String>) -> Self {
        Self::Version {
            message: message.into(),
        }
    }

    /// Creates a blocked error.
    pub fn blocked(message: impl Into<String>) -> Self {
        Self::Blocked {
            message: message.into(),
        }
    }

    /// Creates an aborted error.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Creates an error from a native exception name and message.
    ///
    /// Known names map to their dedicated variant; anything else becomes
    /// [`EngineError::Unknown`].
    pub fn from_native(name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match name {
            "ConstraintError" => Self::Constraint { message },
            "DataError" => Self::Data { message },
            "NotFoundError" => Self::NotFound { message },
            "InvalidAccessError" => Self::InvalidAccess { message },
            "InvalidStateError" => Self::InvalidState { message },
            "TransactionInactiveError" => Self::TransactionInactive { message },
            "ReadOnlyError" => Self::ReadOnly { message },
            "QuotaExceededError" => Self::QuotaExceeded { message },
            "VersionError" => Self::Version { message },
            "AbortError" => Self::Aborted { message },
            other => Self::Unknown {
                name: other.to_string(),
                message,
            },
        }
    }

    /// Returns the native exception name for this error.
    #[must_use]
    pub fn native_name(&self) -> &str {
        match self {
            Self::Constraint { .. } => "ConstraintError",
            Self::Data { .. } => "DataError",
            Self::NotFound { .. } => "NotFoundError",
            Self::InvalidAccess { .. } => "InvalidAccessError",
            Self::InvalidState { .. } => "InvalidStateError",
            Self::TransactionInactive { .. } => "TransactionInactiveError",
            Self::ReadOnly { .. } => "ReadOnlyError",
            Self::QuotaExceeded { .. } => "QuotaExceededError",
            Self::Version { .. } => "VersionError",
            Self::Blocked { .. } => "BlockedError",
            Self::Aborted { .. } => "AbortError",
            Self::Unknown { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_names_map_to_variants() {
        let err = EngineError::from_native("ConstraintError", "key already exists");
        assert!(matches!(err, EngineError::Constraint { .. }));
        assert_eq!(err.native_name(), "ConstraintError");

        let err = EngineError::from_native("TransactionInactiveError", "finished");
        assert!(matches!(err, EngineError::TransactionInactive { .. }));
    }

    #[test]
    fn unknown_names_are_preserved() {
        let err = EngineError::from_native("UnknownError", "disk unavailable");
        assert_eq!(err.native_name(), "UnknownError");
        assert_eq!(err.to_string(), "UnknownError: disk unavailable");
    }
}
