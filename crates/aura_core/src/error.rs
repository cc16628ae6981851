//! Error types for the Aura store.

use aura_storage::EngineError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The engine failed to open the database.
    ///
    /// The connection state is reset, so a later connect retries.
    #[error("{message}")]
    Connection {
        /// Description of the failure.
        message: String,
    },

    /// The open was blocked by another connection holding an older version.
    #[error("database connection blocked: {message}")]
    ConnectionBlocked {
        /// Description of the blocking connection.
        message: String,
    },

    /// A single engine request failed.
    #[error("{operation} on {collection} failed: {source}")]
    Operation {
        /// Collection the request targeted.
        collection: String,
        /// Operation name.
        operation: &'static str,
        /// Engine error.
        #[source]
        source: EngineError,
    },

    /// A unit of work aborted its transaction on purpose.
    #[error("{reason}")]
    BusinessAbort {
        /// Reason given by the unit of work.
        reason: String,
    },

    /// The engine aborted the transaction for a reason the unit of work did
    /// not raise.
    #[error("transaction aborted: {source}")]
    TransactionAborted {
        /// Engine error attached to the abort.
        #[source]
        source: EngineError,
    },

    /// The schema declaration is invalid.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// The collection is not declared in the schema.
    #[error("unknown collection: {name}")]
    UnknownCollection {
        /// Collection name.
        name: String,
    },

    /// The index is not declared on the collection.
    #[error("unknown index {index} on collection {collection}")]
    UnknownIndex {
        /// Collection name.
        collection: String,
        /// Index name.
        index: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A typed record could not be converted.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the conversion failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a business abort error, for use inside a unit of work.
    pub fn abort(reason: impl Into<String>) -> Self {
        Self::BusinessAbort {
            reason: reason.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an unknown collection error.
    pub fn unknown_collection(name: impl Into<String>) -> Self {
        Self::UnknownCollection { name: name.into() }
    }

    /// Creates an unknown index error.
    pub fn unknown_index(collection: impl Into<String>, index: impl Into<String>) -> Self {
        Self::UnknownIndex {
            collection: collection.into(),
            index: index.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an operation error.
    pub fn operation(
        collection: impl Into<String>,
        operation: &'static str,
        source: EngineError,
    ) -> Self {
        Self::Operation {
            collection: collection.into(),
            operation,
            source,
        }
    }

    /// Maps an engine open failure.
    pub(crate) fn from_open(error: EngineError) -> Self {
        match error {
            EngineError::Blocked { message } => Self::ConnectionBlocked { message },
            other => Self::connection(format!("database connection failed: {other}")),
        }
    }

    /// Returns the engine error behind this error, if any.
    #[must_use]
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Self::Operation { source, .. } | Self::TransactionAborted { source } => Some(source),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_open_maps_to_connection_blocked() {
        let err = StoreError::from_open(EngineError::blocked("version 1 still open"));
        assert!(matches!(err, StoreError::ConnectionBlocked { .. }));
    }

    #[test]
    fn failed_open_keeps_engine_message() {
        let err = StoreError::from_open(EngineError::version("requested 1, stored 2"));
        assert!(matches!(err, StoreError::Connection { .. }));
        assert!(err.to_string().starts_with("database connection failed: "));
        assert!(err.to_string().contains("requested 1, stored 2"));
    }

    #[test]
    fn business_abort_displays_reason_verbatim() {
        assert_eq!(
            StoreError::abort("validation failed").to_string(),
            "validation failed"
        );
    }

    #[test]
    fn operation_error_exposes_engine_error() {
        let err = StoreError::operation("book", "add", EngineError::constraint("duplicate"));
        assert_eq!(err.to_string(), "add on book failed: constraint error: duplicate");
        assert!(matches!(
            err.engine_error(),
            Some(EngineError::Constraint { .. })
        ));
    }
}
