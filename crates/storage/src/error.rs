use std::error::Error;

use waypoint_core::RecordId;

/// Required configuration is missing or contradictory. Raised at persister
/// initialization, fatal to startup — never recovered automatically.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// A required option was not supplied.
    #[error("missing required option `{option}`")]
    MissingOption { option: &'static str },

    /// An option was supplied with an unusable value.
    #[error("invalid value for option `{option}`: {message}")]
    InvalidOption {
        option: &'static str,
        message: String,
    },
}

/// A failure from the storage layer. Always carries the underlying cause
/// where one exists; never silently swallowed. The persister performs no
/// retries — the caller decides whether to retry, abort, or escalate.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The driver reported a failure (connection, statement, commit,
    /// rollback).
    #[error("storage failure during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
        #[source]
        source: Option<Box<dyn Error + Send + Sync>>,
    },

    /// Neither the pre-insert nor the post-insert generator phase produced
    /// an identifier. A row must end up with exactly one identifier, never
    /// zero; this is a fatal generator/backend mismatch.
    #[error("no identifier could be obtained for a new `{table}` row")]
    IdentifierUnavailable { table: String },

    /// The operation requires an instance that has already been persisted.
    #[error("workflow instance has no persisted identifier")]
    UnsavedInstance,

    /// `create` was invoked on an instance that already has an identifier.
    #[error("workflow instance is already persisted under identifier {id}")]
    AlreadyPersisted { id: RecordId },

    /// A stored timestamp does not parse with the configured format.
    #[error("cannot parse stored timestamp `{value}` with format `{format}`")]
    Timestamp { value: String, format: String },
}

impl PersistenceError {
    /// Wrap a driver error, preserving it as the source.
    pub fn storage(
        operation: &'static str,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        PersistenceError::Storage {
            operation,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// A storage failure described only by a message (no structured cause).
    pub fn storage_message(operation: &'static str, message: impl Into<String>) -> Self {
        PersistenceError::Storage {
            operation,
            message: message.into(),
            source: None,
        }
    }
}
