//! Error taxonomy surfaced to callers of the engine.
//!
//! Every operation-level failure is categorized into a stable, named variant
//! so retry policy and callers can branch on tag rather than on the
//! underlying `rusqlite`/`io`/`csv` exception type.

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures raised while building an [`crate::mapping::EntityMapping`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("entity requires a writable `Version: i64` column when soft-delete is enabled")]
    MissingVersion,
    #[error("entity requires a writable temporal `CreationTime` column when an expiry span is configured")]
    MissingCreationTime,
    #[error("entity requires a nullable temporal `AbsoluteExpiration` column when an expiry span is configured")]
    MissingAbsoluteExpiration,
    #[error("entity requires an `IsArchived: bool` column when archiving is enabled")]
    MissingIsArchived,
    #[error("column `{column}` declared as `{expected}` but mapped value is `{actual}`")]
    WrongType {
        column: String,
        expected: String,
        actual: String,
    },
    #[error("column `{column}` is read-only and cannot be written by the engine")]
    ReadOnlyProperty { column: String },
    #[error("table name is empty; only abstract (base) mappings may omit a table name")]
    EmptyTableName,
    #[error("auto-increment primary key `{column}` must be the sole primary-key column")]
    InvalidAutoIncrementKey { column: String },
}

/// Failures raised while translating a [`crate::expr::Predicate`] to SQL.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("column `{0}` is not mapped on this entity")]
    NotMapped(String),
    #[error("column `{0}` is unknown on this entity")]
    UnknownColumn(String),
    #[error("unsupported operation in predicate: {0}")]
    UnsupportedOperation(String),
}

/// A single field-level validation failure, raised by constructors that
/// validate their arguments eagerly (e.g. [`crate::retry::RetryPolicy::new`],
/// [`crate::purge::PurgeOptions`]'s age-selection check).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field `{}`: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        Self::Validation {
            field: err.field,
            message: err.message,
        }
    }
}

/// The stable error taxonomy from the persistence engine's external contract.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("entity not found: {entity_type} key={key}")]
    EntityNotFound { entity_type: String, key: String },

    #[error("entity already exists: {entity_type} key={key}")]
    EntityAlreadyExists { entity_type: String, key: String },

    #[error(
        "concurrency conflict on {entity_type} key={key}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        entity_type: String,
        key: String,
        expected: i64,
        actual: i64,
    },

    #[error("write failed for {entity_type} key={key}: {message}")]
    EntityWriteError {
        entity_type: String,
        key: String,
        message: String,
    },

    #[error("argument invalid: {0}")]
    ArgumentInvalid(String),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error("validation failed for field `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transient storage error after exhausting retries: {0}")]
    TransientStorageError(String),

    #[error("{0} operation(s) failed: {1:?}")]
    Aggregate(String, Vec<AggregateFailure>),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// One failure within an aggregate (batch) operation, carrying enough
/// context to identify which input it came from.
#[derive(Debug)]
pub struct AggregateFailure {
    pub index: usize,
    pub key: Option<String>,
    pub error: String,
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "[{}] key={key}: {}", self.index, self.error),
            None => write!(f, "[{}]: {}", self.index, self.error),
        }
    }
}

impl EngineError {
    /// Classify the retryable-ness of this error using the default SQLite
    /// transient classifier, without requiring callers to pull in the
    /// `retry` module directly. Most call sites should instead consult a
    /// [`crate::retry::TransientClassifier`], but this is a convenient
    /// shorthand for quick checks and for the `Cancelled` carve-out, which
    /// is never transient regardless of classifier.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
