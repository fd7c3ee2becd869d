//! Storage error types.

use thiserror::Error;

/// Storage-specific errors.
///
/// Structural errors (`InvalidWriteInput`, `ExceededWriteBatchLimit`,
/// `ExceededMaxTypeDefinitions`) are detected before any backend call.
/// Backend failures are translated into these kinds at a single point per
/// backend so that driver error classes never leak to callers.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store not found (or soft-deleted).
    #[error("store not found: {store_id}")]
    StoreNotFound { store_id: String },

    /// Store already exists.
    #[error("store already exists: {store_id}")]
    StoreAlreadyExists { store_id: String },

    /// Tuple not found.
    #[error("tuple not found: {object}#{relation}@{user}")]
    TupleNotFound {
        object: String,
        relation: String,
        user: String,
    },

    /// Write would violate natural-key uniqueness.
    #[error("duplicate tuple: {object}#{relation}@{user}")]
    DuplicateTuple {
        object: String,
        relation: String,
        user: String,
    },

    /// Authorization model not found.
    #[error("authorization model not found: {model_id}")]
    ModelNotFound { model_id: String },

    /// No matching rows. Returned by the change feed for an empty page.
    #[error("no results found")]
    NotFound,

    /// Malformed tuple key in a write batch.
    #[error("invalid write input: {message}")]
    InvalidWriteInput { message: String },

    /// Malformed read filter.
    #[error("invalid filter: {message}")]
    InvalidFilter { message: String },

    /// Write batch exceeds the configured cap.
    #[error("write batch exceeds the limit of {limit} tuples")]
    ExceededWriteBatchLimit { limit: usize },

    /// Authorization model carries too many type definitions.
    #[error("authorization model exceeds the limit of {limit} type definitions")]
    ExceededMaxTypeDefinitions { limit: usize },

    /// Continuation token failed validation.
    #[error("invalid continuation token: {message}")]
    InvalidContinuationToken { message: String },

    /// Continuation token was issued under a different object type filter.
    #[error("continuation token object type does not match the request")]
    MismatchObjectType,

    /// Backend serialization failure. Retryable by the caller; the
    /// datastore never retries internally.
    #[error("transaction conflict: {message}")]
    TransactionConflict { message: String },

    /// Operation cancelled or deadline exceeded.
    #[error("operation cancelled")]
    Cancelled,

    /// Iterator exhausted or stopped. Terminal: every subsequent call on
    /// the iterator returns this again.
    #[error("iterator done")]
    IteratorDone,

    /// Database connection error.
    #[error("database connection error: {message}")]
    ConnectionError { message: String },

    /// Unclassified backend failure.
    #[error("database query error: {message}")]
    QueryError { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

impl StorageError {
    /// Whether the caller may retry the failed operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::TransactionConflict { .. })
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_retryable() {
        let err = StorageError::TransactionConflict {
            message: "serialization failure".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!StorageError::NotFound.is_retryable());
        assert!(!StorageError::IteratorDone.is_retryable());
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = StorageError::TupleNotFound {
            object: "document:budget".to_string(),
            relation: "viewer".to_string(),
            user: "user:anne".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "tuple not found: document:budget#viewer@user:anne"
        );

        let err = StorageError::ExceededWriteBatchLimit { limit: 100 };
        assert_eq!(err.to_string(), "write batch exceeds the limit of 100 tuples");
    }
}
