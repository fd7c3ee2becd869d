//! relata-storage: tuple and authorization-model datastore
//!
//! This crate is the persistent storage core of the relata ReBAC service.
//! It persists relationship tuples, authorization models, stores, and
//! assertions, serves the selector-driven read patterns the evaluation
//! engine depends on, and produces an ordered change feed of all tuple
//! mutations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                relata-storage                     │
//! ├──────────────────────────────────────────────────┤
//! │  tuple.rs    - record types & key string codec    │
//! │  token.rs    - continuation token codec           │
//! │  iterator.rs - head/next/stop cursors             │
//! │  traits.rs   - DataStore contract & filters       │
//! │  error.rs    - error taxonomy                     │
//! │  postgres.rs - PostgreSQL implementation          │
//! │  memory.rs   - in-memory implementation           │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod iterator;
pub mod memory;
pub mod postgres;
pub mod token;
pub mod traits;
pub mod tuple;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use iterator::{
    collect_all, CachedTuple, CachedTupleIterator, CombinedIterator, RecordIterator,
    StaticIterator, TupleIteratorBox,
};
pub use memory::MemoryDataStore;
pub use postgres::{PostgresConfig, PostgresDataStore};
pub use token::ContinuationToken;
pub use traits::{
    parse_user_filter, validate_store_id, validate_store_name, validate_tuple_key, Assertion,
    AuthorizationModel, DataStore, ObjectRelation, PaginatedResult, PaginationOptions,
    ReadStartingWithUserFilter, ReadUsersetTuplesFilter, RelationReference, Store, TupleFilter,
    TypeDefinition, DEFAULT_MAX_TUPLES_PER_WRITE, DEFAULT_MAX_TYPES_PER_AUTHORIZATION_MODEL,
};
pub use tuple::{
    build_object, from_user_parts, split_object, to_user_parts, Tuple, TupleChange,
    TupleCondition, TupleKey, TupleOperation, TupleRecord,
};

// Re-export chrono types for timestamp handling
pub use chrono::{DateTime, Utc};
