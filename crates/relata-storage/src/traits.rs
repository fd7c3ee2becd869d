//! DataStore trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::iterator::TupleIteratorBox;
use crate::tuple::{split_object, to_user_parts, Tuple, TupleChange, TupleKey};

/// Maximum length for string fields.
const MAX_FIELD_LENGTH: usize = 255;

/// Default cap on tuples per write batch.
pub const DEFAULT_MAX_TUPLES_PER_WRITE: usize = 100;

/// Default cap on type definitions per authorization model.
pub const DEFAULT_MAX_TYPES_PER_AUTHORIZATION_MODEL: usize = 100;

/// Validate a store ID.
///
/// # Errors
/// Returns `StorageError::InvalidWriteInput` if the store ID is empty or too long.
pub fn validate_store_id(store_id: &str) -> StorageResult<()> {
    if store_id.is_empty() {
        return Err(StorageError::InvalidWriteInput {
            message: "store_id cannot be empty".to_string(),
        });
    }
    if store_id.len() > MAX_FIELD_LENGTH {
        return Err(StorageError::InvalidWriteInput {
            message: format!(
                "store_id exceeds maximum length of {} characters",
                MAX_FIELD_LENGTH
            ),
        });
    }
    Ok(())
}

/// Validate a store name.
///
/// # Errors
/// Returns `StorageError::InvalidWriteInput` if the name is empty or too long.
pub fn validate_store_name(name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::InvalidWriteInput {
            message: "store name cannot be empty".to_string(),
        });
    }
    if name.len() > MAX_FIELD_LENGTH {
        return Err(StorageError::InvalidWriteInput {
            message: format!(
                "store name exceeds maximum length of {} characters",
                MAX_FIELD_LENGTH
            ),
        });
    }
    Ok(())
}

fn validate_field(field: &str, value: &str) -> StorageResult<()> {
    if value.is_empty() {
        return Err(StorageError::InvalidWriteInput {
            message: format!("{field} cannot be empty"),
        });
    }
    if value.len() > MAX_FIELD_LENGTH {
        return Err(StorageError::InvalidWriteInput {
            message: format!(
                "{field} exceeds maximum length of {} characters",
                MAX_FIELD_LENGTH
            ),
        });
    }
    Ok(())
}

/// Validate a tuple key at the storage layer.
///
/// This is **structural validation** only: the object must be `type:id`
/// with both parts present, the relation non-empty, and the user one of
/// the three canonical forms. Whether the types and relations exist in the
/// authorization model is checked by the evaluator, not here.
///
/// # Errors
/// Returns `StorageError::InvalidWriteInput` if any part is empty or too long.
pub fn validate_tuple_key(key: &TupleKey) -> StorageResult<()> {
    let (object_type, object_id) = split_object(&key.object);
    validate_field("object_type", object_type)?;
    validate_field("object_id", object_id)?;
    validate_field("relation", &key.relation)?;

    let (user_object_type, user_object_id, user_relation) = to_user_parts(&key.user);
    validate_field("user type", user_object_type)?;
    validate_field("user id", user_object_id)?;
    if let Some(user_relation) = user_relation {
        validate_field("user relation", user_relation)?;
    }
    if let Some(ref condition) = key.condition {
        validate_field("condition name", &condition.name)?;
    }
    Ok(())
}

/// Parse a user filter string into `(user_object_type, user_object_id, user_relation)`.
///
/// # Format
/// - `"type:id"` for direct users (`"type:*"` for a typed wildcard)
/// - `"type:id#relation"` for usersets
///
/// # Errors
/// Returns `StorageError::InvalidFilter` if the format is invalid.
pub fn parse_user_filter(user: &str) -> StorageResult<(String, String, Option<String>)> {
    let (user_object_type, user_object_id, user_relation) = to_user_parts(user);
    if user_object_type.is_empty()
        || user_object_id.is_empty()
        || user_relation.is_some_and(str::is_empty)
    {
        return Err(StorageError::InvalidFilter {
            message: format!(
                "invalid user filter '{user}': expected 'type:id', 'type:id#relation', or 'type:*'"
            ),
        });
    }
    Ok((
        user_object_type.to_string(),
        user_object_id.to_string(),
        user_relation.map(str::to_string),
    ))
}

/// Store metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the store has been soft-deleted. Soft-deleted stores are
    /// invisible to `get_store` and `list_stores`.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A single type definition row of an authorization model. The relation
/// rewrites are stored as an opaque document; the datastore never
/// interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub type_name: String,
    pub definition: serde_json::Value,
}

/// An authorization model: immutable once written, identified by a
/// monotonic per-store id ("latest" is the maximum).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationModel {
    pub id: String,
    pub type_definitions: Vec<TypeDefinition>,
}

/// A test assertion stored alongside a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    pub tuple_key: TupleKey,
    pub expectation: bool,
}

/// Partial tuple key for `read`/`read_page`: any subset of the fields may
/// be bound; unbound fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TupleFilter {
    pub object_type: Option<String>,
    pub object_id: Option<String>,
    pub relation: Option<String>,
    /// Exact-match user filter, `"type:id"`, `"type:id#relation"`, or
    /// `"type:*"`. Wildcard semantics are not applied here; `type:*` only
    /// matches tuples storing the literal `*`.
    pub user: Option<String>,
}

/// Allowed user type restriction for `read_userset_tuples`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationReference {
    /// Matches userset users `user_type:<id>#relation` for any id.
    Relation { user_type: String, relation: String },
    /// Matches typed wildcard users `user_type:*`.
    Wildcard { user_type: String },
}

/// Filter for `read_userset_tuples`: tuples on `(object, relation)` whose
/// user is a userset or typed wildcard, optionally restricted to a
/// disjunction of [`RelationReference`]s.
#[derive(Debug, Clone, Default)]
pub struct ReadUsersetTuplesFilter {
    /// Canonical `type:id` object string.
    pub object: String,
    pub relation: String,
    pub allowed_user_type_restrictions: Vec<RelationReference>,
}

/// One user of a `read_starting_with_user` filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRelation {
    /// Canonical `type:id` object string.
    pub object: String,
    pub relation: Option<String>,
}

/// Filter for `read_starting_with_user`: for each entry of `user_filter`,
/// tuples with the given object type and relation whose user matches
/// exactly.
#[derive(Debug, Clone, Default)]
pub struct ReadStartingWithUserFilter {
    pub object_type: String,
    pub relation: String,
    pub user_filter: Vec<ObjectRelation>,
}

/// Options for paginated queries.
#[derive(Debug, Clone, Default)]
pub struct PaginationOptions {
    /// Maximum number of results to return.
    pub page_size: Option<u32>,
    /// Continuation token from a previous query.
    pub continuation_token: Option<String>,
}

impl PaginationOptions {
    pub fn resolved_page_size(&self) -> usize {
        self.page_size.unwrap_or(100) as usize
    }
}

/// Paginated query result.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    /// Token for fetching the next page, if there are more results.
    pub continuation_token: Option<String>,
}

/// Abstract storage interface for relationship tuples, authorization
/// models, stores, and assertions.
///
/// Implementations must be thread-safe (`Send + Sync`); the handle may be
/// shared freely across concurrent readers and writers. The iterators
/// returned by read operations are not thread-safe and must be stopped by
/// their single consumer.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    // Store registry

    /// Creates a new store.
    async fn create_store(&self, id: &str, name: &str) -> StorageResult<Store>;

    /// Gets a store by ID, excluding soft-deleted stores.
    async fn get_store(&self, id: &str) -> StorageResult<Store>;

    /// Soft-deletes a store. Its tuples are retained but become
    /// unreachable through the `get_store` gate.
    async fn delete_store(&self, id: &str) -> StorageResult<()>;

    /// Lists stores ordered by id, excluding soft-deleted stores.
    async fn list_stores(
        &self,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<Store>>;

    // Tuple reads

    /// Returns an unordered iterator over tuples matching the filter.
    async fn read(&self, store_id: &str, filter: &TupleFilter) -> StorageResult<TupleIteratorBox>;

    /// Returns at most one page of tuples matching the filter, ordered by
    /// ulid, with a continuation token iff more rows exist.
    async fn read_page(
        &self,
        store_id: &str,
        filter: &TupleFilter,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<Tuple>>;

    /// Exact-match lookup by full natural key.
    ///
    /// # Errors
    /// Returns `StorageError::TupleNotFound` when absent.
    async fn read_user_tuple(&self, store_id: &str, key: &TupleKey) -> StorageResult<Tuple>;

    /// Returns tuples on `(object, relation)` whose user is a userset or
    /// typed wildcard, filtered by the restriction disjunction.
    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: &ReadUsersetTuplesFilter,
    ) -> StorageResult<TupleIteratorBox>;

    /// Returns the union of per-user iterators: tuples with the given
    /// object type and relation whose user matches one of the filter users
    /// exactly.
    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &ReadStartingWithUserFilter,
    ) -> StorageResult<TupleIteratorBox>;

    // Tuple writes

    /// Atomically applies a batch of deletes and writes together with
    /// their changelog rows. Deletes apply before writes.
    ///
    /// # Errors
    /// - `StorageError::ExceededWriteBatchLimit` before touching the
    ///   backend when the batch exceeds `max_tuples_per_write`.
    /// - `StorageError::TupleNotFound` when a delete references an absent
    ///   key; nothing commits.
    /// - `StorageError::DuplicateTuple` when a write references an
    ///   existing natural key; nothing commits.
    async fn write(
        &self,
        store_id: &str,
        deletes: Vec<TupleKey>,
        writes: Vec<TupleKey>,
    ) -> StorageResult<()>;

    /// The configured cap on tuples per write batch.
    fn max_tuples_per_write(&self) -> usize;

    // Authorization models

    /// Persists an authorization model. Models are immutable once written.
    ///
    /// # Errors
    /// Returns `StorageError::ExceededMaxTypeDefinitions` when the model
    /// carries more type definitions than configured.
    async fn write_authorization_model(
        &self,
        store_id: &str,
        model: &AuthorizationModel,
    ) -> StorageResult<()>;

    /// Reassembles a model by id.
    async fn read_authorization_model(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> StorageResult<AuthorizationModel>;

    /// Returns models newest-first with a continuation token.
    async fn read_authorization_models(
        &self,
        store_id: &str,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<AuthorizationModel>>;

    /// The maximum model id for the store.
    ///
    /// # Errors
    /// Returns `StorageError::ModelNotFound` when the store has no models.
    async fn find_latest_authorization_model_id(&self, store_id: &str) -> StorageResult<String>;

    /// The configured cap on type definitions per model.
    fn max_types_per_authorization_model(&self) -> usize;

    // Assertions

    /// Upserts the assertion set for `(store, model)`.
    async fn write_assertions(
        &self,
        store_id: &str,
        model_id: &str,
        assertions: Vec<Assertion>,
    ) -> StorageResult<()>;

    /// Returns the assertion set for `(store, model)`, or an empty vector
    /// when none has been written.
    async fn read_assertions(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> StorageResult<Vec<Assertion>>;

    // Change feed

    /// Returns ordered tuple changes older than `now - horizon_offset`,
    /// ascending by insertion time with ulid tiebreak. The horizon is a
    /// settling delay that masks in-flight commit reordering.
    ///
    /// At least one returned row always comes with a continuation token,
    /// even on the final page; polling with that token returns
    /// `StorageError::NotFound` until new changes settle. An empty first
    /// page also returns `NotFound` with no token, so a cursor cannot be
    /// established on an empty store.
    ///
    /// # Errors
    /// Returns `StorageError::MismatchObjectType` when the token was
    /// issued under a different `object_type_filter`.
    async fn read_changes(
        &self,
        store_id: &str,
        object_type_filter: &str,
        pagination: &PaginationOptions,
        horizon_offset: std::time::Duration,
    ) -> StorageResult<(Vec<TupleChange>, String)>;

    // Health

    /// Backend liveness probe.
    async fn is_ready(&self) -> StorageResult<bool>;
}
