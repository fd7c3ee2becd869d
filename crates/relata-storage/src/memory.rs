//! In-memory storage implementation.
//!
//! Reference backend with the same observable semantics as the relational
//! one: natural-key uniqueness, monotonic ulid assignment, changelog
//! append, continuation tokens, and the change-feed settling horizon.
//! Uses DashMap for thread-safe concurrent access; per-store tuple vectors
//! stay in ulid order because mutations append under the shard lock.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::instrument;

use crate::error::{StorageError, StorageResult};
use crate::iterator::{CombinedIterator, StaticIterator, TupleIteratorBox};
use crate::token::ContinuationToken;
use crate::traits::{
    parse_user_filter, validate_store_id, validate_store_name, validate_tuple_key, Assertion,
    AuthorizationModel, DataStore, PaginatedResult, PaginationOptions, ReadStartingWithUserFilter,
    ReadUsersetTuplesFilter, RelationReference, Store, TupleFilter,
    DEFAULT_MAX_TUPLES_PER_WRITE, DEFAULT_MAX_TYPES_PER_AUTHORIZATION_MODEL,
};
use crate::tuple::{split_object, Tuple, TupleChange, TupleKey, TupleOperation, TupleRecord};

/// A changelog row: the change itself plus the columns the feed filters
/// and orders by.
#[derive(Debug, Clone)]
struct ChangeRecord {
    ulid: String,
    object_type: String,
    change: TupleChange,
}

/// In-memory implementation of [`DataStore`].
pub struct MemoryDataStore {
    stores: DashMap<String, Store>,
    /// Tuples per store, in ulid (insertion) order.
    tuples: DashMap<String, Vec<TupleRecord>>,
    /// Append-only changelog per store, in ulid order.
    changelog: DashMap<String, Vec<ChangeRecord>>,
    /// Authorization models per store, in write order.
    models: DashMap<String, Vec<AuthorizationModel>>,
    /// Assertion sets keyed by `(store_id, model_id)`.
    assertions: DashMap<(String, String), Vec<Assertion>>,
    ulid_gen: Mutex<ulid::Generator>,
    max_tuples_per_write: usize,
    max_types_per_authorization_model: usize,
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDataStore")
            .field("stores", &self.stores.len())
            .field("max_tuples_per_write", &self.max_tuples_per_write)
            .field(
                "max_types_per_authorization_model",
                &self.max_types_per_authorization_model,
            )
            .finish()
    }
}

impl MemoryDataStore {
    /// Creates a new in-memory data store with default limits.
    pub fn new() -> Self {
        Self::with_limits(
            DEFAULT_MAX_TUPLES_PER_WRITE,
            DEFAULT_MAX_TYPES_PER_AUTHORIZATION_MODEL,
        )
    }

    /// Creates a new in-memory data store with explicit batch limits.
    pub fn with_limits(
        max_tuples_per_write: usize,
        max_types_per_authorization_model: usize,
    ) -> Self {
        Self {
            stores: DashMap::new(),
            tuples: DashMap::new(),
            changelog: DashMap::new(),
            models: DashMap::new(),
            assertions: DashMap::new(),
            ulid_gen: Mutex::new(ulid::Generator::new()),
            max_tuples_per_write,
            max_types_per_authorization_model,
        }
    }

    /// Creates a new in-memory data store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn next_ulid(&self) -> StorageResult<String> {
        let mut gen = self
            .ulid_gen
            .lock()
            .map_err(|_| StorageError::InternalError {
                message: "ulid generator lock poisoned".to_string(),
            })?;
        gen.generate()
            .map(|u| u.to_string())
            .map_err(|e| StorageError::InternalError {
                message: format!("ulid generation failed: {e}"),
            })
    }

    fn filtered_records(
        &self,
        store_id: &str,
        filter: &TupleFilter,
    ) -> StorageResult<Vec<TupleRecord>> {
        let user_filter = match filter.user {
            Some(ref user) => Some(parse_user_filter(user)?),
            None => None,
        };

        let records = self
            .tuples
            .get(store_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| {
                        filter
                            .object_type
                            .as_ref()
                            .map_or(true, |ot| &r.object_type == ot)
                            && filter
                                .object_id
                                .as_ref()
                                .map_or(true, |oi| &r.object_id == oi)
                            && filter
                                .relation
                                .as_ref()
                                .map_or(true, |rel| &r.relation == rel)
                            && user_filter.as_ref().map_or(true, |(ut, ui, ur)| {
                                &r.user_object_type == ut
                                    && &r.user_object_id == ui
                                    && &r.user_relation == ur
                            })
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(records)
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn create_store(&self, id: &str, name: &str) -> StorageResult<Store> {
        validate_store_id(id)?;
        validate_store_name(name)?;

        let now = Utc::now();
        let store = Store {
            id: id.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        // Atomic entry API prevents a check-then-insert race.
        use dashmap::mapref::entry::Entry;
        match self.stores.entry(id.to_string()) {
            Entry::Occupied(_) => Err(StorageError::StoreAlreadyExists {
                store_id: id.to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(store.clone());
                Ok(store)
            }
        }
    }

    async fn get_store(&self, id: &str) -> StorageResult<Store> {
        self.stores
            .get(id)
            .filter(|s| s.deleted_at.is_none())
            .map(|s| s.value().clone())
            .ok_or_else(|| StorageError::StoreNotFound {
                store_id: id.to_string(),
            })
    }

    async fn delete_store(&self, id: &str) -> StorageResult<()> {
        let mut entry = self
            .stores
            .get_mut(id)
            .ok_or_else(|| StorageError::StoreNotFound {
                store_id: id.to_string(),
            })?;
        if entry.deleted_at.is_some() {
            return Err(StorageError::StoreNotFound {
                store_id: id.to_string(),
            });
        }
        entry.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn list_stores(
        &self,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<Store>> {
        let mut stores: Vec<Store> = self
            .stores
            .iter()
            .filter(|s| s.deleted_at.is_none())
            .map(|s| s.value().clone())
            .collect();
        stores.sort_by(|a, b| a.id.cmp(&b.id));

        if let Some(ref token) = pagination.continuation_token {
            let token = ContinuationToken::parse(token)?;
            stores.retain(|s| s.id >= token.ulid);
        }

        let page_size = pagination.resolved_page_size();
        let continuation_token = if stores.len() > page_size {
            Some(ContinuationToken::new(stores[page_size].id.clone(), "").encode())
        } else {
            None
        };
        stores.truncate(page_size);

        Ok(PaginatedResult {
            items: stores,
            continuation_token,
        })
    }

    async fn read(&self, store_id: &str, filter: &TupleFilter) -> StorageResult<TupleIteratorBox> {
        let tuples: Vec<Tuple> = self
            .filtered_records(store_id, filter)?
            .into_iter()
            .map(TupleRecord::into_tuple)
            .collect();
        Ok(Box::new(StaticIterator::new(tuples)))
    }

    async fn read_page(
        &self,
        store_id: &str,
        filter: &TupleFilter,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<Tuple>> {
        let mut records = self.filtered_records(store_id, filter)?;
        records.sort_by(|a, b| a.ulid.cmp(&b.ulid));

        if let Some(ref token) = pagination.continuation_token {
            let token = ContinuationToken::parse(token)?;
            records.retain(|r| r.ulid >= token.ulid);
        }

        let page_size = pagination.resolved_page_size();
        let continuation_token = if records.len() > page_size {
            Some(ContinuationToken::new(records[page_size].ulid.clone(), "").encode())
        } else {
            None
        };
        records.truncate(page_size);

        Ok(PaginatedResult {
            items: records.into_iter().map(TupleRecord::into_tuple).collect(),
            continuation_token,
        })
    }

    async fn read_user_tuple(&self, store_id: &str, key: &TupleKey) -> StorageResult<Tuple> {
        self.tuples
            .get(store_id)
            .and_then(|records| {
                records
                    .iter()
                    .find(|r| r.matches_key(key))
                    .cloned()
                    .map(TupleRecord::into_tuple)
            })
            .ok_or_else(|| StorageError::TupleNotFound {
                object: key.object.clone(),
                relation: key.relation.clone(),
                user: key.user.clone(),
            })
    }

    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: &ReadUsersetTuplesFilter,
    ) -> StorageResult<TupleIteratorBox> {
        let (object_type, object_id) = split_object(&filter.object);

        let tuples: Vec<Tuple> = self
            .tuples
            .get(store_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| {
                        (object_type.is_empty() || r.object_type == object_type)
                            && (object_id.is_empty() || r.object_id == object_id)
                            && (filter.relation.is_empty() || r.relation == filter.relation)
                            && matches_user_type_restrictions(
                                r,
                                &filter.allowed_user_type_restrictions,
                            )
                    })
                    .cloned()
                    .map(TupleRecord::into_tuple)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::new(StaticIterator::new(tuples)))
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &ReadStartingWithUserFilter,
    ) -> StorageResult<TupleIteratorBox> {
        let mut children: Vec<TupleIteratorBox> = Vec::with_capacity(filter.user_filter.len());

        for user in &filter.user_filter {
            let (user_object_type, user_object_id) = split_object(&user.object);
            let user_relation = user.relation.as_deref();

            let tuples: Vec<Tuple> = self
                .tuples
                .get(store_id)
                .map(|records| {
                    records
                        .iter()
                        .filter(|r| {
                            r.object_type == filter.object_type
                                && r.relation == filter.relation
                                && r.user_object_type == user_object_type
                                && r.user_object_id == user_object_id
                                && r.user_relation.as_deref() == user_relation
                        })
                        .cloned()
                        .map(TupleRecord::into_tuple)
                        .collect()
                })
                .unwrap_or_default();

            children.push(Box::new(StaticIterator::new(tuples)));
        }

        Ok(Box::new(CombinedIterator::new(children)))
    }

    #[instrument(skip(self, deletes, writes), fields(store_id = %store_id))]
    async fn write(
        &self,
        store_id: &str,
        deletes: Vec<TupleKey>,
        writes: Vec<TupleKey>,
    ) -> StorageResult<()> {
        if deletes.len() + writes.len() > self.max_tuples_per_write {
            return Err(StorageError::ExceededWriteBatchLimit {
                limit: self.max_tuples_per_write,
            });
        }
        for key in deletes.iter().chain(writes.iter()) {
            validate_tuple_key(key)?;
        }

        let now = Utc::now();
        let mut entry = self.tuples.entry(store_id.to_string()).or_default();

        // Stage the batch against a working copy so a failed mutation
        // leaves nothing applied.
        let mut working = entry.value().clone();
        let mut changes: Vec<ChangeRecord> = Vec::with_capacity(deletes.len() + writes.len());

        for key in &deletes {
            let position = working.iter().position(|r| r.matches_key(key)).ok_or_else(|| {
                StorageError::TupleNotFound {
                    object: key.object.clone(),
                    relation: key.relation.clone(),
                    user: key.user.clone(),
                }
            })?;
            let removed = working.remove(position);
            let ulid = self.next_ulid()?;
            changes.push(ChangeRecord {
                ulid,
                object_type: removed.object_type.clone(),
                change: TupleChange {
                    tuple_key: TupleKey::new(
                        key.object.clone(),
                        key.relation.clone(),
                        key.user.clone(),
                    ),
                    operation: TupleOperation::Delete,
                    timestamp: now,
                },
            });
        }

        for key in &writes {
            if working.iter().any(|r| r.matches_key(key)) {
                return Err(StorageError::DuplicateTuple {
                    object: key.object.clone(),
                    relation: key.relation.clone(),
                    user: key.user.clone(),
                });
            }
            let ulid = self.next_ulid()?;
            let record = TupleRecord::from_key(key, ulid.clone(), now);
            changes.push(ChangeRecord {
                ulid,
                object_type: record.object_type.clone(),
                change: TupleChange {
                    tuple_key: TupleKey::new(
                        key.object.clone(),
                        key.relation.clone(),
                        key.user.clone(),
                    ),
                    operation: TupleOperation::Write,
                    timestamp: now,
                },
            });
            working.push(record);
        }

        *entry = working;
        drop(entry);

        self.changelog
            .entry(store_id.to_string())
            .or_default()
            .extend(changes);

        Ok(())
    }

    fn max_tuples_per_write(&self) -> usize {
        self.max_tuples_per_write
    }

    async fn write_authorization_model(
        &self,
        store_id: &str,
        model: &AuthorizationModel,
    ) -> StorageResult<()> {
        if model.type_definitions.len() > self.max_types_per_authorization_model {
            return Err(StorageError::ExceededMaxTypeDefinitions {
                limit: self.max_types_per_authorization_model,
            });
        }

        self.models
            .entry(store_id.to_string())
            .or_default()
            .push(model.clone());
        Ok(())
    }

    async fn read_authorization_model(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> StorageResult<AuthorizationModel> {
        self.models
            .get(store_id)
            .and_then(|models| models.iter().find(|m| m.id == model_id).cloned())
            .ok_or_else(|| StorageError::ModelNotFound {
                model_id: model_id.to_string(),
            })
    }

    async fn read_authorization_models(
        &self,
        store_id: &str,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<AuthorizationModel>> {
        let mut models: Vec<AuthorizationModel> = self
            .models
            .get(store_id)
            .map(|models| models.iter().cloned().collect())
            .unwrap_or_default();
        models.sort_by(|a, b| b.id.cmp(&a.id));

        if let Some(ref token) = pagination.continuation_token {
            let token = ContinuationToken::parse(token)?;
            models.retain(|m| m.id <= token.ulid);
        }

        let page_size = pagination.resolved_page_size();
        let continuation_token = if models.len() > page_size {
            Some(ContinuationToken::new(models[page_size].id.clone(), "").encode())
        } else {
            None
        };
        models.truncate(page_size);

        Ok(PaginatedResult {
            items: models,
            continuation_token,
        })
    }

    async fn find_latest_authorization_model_id(&self, store_id: &str) -> StorageResult<String> {
        self.models
            .get(store_id)
            .and_then(|models| models.iter().map(|m| m.id.clone()).max())
            .ok_or_else(|| StorageError::ModelNotFound {
                model_id: format!("latest model for store {store_id}"),
            })
    }

    fn max_types_per_authorization_model(&self) -> usize {
        self.max_types_per_authorization_model
    }

    async fn write_assertions(
        &self,
        store_id: &str,
        model_id: &str,
        assertions: Vec<Assertion>,
    ) -> StorageResult<()> {
        self.assertions
            .insert((store_id.to_string(), model_id.to_string()), assertions);
        Ok(())
    }

    async fn read_assertions(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> StorageResult<Vec<Assertion>> {
        Ok(self
            .assertions
            .get(&(store_id.to_string(), model_id.to_string()))
            .map(|a| a.value().clone())
            .unwrap_or_default())
    }

    async fn read_changes(
        &self,
        store_id: &str,
        object_type_filter: &str,
        pagination: &PaginationOptions,
        horizon_offset: std::time::Duration,
    ) -> StorageResult<(Vec<TupleChange>, String)> {
        let cursor = match pagination.continuation_token {
            Some(ref token) => {
                let token = ContinuationToken::parse(token)?;
                if token.object_type != object_type_filter {
                    return Err(StorageError::MismatchObjectType);
                }
                Some(token.ulid)
            }
            None => None,
        };

        let horizon = chrono::Duration::from_std(horizon_offset).map_err(|e| {
            StorageError::InternalError {
                message: format!("horizon offset out of range: {e}"),
            }
        })?;
        let cutoff: DateTime<Utc> = Utc::now() - horizon;

        let mut records: Vec<ChangeRecord> = self
            .changelog
            .get(store_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| {
                        r.change.timestamp < cutoff
                            && (object_type_filter.is_empty()
                                || r.object_type == object_type_filter)
                            && cursor.as_ref().map_or(true, |cursor| &r.ulid > cursor)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        records.sort_by(|a, b| {
            a.change
                .timestamp
                .cmp(&b.change.timestamp)
                .then_with(|| a.ulid.cmp(&b.ulid))
        });
        records.truncate(pagination.resolved_page_size());

        let last_ulid = match records.last() {
            Some(last) => last.ulid.clone(),
            None => return Err(StorageError::NotFound),
        };

        let token = ContinuationToken::new(last_ulid, object_type_filter).encode();
        Ok((records.into_iter().map(|r| r.change).collect(), token))
    }

    async fn is_ready(&self) -> StorageResult<bool> {
        Ok(true)
    }
}

fn matches_user_type_restrictions(
    record: &TupleRecord,
    restrictions: &[RelationReference],
) -> bool {
    if restrictions.is_empty() {
        // No restrictions: any userset or typed-wildcard user qualifies.
        return record.user_relation.is_some() || record.user_object_id == "*";
    }
    restrictions.iter().any(|restriction| match restriction {
        RelationReference::Relation {
            user_type,
            relation,
        } => {
            &record.user_object_type == user_type
                && record.user_relation.as_deref() == Some(relation)
        }
        RelationReference::Wildcard { user_type } => {
            &record.user_object_type == user_type && record.user_object_id == "*"
        }
    })
}
