//! Lazy forward cursors over stored records.
//!
//! All iterator variants share one minimal capability set (`head`, `next`,
//! `stop`) behind a single polymorphic contract. Iterators are
//! single-consumer, forward-only, and not restartable; `stop` releases
//! backend resources and is safe to call once, after which every call
//! returns [`StorageError::IteratorDone`].

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{StorageError, StorageResult};
use crate::tuple::{Tuple, TupleCondition, TupleKey};

/// Forward cursor over records of type `T`.
///
/// Not thread-safe: a single iterator must have a single consumer.
#[async_trait]
pub trait RecordIterator<T>: Send {
    /// Advances the cursor and returns the consumed element, or
    /// [`StorageError::IteratorDone`] once exhausted or stopped.
    async fn next(&mut self) -> StorageResult<T>;

    /// Returns the element the next `next` call would return without
    /// consuming it. Idempotent until `next` is called.
    async fn head(&mut self) -> StorageResult<T>;

    /// Releases backend resources held by the cursor.
    fn stop(&mut self);
}

/// Boxed tuple iterator as returned by the datastore read paths.
pub type TupleIteratorBox = Box<dyn RecordIterator<Tuple>>;

/// Iterator over an already-materialized buffer.
#[derive(Debug)]
pub struct StaticIterator<T> {
    items: VecDeque<T>,
    stopped: bool,
}

impl<T> StaticIterator<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
            stopped: false,
        }
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> RecordIterator<T> for StaticIterator<T> {
    async fn next(&mut self) -> StorageResult<T> {
        if self.stopped {
            return Err(StorageError::IteratorDone);
        }
        self.items.pop_front().ok_or(StorageError::IteratorDone)
    }

    async fn head(&mut self) -> StorageResult<T> {
        if self.stopped {
            return Err(StorageError::IteratorDone);
        }
        self.items.front().cloned().ok_or(StorageError::IteratorDone)
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.items.clear();
    }
}

/// Union of child iterators, drained in order.
///
/// The draining order is deterministic but otherwise unspecified; callers
/// treat the result as a set. `stop` stops every child, including children
/// already exhausted.
pub struct CombinedIterator<T> {
    children: VecDeque<Box<dyn RecordIterator<T>>>,
    stopped: bool,
}

impl<T> CombinedIterator<T> {
    pub fn new(children: Vec<Box<dyn RecordIterator<T>>>) -> Self {
        Self {
            children: children.into(),
            stopped: false,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> RecordIterator<T> for CombinedIterator<T> {
    async fn next(&mut self) -> StorageResult<T> {
        if self.stopped {
            return Err(StorageError::IteratorDone);
        }
        while let Some(child) = self.children.front_mut() {
            match child.next().await {
                Ok(item) => return Ok(item),
                Err(StorageError::IteratorDone) => {
                    self.children.pop_front();
                }
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::IteratorDone)
    }

    async fn head(&mut self) -> StorageResult<T> {
        if self.stopped {
            return Err(StorageError::IteratorDone);
        }
        while let Some(child) = self.children.front_mut() {
            match child.head().await {
                Ok(item) => return Ok(item),
                Err(StorageError::IteratorDone) => {
                    self.children.pop_front();
                }
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::IteratorDone)
    }

    fn stop(&mut self) {
        for child in &mut self.children {
            child.stop();
        }
        self.children.clear();
        self.stopped = true;
    }
}

/// Minimal cached form of a tuple for a known `(object, relation)`.
///
/// A caching layer above the datastore may hold these instead of full
/// tuples to cut memory and serialization cost on re-reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTuple {
    pub user: String,
    pub condition: Option<TupleCondition>,
    pub timestamp: DateTime<Utc>,
}

/// Adapter that materializes full tuples from cached minimal records.
///
/// The output is indistinguishable from a direct backend read of the same
/// `(object, relation)`: the stored user, condition, and timestamp are
/// preserved verbatim, and the fixed object and relation are injected into
/// every yielded key.
pub struct CachedTupleIterator {
    object: String,
    relation: String,
    iter: Box<dyn RecordIterator<CachedTuple>>,
}

impl CachedTupleIterator {
    pub fn new(
        object: impl Into<String>,
        relation: impl Into<String>,
        iter: Box<dyn RecordIterator<CachedTuple>>,
    ) -> Self {
        Self {
            object: object.into(),
            relation: relation.into(),
            iter,
        }
    }

    fn materialize(&self, cached: CachedTuple) -> Tuple {
        Tuple {
            key: TupleKey {
                object: self.object.clone(),
                relation: self.relation.clone(),
                user: cached.user,
                condition: cached.condition,
            },
            timestamp: cached.timestamp,
        }
    }
}

#[async_trait]
impl RecordIterator<Tuple> for CachedTupleIterator {
    async fn next(&mut self) -> StorageResult<Tuple> {
        let cached = self.iter.next().await?;
        Ok(self.materialize(cached))
    }

    async fn head(&mut self) -> StorageResult<Tuple> {
        let cached = self.iter.head().await?;
        Ok(self.materialize(cached))
    }

    fn stop(&mut self) {
        self.iter.stop();
    }
}

/// Drains an iterator into a vector, stopping it afterwards.
pub async fn collect_all<T>(mut iter: Box<dyn RecordIterator<T>>) -> StorageResult<Vec<T>> {
    let mut items = Vec::new();
    loop {
        match iter.next().await {
            Ok(item) => items.push(item),
            Err(StorageError::IteratorDone) => break,
            Err(e) => {
                iter.stop();
                return Err(e);
            }
        }
    }
    iter.stop();
    Ok(items)
}
