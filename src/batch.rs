use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    hash::Hash,
};

use crate::{
    data::{Fetched, KeySet},
    error::LoadError,
    future::Promise,
};

/// One caller's request: the key, and the write side of the caller's future.
pub(crate) struct Query<Key, Value: Clone, Error: Clone> {
    pub key: Key,
    pub promise: Promise<Value, Error>,
}

impl<Key: Debug, Value: Clone, Error: Clone> Debug for Query<Key, Value, Error> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("key", &self.key)
            .field("promise", &self.promise)
            .finish()
    }
}

/// The batch currently being accumulated by the scheduler: every distinct
/// key awaiting a fetch, with the promises of every query for that key, in
/// arrival order.
///
/// A batch is owned by exactly one party at a time. The scheduler loop owns
/// it while it accumulates; dispatch moves it through the channel to one
/// executor slot, which consumes it with `resolve_all` or `reject_all`.
pub(crate) struct PendingBatch<Key, Value: Clone, Error: Clone> {
    waiting: HashMap<Key, Vec<Promise<Value, Error>>>,
}

impl<Key, Value, Error> PendingBatch<Key, Value, Error>
where
    Key: Eq + Hash,
    Value: Clone,
    Error: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            waiting: HashMap::new(),
        }
    }

    /// Add a query. A key already in the batch gets another waiter; it does
    /// not count against the batch size.
    pub(crate) fn add(&mut self, query: Query<Key, Value, Error>) {
        self.waiting
            .entry(query.key)
            .or_insert_with(|| Vec::with_capacity(1))
            .push(query.promise);
    }

    /// The number of distinct keys in this batch.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.waiting.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// The number of queries (waiters) in this batch, including duplicates.
    pub(crate) fn waiters(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    /// Distribute a fetch result to every waiter. Each key's waiters get its
    /// value, or its error, or `MissingResponse` if the fetch function didn't
    /// account for it. Returns the number of keys that were missing.
    pub(crate) fn resolve_all(self, mut fetched: Fetched<Key, Value, Error>) -> usize {
        let mut missing = 0;

        for (key, promises) in self.waiting {
            match fetched.take(&key) {
                Some(Ok(value)) => resolve_each(promises, value, Ok),
                Some(Err(err)) => resolve_each(promises, err, |err| Err(LoadError::Fetch(err))),
                None => {
                    missing += 1;
                    resolve_each(promises, LoadError::MissingResponse, Err);
                }
            }
        }

        if fetched.leftover() > 0 {
            tracing::trace!(
                unrequested = fetched.leftover(),
                "fetch function returned keys that weren't requested"
            );
        }

        missing
    }

    /// Resolve every waiter in this batch with the same error.
    pub(crate) fn reject_all(self, error: LoadError<Error>) {
        for promises in self.waiting.into_values() {
            resolve_each(promises, error.clone(), Err);
        }
    }
}

impl<Key: Eq + Hash + Clone, Value: Clone, Error: Clone> PendingBatch<Key, Value, Error> {
    pub(crate) fn key_set(&self) -> KeySet<Key> {
        KeySet::from_distinct(self.waiting.keys().cloned().collect())
    }
}

impl<Key: Eq + Hash, Value: Clone, Error: Clone> Default for PendingBatch<Key, Value, Error> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Key: Debug, Value: Clone, Error: Clone> Debug for PendingBatch<Key, Value, Error> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.waiting.iter().map(|(key, promises)| (key, promises.len())))
            .finish()
    }
}

/// Give `item` to every promise, cloning it for all but the last one. In the
/// common case of a single waiter per key, no clone happens at all.
fn resolve_each<T: Clone, Value: Clone, Error: Clone>(
    promises: Vec<Promise<Value, Error>>,
    item: T,
    into_result: impl Fn(T) -> Result<Value, LoadError<Error>>,
) {
    let mut promises = promises.into_iter();
    let last = promises.next_back();

    for promise in promises {
        promise.resolve(into_result(item.clone()));
    }

    if let Some(promise) = last {
        promise.resolve(into_result(item));
    }
}
