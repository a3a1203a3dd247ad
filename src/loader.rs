use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    hash::Hash,
    sync::{PoisonError, RwLock, RwLockReadGuard},
};

use crate::{
    batch::Query,
    batcher::QueryBatcher,
    config::BatchConfig,
    error::StartError,
    executor::BatchFn,
    future::{self, LoadFuture, LoadResult},
};

/// A coalescing loader: a [`QueryBatcher`] plus a cache of every future it
/// has handed out.
///
/// The first lookup of a key submits a query; every later lookup of that key,
/// for the lifetime of the loader, gets a handle to the same result. That
/// includes errors: a key whose fetch failed keeps failing with the same
/// error, and is never fetched again. The cache is never evicted; create a
/// new loader (per request, say) to start fresh.
///
/// ```
/// use batchcoalesce::{BatchConfig, Fetched, KeySet, Loader};
/// use futures::future;
///
/// let loader = Loader::new(BatchConfig::default(), |keys: KeySet<String>| {
///     let values = keys
///         .into_iter()
///         .map(|key| {
///             let reversed = key.chars().rev().collect::<String>();
///             (key, reversed)
///         })
///         .collect();
///
///     future::ready(Fetched::<_, _, String>::from_values(values))
/// })
/// .unwrap();
///
/// let first = loader.load_future(String::from("lorem"));
/// let second = loader.load_future(String::from("lorem"));
/// assert!(first.ptr_eq(&second));
///
/// assert_eq!(first.wait(), Ok(String::from("merol")));
/// ```
pub struct Loader<Key, Value: Clone, Error: Clone> {
    batcher: QueryBatcher<Key, Value, Error>,
    cache: RwLock<HashMap<Key, LoadFuture<Value, Error>>>,
}

impl<Key, Value, Error> Loader<Key, Value, Error>
where
    Key: Eq + Hash + Clone + Send + 'static,
    Value: Clone + Send + Sync + 'static,
    Error: Clone + Send + Sync + 'static,
{
    pub fn new<Batcher>(config: BatchConfig, batcher: Batcher) -> Result<Self, StartError>
    where
        Batcher: BatchFn<Key, Value, Error>,
    {
        Ok(Self {
            batcher: QueryBatcher::new(config, batcher)?,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Get a handle to the result for `key`, submitting a query only if no
    /// earlier lookup of `key` exists.
    pub fn load_future(&self, key: Key) -> LoadFuture<Value, Error> {
        // Fast path: a shared lock, so cache hits never serialize behind one
        // another.
        if let Some(future) = self.read_cache().get(&key) {
            return future.clone();
        }

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);

        // Someone else may have inserted this key between our two locks.
        if let Some(future) = cache.get(&key) {
            return future.clone();
        }

        let (promise, future) = future::pair();
        cache.insert(key.clone(), future.clone());
        drop(cache);

        // Submission can block on backpressure, so it happens outside the
        // lock. Anyone who finds the new entry in the meantime just waits on
        // the same result.
        self.batcher.submit(Query { key, promise });
        future
    }

    /// Load the value for `key`, blocking the current thread until it is
    /// available. There is no timeout.
    pub fn load(&self, key: Key) -> LoadResult<Value, Error> {
        self.load_future(key).wait()
    }

    /// Load several keys. Every lookup is issued before any is waited on, so
    /// they can share batches. Results are in the same order as `keys`.
    pub fn load_many(
        &self,
        keys: impl IntoIterator<Item = Key>,
    ) -> Vec<LoadResult<Value, Error>> {
        let futures: Vec<_> = keys.into_iter().map(|key| self.load_future(key)).collect();
        futures.iter().map(LoadFuture::wait).collect()
    }
}

impl<Key, Value: Clone, Error: Clone> Loader<Key, Value, Error> {
    /// Close the underlying batcher. The cache is kept: keys that were
    /// already looked up keep their results (or, if they were still waiting
    /// in an undispatched batch, resolve with
    /// [`LoadError::MissingResponse`][crate::LoadError::MissingResponse]).
    /// Keys looked up for the first time after closing resolve with
    /// `MissingResponse`.
    pub fn close(&self) {
        self.batcher.close()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.batcher.is_closed()
    }

    /// The number of distinct keys ever looked up through this loader.
    pub fn cached_len(&self) -> usize {
        self.read_cache().len()
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, HashMap<Key, LoadFuture<Value, Error>>> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<Key, Value: Clone, Error: Clone> Debug for Loader<Key, Value, Error> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("batcher", &self.batcher)
            .field("cached_keys", &self.cached_len())
            .finish()
    }
}
