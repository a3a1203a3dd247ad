//! The batch executor pool: a fixed set of slot threads, each taking one
//! ready batch at a time from the scheduler and running the fetch function
//! for it.

use std::{
    future::Future,
    hash::Hash,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use crossbeam::channel::Receiver;
use futures::executor::block_on;

use crate::{
    batch::PendingBatch,
    data::{Fetched, KeySet},
    error::{FetchPanic, LoadError},
};

/// A fetch function: given a set of distinct keys, produce a value or an
/// error for each of them.
///
/// This is implemented for any `Fn(KeySet<Key>) -> impl Future<Output =
/// Fetched<..>>` closure that can be shared between threads, so most callers
/// never implement it by hand:
///
/// ```
/// use batchcoalesce::{BatchConfig, Fetched, KeySet, Loader};
/// use futures::future;
///
/// let loader = Loader::new(BatchConfig::default(), |keys: KeySet<u32>| {
///     let values = keys.into_iter().map(|key| (key, key * 10)).collect();
///     future::ready(Fetched::<_, _, ()>::from_values(values))
/// })
/// .unwrap();
///
/// assert_eq!(loader.load(4), Ok(40));
/// ```
///
/// The returned future is driven to completion on the executor slot's own
/// thread by a minimal executor, not on an application runtime. It must
/// therefore be runtime-agnostic (`futures-timer` rather than a
/// runtime-specific sleep, for instance), or do its blocking work inline
/// and return a ready future.
///
/// If creating or polling the future panics, every key in the batch resolves
/// with [`LoadError::Panicked`], and the slot moves on to the next batch.
pub trait BatchFn<Key: Eq + Hash, Value, Error>: Send + Sync + 'static {
    type Fut: Future<Output = Fetched<Key, Value, Error>>;

    fn load(&self, keys: KeySet<Key>) -> Self::Fut;
}

impl<Key, Value, Error, F, Fut> BatchFn<Key, Value, Error> for F
where
    Key: Eq + Hash,
    F: Fn(KeySet<Key>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Fetched<Key, Value, Error>>,
{
    type Fut = Fut;

    #[inline]
    fn load(&self, keys: KeySet<Key>) -> Fut {
        self(keys)
    }
}

/// The body of one executor slot thread. Returns when the scheduler drops
/// the dispatch channel.
pub(crate) fn run_slot<Key, Value, Error, Batcher>(
    slot: usize,
    batcher: Arc<Batcher>,
    ready: Receiver<PendingBatch<Key, Value, Error>>,
) where
    Key: Eq + Hash + Clone,
    Value: Clone,
    Error: Clone,
    Batcher: BatchFn<Key, Value, Error>,
{
    tracing::debug!(slot, "batch executor started");

    for batch in ready.iter() {
        execute(&*batcher, batch);
    }

    tracing::debug!(slot, "batch executor stopped");
}

/// Fetch one batch and resolve every waiter in it. A panic in the fetch
/// function is contained here.
pub(crate) fn execute<Key, Value, Error, Batcher>(
    batcher: &Batcher,
    batch: PendingBatch<Key, Value, Error>,
) where
    Key: Eq + Hash + Clone,
    Value: Clone,
    Error: Clone,
    Batcher: BatchFn<Key, Value, Error> + ?Sized,
{
    let keys = batch.key_set();
    let requested = keys.len();

    // The batch itself stays outside the unwind boundary, so it is always
    // available to reject if the fetch function panics.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| block_on(batcher.load(keys))));

    match outcome {
        Ok(fetched) => {
            let missing = batch.resolve_all(fetched);

            if missing > 0 {
                tracing::warn!(
                    requested,
                    missing,
                    "fetch function returned neither a value nor an error for some keys"
                );
            } else {
                tracing::trace!(requested, "fetched batch");
            }
        }
        Err(payload) => {
            let fault = FetchPanic::from_payload(payload);
            tracing::error!(requested, error = %fault, "fetch function panicked");
            batch.reject_all(LoadError::Panicked(fault));
        }
    }
}
