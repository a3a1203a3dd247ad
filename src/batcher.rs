use std::{
    fmt::{self, Debug, Formatter},
    hash::Hash,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
};

use crossbeam::channel::{self, Sender};

use crate::{
    batch::{PendingBatch, Query},
    config::BatchConfig,
    error::{LoadError, StartError},
    executor::{self, BatchFn},
    future::{self, LoadFuture, LoadResult},
    scheduler::Scheduler,
};

/// The batching engine on its own, without deduplication across calls.
///
/// A `QueryBatcher` owns a scheduler thread and `max_concurrent_batches`
/// executor threads. Every call to [`load_future`][QueryBatcher::load_future]
/// submits a fresh query; queries that arrive while every executor slot is
/// busy are accumulated into the next batch. Several queries for the same key
/// in one batch are fetched once, but the batcher keeps no memory of past
/// results; see [`Loader`][crate::Loader] for that.
///
/// The threads are shut down by [`close`][QueryBatcher::close], which is
/// also called when the batcher is dropped. Fetches already handed to an
/// executor slot run to completion and still deliver their results.
pub struct QueryBatcher<Key, Value: Clone, Error: Clone> {
    intake: Sender<Query<Key, Value, Error>>,

    // Dropping this sender is the shutdown signal.
    shutdown: Mutex<Option<Sender<()>>>,
    closed: AtomicBool,
}

impl<Key, Value, Error> QueryBatcher<Key, Value, Error>
where
    Key: Eq + Hash + Clone + Send + 'static,
    Value: Clone + Send + Sync + 'static,
    Error: Clone + Send + Sync + 'static,
{
    /// Validate `config`, then start the scheduler and executor threads.
    pub fn new<Batcher>(config: BatchConfig, batcher: Batcher) -> Result<Self, StartError>
    where
        Batcher: BatchFn<Key, Value, Error>,
    {
        let limits = config.validate()?;

        let (intake_tx, intake_rx) = channel::bounded(0);
        let (dispatch_tx, dispatch_rx) = channel::bounded::<PendingBatch<Key, Value, Error>>(0);
        let (shutdown_tx, shutdown_rx) = channel::bounded(0);

        let batcher = Arc::new(batcher);

        // Executors first: if one fails to spawn, dropping `dispatch_tx` on
        // the way out stops the ones that did.
        for slot in 0..limits.max_concurrent_batches.get() {
            let batcher = batcher.clone();
            let ready = dispatch_rx.clone();

            thread::Builder::new()
                .name(format!("batch-executor-{}", slot))
                .spawn(move || executor::run_slot(slot, batcher, ready))
                .map_err(|source| StartError::Spawn {
                    role: "batch executor",
                    source,
                })?;
        }

        let scheduler = Scheduler {
            max_batch_size: limits.max_batch_size,
            intake: intake_rx,
            dispatch: dispatch_tx,
            shutdown: shutdown_rx,
        };

        thread::Builder::new()
            .name(String::from("batch-scheduler"))
            .spawn(move || scheduler.run())
            .map_err(|source| StartError::Spawn {
                role: "batch scheduler",
                source,
            })?;

        Ok(Self {
            intake: intake_tx,
            shutdown: Mutex::new(Some(shutdown_tx)),
            closed: AtomicBool::new(false),
        })
    }

    /// Submit a query for `key`, and return a handle to its result.
    ///
    /// This blocks while the scheduler isn't accepting queries: when a full
    /// batch is waiting for an executor slot, new submissions wait too. Once
    /// the batcher is closed, the returned future is already resolved with
    /// [`LoadError::MissingResponse`].
    pub fn load_future(&self, key: Key) -> LoadFuture<Value, Error> {
        let (promise, future) = future::pair();
        self.submit(Query { key, promise });
        future
    }

    /// Load the value for `key`, blocking the current thread until it is
    /// available.
    pub fn load(&self, key: Key) -> LoadResult<Value, Error> {
        self.load_future(key).wait()
    }

    /// Hand a query to the scheduler. If it can't be delivered, it is
    /// rejected with `MissingResponse` right away.
    pub(crate) fn submit(&self, query: Query<Key, Value, Error>) {
        if self.is_closed() {
            query.promise.resolve(Err(LoadError::MissingResponse));
            return;
        }

        if let Err(channel::SendError(query)) = self.intake.send(query) {
            tracing::trace!("batch scheduler has stopped; rejecting query");
            query.promise.resolve(Err(LoadError::MissingResponse));
        }
    }
}

impl<Key, Value: Clone, Error: Clone> QueryBatcher<Key, Value, Error> {
    /// Stop accepting queries. Queries still waiting in an undispatched batch
    /// resolve with [`LoadError::MissingResponse`]; batches already running
    /// finish normally. Calling this more than once has no further effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        drop(sender);
        tracing::debug!("query batcher closed");
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<Key, Value: Clone, Error: Clone> Drop for QueryBatcher<Key, Value, Error> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<Key, Value: Clone, Error: Clone> Debug for QueryBatcher<Key, Value, Error> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBatcher")
            .field("closed", &self.is_closed())
            .finish()
    }
}
