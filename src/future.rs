//! The one-shot, multi-reader result cell shared by a query and its callers.
//!
//! The write side ([`Promise`]) travels with the query through the scheduler
//! and into an executor slot; the read side ([`LoadFuture`]) is handed to the
//! caller, and can be cloned freely (the coalescing loader hands out one clone
//! per lookup of the same key).

use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    mem,
    pin::Pin,
    sync::{Arc, Condvar, Mutex, PoisonError},
    task::{Context, Poll},
};

use arc_swap::ArcSwapOption;

use crate::{
    error::LoadError,
    wakerset::{Token as WakerToken, WakerSet},
};

/// The result of a single load: the value, or why there isn't one.
pub type LoadResult<Value, Error> = Result<Value, LoadError<Error>>;

struct Cell<Value, Error> {
    // Written once, under the `waiters` lock, then read lock-free by every
    // handle.
    result: ArcSwapOption<LoadResult<Value, Error>>,

    // Async waiters register a waker here; blocking waiters park on
    // `resolved`. Both are released when the result is written.
    waiters: Mutex<WakerSet>,
    resolved: Condvar,
}

impl<Value: Clone, Error: Clone> Cell<Value, Error> {
    fn new() -> Self {
        Self {
            result: ArcSwapOption::empty(),
            waiters: Mutex::new(WakerSet::default()),
            resolved: Condvar::new(),
        }
    }

    fn get(&self) -> Option<LoadResult<Value, Error>> {
        self.result.load_full().map(|result| (*result).clone())
    }

    /// Write the result. The first write wins; any later write is ignored
    /// and reported by returning false.
    fn set(&self, result: LoadResult<Value, Error>) -> bool {
        let mut guard = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);

        if self.result.load().is_some() {
            return false;
        }

        self.result.store(Some(Arc::new(result)));
        let wakers = mem::take(&mut *guard);
        drop(guard);

        self.resolved.notify_all();
        wakers.wake_all();
        true
    }
}

/// Create a linked write/read pair for a new query.
pub(crate) fn pair<Value: Clone, Error: Clone>(
) -> (Promise<Value, Error>, LoadFuture<Value, Error>) {
    let cell = Arc::new(Cell::new());

    (
        Promise { cell: cell.clone() },
        LoadFuture {
            cell,
            waker_token: None,
        },
    )
}

/// The write half of a [`LoadFuture`].
///
/// A promise that is dropped without being resolved resolves its future with
/// [`LoadError::MissingResponse`], so a query lost on any path (a closed
/// channel, an unwinding thread) never leaves its callers waiting.
pub(crate) struct Promise<Value: Clone, Error: Clone> {
    cell: Arc<Cell<Value, Error>>,
}

impl<Value: Clone, Error: Clone> Promise<Value, Error> {
    pub(crate) fn resolve(self, result: LoadResult<Value, Error>) -> bool {
        self.cell.set(result)
    }
}

impl<Value: Clone, Error: Clone> Drop for Promise<Value, Error> {
    fn drop(&mut self) {
        if self.cell.set(Err(LoadError::MissingResponse)) {
            tracing::trace!("query dropped before it was resolved");
        }
    }
}

impl<Value: Clone, Error: Clone> Debug for Promise<Value, Error> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("resolved", &self.cell.result.load().is_some())
            .finish()
    }
}

/// A handle to the pending result of a single key lookup.
///
/// A `LoadFuture` can be waited on in two ways:
/// - [`wait`][LoadFuture::wait] blocks the current thread until the result
///   is available.
/// - `.await` (it implements [`Future`]) suspends the current task instead.
///   No particular async runtime is required; the executor slot that
///   resolves the result wakes the task directly.
///
/// Clones share the same result; every handle observes an identical value or
/// error. Unlike most futures, a `LoadFuture` may be polled again after it
/// completes, and yields (a clone of) the same result each time.
pub struct LoadFuture<Value: Clone, Error: Clone> {
    cell: Arc<Cell<Value, Error>>,
    waker_token: Option<WakerToken>,
}

impl<Value: Clone, Error: Clone> LoadFuture<Value, Error> {
    /// Block the current thread until the result is available. There is no
    /// timeout; bound the fetch function itself if one is needed.
    pub fn wait(&self) -> LoadResult<Value, Error> {
        if let Some(result) = self.cell.get() {
            return result;
        }

        let mut guard = self
            .cell
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if let Some(result) = self.cell.get() {
                return result;
            }

            guard = self
                .cell
                .resolved
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Get the result if it is already available, without waiting.
    pub fn try_get(&self) -> Option<LoadResult<Value, Error>> {
        self.cell.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.result.load().is_some()
    }

    /// Returns true if both handles share the same underlying result.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    #[cfg(test)]
    pub(crate) fn registered_wakers(&self) -> usize {
        self.cell
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<Value: Clone, Error: Clone> Clone for LoadFuture<Value, Error> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            waker_token: None,
        }
    }
}

impl<Value: Clone, Error: Clone> Future for LoadFuture<Value, Error> {
    type Output = LoadResult<Value, Error>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let unpinned = Pin::into_inner(self);

        if let Some(result) = unpinned.cell.get() {
            // The waker set was drained when the result was written, so our
            // token (if any) no longer refers to anything.
            unpinned.waker_token = None;
            return Poll::Ready(result);
        }

        let mut waiters = unpinned
            .cell
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Re-check under the lock: the result is only ever written while the
        // lock is held, so if it's still missing here, our waker is
        // guaranteed to be registered before the writer drains the set.
        if let Some(result) = unpinned.cell.get() {
            unpinned.waker_token = None;
            return Poll::Ready(result);
        }

        let token = waiters.register(unpinned.waker_token.take(), ctx.waker());
        unpinned.waker_token = Some(token);
        Poll::Pending
    }
}

impl<Value: Clone, Error: Clone> Drop for LoadFuture<Value, Error> {
    fn drop(&mut self) {
        if let Some(token) = self.waker_token.take() {
            self.cell
                .waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .discard_waker(token);
        }
    }
}

impl<Value, Error> Debug for LoadFuture<Value, Error>
where
    Value: Clone + Debug,
    Error: Clone + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadFuture")
            .field("result", &self.cell.result.load().as_deref())
            .finish()
    }
}
