//! The batching scheduler: the control loop that accumulates incoming
//! queries into a pending batch and hands it off to an idle executor slot.
//!
//! There is no batch timer. A batch closes either when it is full, or when an
//! executor slot is free and no new query is immediately available. Under
//! light load this dispatches single-key batches with no added latency; under
//! heavy load, while every slot is busy, the batch keeps growing until a slot
//! frees up or it reaches `max_batch_size`.

use std::{hash::Hash, mem, num::NonZeroUsize};

use crossbeam::channel::{Receiver, Select, SendError, Sender, TryRecvError};

use crate::{
    batch::{PendingBatch, Query},
    error::LoadError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No queries are pending.
    Empty,
    /// Between 1 and `max_batch_size - 1` distinct keys are pending.
    Accumulating,
    /// `max_batch_size` distinct keys are pending; no more are accepted
    /// until the batch is handed off.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// `close` was called, or the batcher was dropped.
    Closed,
    /// Every submitting handle is gone.
    Detached,
    /// Every executor slot is gone.
    NoExecutors,
}

enum Event<Key, Value: Clone, Error: Clone> {
    Arrived(Query<Key, Value, Error>),
    Dispatched,
    Stopped(Stop),
}

pub(crate) struct Scheduler<Key, Value: Clone, Error: Clone> {
    pub max_batch_size: NonZeroUsize,

    /// Zero-capacity: a submitter blocks until the loop takes its query.
    pub intake: Receiver<Query<Key, Value, Error>>,

    /// Zero-capacity: a send only succeeds when an executor slot is idle and
    /// waiting, which makes the send side's readiness the "slot available"
    /// signal.
    pub dispatch: Sender<PendingBatch<Key, Value, Error>>,

    /// Never sent on; the batcher drops the sending half to request shutdown.
    pub shutdown: Receiver<()>,
}

impl<Key, Value, Error> Scheduler<Key, Value, Error>
where
    Key: Eq + Hash,
    Value: Clone,
    Error: Clone,
{
    /// Run the control loop until shutdown. The pending batch lives on this
    /// stack frame and is only ever touched here; dispatch moves it out
    /// whole.
    pub(crate) fn run(self) {
        tracing::debug!(
            max_batch_size = self.max_batch_size.get(),
            "batch scheduler started"
        );

        let mut pending = PendingBatch::new();

        let stop = loop {
            // Shutdown is checked before anything else, so that no query is
            // dispatched in an iteration that begins after `close` returned.
            if self.shutdown_requested() {
                break Stop::Closed;
            }

            let event = match self.phase(&pending) {
                Phase::Empty => self.wait_for(&mut pending, true, false),

                // New arrivals take priority over dispatch: only if nothing
                // is immediately ready do we also offer the batch to the
                // executor pool.
                Phase::Accumulating => match self.intake.try_recv() {
                    Ok(query) => Event::Arrived(query),
                    Err(TryRecvError::Empty) => self.wait_for(&mut pending, true, true),
                    Err(TryRecvError::Disconnected) => Event::Stopped(Stop::Detached),
                },

                Phase::Full => self.wait_for(&mut pending, false, true),
            };

            match event {
                Event::Arrived(query) => pending.add(query),
                Event::Dispatched => {}
                Event::Stopped(stop) => break stop,
            }
        };

        if pending.is_empty() {
            tracing::debug!(?stop, "batch scheduler stopped");
        } else {
            tracing::debug!(
                ?stop,
                rejected_keys = pending.len(),
                "batch scheduler stopped; rejecting undispatched queries"
            );
        }

        pending.reject_all(LoadError::MissingResponse);

        // Returning drops the intake receiver and dispatch sender: blocked
        // submitters fail fast, and idle executor slots exit.
    }

    fn phase(&self, pending: &PendingBatch<Key, Value, Error>) -> Phase {
        match pending.len() {
            0 => Phase::Empty,
            len if len < self.max_batch_size.get() => Phase::Accumulating,
            _ => Phase::Full,
        }
    }

    fn shutdown_requested(&self) -> bool {
        !matches!(self.shutdown.try_recv(), Err(TryRecvError::Empty))
    }

    /// Block until one of the offered operations (or shutdown) is ready, with
    /// no bias between them.
    fn wait_for(
        &self,
        pending: &mut PendingBatch<Key, Value, Error>,
        accept: bool,
        release: bool,
    ) -> Event<Key, Value, Error> {
        let mut select = Select::new();
        let arrival = accept.then(|| select.recv(&self.intake));
        let handoff = release.then(|| select.send(&self.dispatch));
        let stop = select.recv(&self.shutdown);

        let oper = select.select();
        let index = oper.index();

        if Some(index) == arrival {
            match oper.recv(&self.intake) {
                Ok(query) => Event::Arrived(query),
                Err(_) => Event::Stopped(Stop::Detached),
            }
        } else if Some(index) == handoff {
            let batch = mem::take(pending);
            let keys = batch.len();
            let waiters = batch.waiters();

            match oper.send(&self.dispatch, batch) {
                Ok(()) => {
                    tracing::trace!(keys, waiters, "dispatched batch");
                    Event::Dispatched
                }
                Err(SendError(batch)) => {
                    *pending = batch;
                    Event::Stopped(Stop::NoExecutors)
                }
            }
        } else {
            debug_assert_eq!(index, stop);
            let _ = oper.recv(&self.shutdown);
            Event::Stopped(Stop::Closed)
        }
    }
}
