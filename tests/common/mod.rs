//! Shared helpers for the integration tests: log setup, a call recorder, and
//! a fetch function that can be held mid-fetch so that tests can control
//! exactly when an executor slot is busy.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use batchcoalesce::{Fetched, KeySet};
use crossbeam::channel::{self, Receiver, Sender};
use futures::future::{self, Ready};

/// Route the crate's `tracing` output through the test harness. Set
/// `RUST_LOG=batchcoalesce=trace` to see it.
pub fn setup() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Records the key set of every fetch call.
#[derive(Debug)]
pub struct Calls<Key> {
    calls: Arc<Mutex<Vec<Vec<Key>>>>,
}

impl<Key> Clone for Calls<Key> {
    fn clone(&self) -> Self {
        Self {
            calls: self.calls.clone(),
        }
    }
}

impl<Key> Default for Calls<Key> {
    fn default() -> Self {
        Self {
            calls: Arc::default(),
        }
    }
}

impl<Key: Clone + Ord> Calls<Key> {
    pub fn record(&self, keys: &KeySet<Key>) {
        let mut keys = keys.as_slice().to_vec();
        keys.sort();
        self.calls.lock().unwrap().push(keys);
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Every call's keys, each sorted, in call order.
    pub fn all(&self) -> Vec<Vec<Key>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn total_keys(&self) -> usize {
        self.calls.lock().unwrap().iter().map(Vec::len).sum()
    }
}

/// The controlling side of a held fetch function.
pub struct Hold {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl Hold {
    /// Block until the fetch call holding the key has started.
    pub fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .expect("held fetch never started");
    }

    /// Let the held fetch call finish.
    pub fn release(&self) {
        self.release.send(()).unwrap();
    }
}

/// A fetch function that stringifies `u32` keys, records its calls, and
/// blocks any call whose key set contains `hold` until released.
pub fn held_stringify(
    hold: u32,
    calls: Calls<u32>,
) -> (
    impl Fn(KeySet<u32>) -> Ready<Fetched<u32, String, String>> + Send + Sync + 'static,
    Hold,
) {
    let (entered_tx, entered_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();

    let fetch = move |keys: KeySet<u32>| {
        calls.record(&keys);

        if keys.keys().any(|&key| key == hold) {
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
        }

        future::ready(stringify(keys))
    };

    (
        fetch,
        Hold {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

pub fn stringify<Key: ToString + Eq + Hash>(keys: KeySet<Key>) -> Fetched<Key, String, String> {
    let values: HashMap<Key, String> = keys
        .into_iter()
        .map(|key| {
            let value = key.to_string();
            (key, value)
        })
        .collect();

    Fetched::from_values(values)
}

pub fn reverse(s: &str) -> String {
    s.chars().rev().collect()
}

/// Poll `condition` until it holds, or panic after a generous timeout.
pub fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);

    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        thread::sleep(Duration::from_millis(2));
    }
}
