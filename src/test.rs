#![cfg(test)]

use std::{
    collections::HashMap,
    panic,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    thread,
    time::Duration,
};

use cooked_waker::{IntoWaker, Wake, WakeRef};
use futures::{executor, FutureExt};

use crate::{
    batch::{PendingBatch, Query},
    data::{Fetched, KeySet, KeyedEntry, OnDuplicate},
    error::{FetchPanic, LoadError},
    executor::execute,
    future::{pair, LoadFuture},
    BatchConfig, ConfigError,
};

/// A waker that counts how many times it was woken.
#[derive(Debug, Clone, Default, IntoWaker)]
struct CountingWaker {
    count: Arc<AtomicUsize>,
}

impl WakeRef for CountingWaker {
    fn wake_by_ref(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

impl Wake for CountingWaker {}

fn query(key: u32) -> (Query<u32, String, String>, LoadFuture<String, String>) {
    let (promise, future) = pair();
    (Query { key, promise }, future)
}

#[test]
fn resolve_then_drop_keeps_first_result() {
    let (promise, future) = pair::<u32, ()>();
    let second = future.clone();

    assert!(!future.is_resolved());
    assert!(promise.resolve(Ok(1)));

    assert_eq!(future.try_get(), Some(Ok(1)));
    assert_eq!(second.wait(), Ok(1));
}

#[test]
fn dropped_promise_rejects() {
    let (promise, future) = pair::<u32, ()>();
    drop(promise);

    assert_eq!(future.wait(), Err(LoadError::MissingResponse));
}

#[test]
fn wait_blocks_until_resolved() {
    let (promise, future) = pair::<&'static str, ()>();

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let future = future.clone();
            thread::spawn(move || future.wait())
        })
        .collect();

    thread::sleep(Duration::from_millis(10));
    promise.resolve(Ok("done"));

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), Ok("done"));
    }
}

#[test]
fn poll_registers_one_waker_per_handle() {
    let (promise, mut future) = pair::<u32, ()>();
    let mut other = future.clone();

    let waker = CountingWaker::default();
    let count = waker.count.clone();
    let waker = waker.into_waker();
    let mut ctx = Context::from_waker(&waker);

    assert_eq!(future.poll_unpin(&mut ctx), Poll::Pending);
    assert_eq!(future.poll_unpin(&mut ctx), Poll::Pending);
    assert_eq!(other.poll_unpin(&mut ctx), Poll::Pending);
    assert_eq!(future.registered_wakers(), 2);

    // A dropped handle takes its waker with it
    let dropped = {
        let mut third = future.clone();
        assert_eq!(third.poll_unpin(&mut ctx), Poll::Pending);
        third
    };
    assert_eq!(future.registered_wakers(), 3);
    drop(dropped);
    assert_eq!(future.registered_wakers(), 2);

    promise.resolve(Ok(7));
    assert_eq!(count.load(Ordering::SeqCst), 2);

    assert_eq!(future.poll_unpin(&mut ctx), Poll::Ready(Ok(7)));
    assert_eq!(other.poll_unpin(&mut ctx), Poll::Ready(Ok(7)));

    // Polling again after completion yields the same result
    assert_eq!(future.poll_unpin(&mut ctx), Poll::Ready(Ok(7)));
}

#[test]
fn await_resolves_from_another_thread() {
    let (promise, future) = pair::<u32, ()>();

    let resolver = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        promise.resolve(Ok(3));
    });

    assert_eq!(executor::block_on(future), Ok(3));
    resolver.join().unwrap();
}

#[test]
fn batch_counts_distinct_keys() {
    let mut batch = PendingBatch::new();

    let mut futures = Vec::new();
    for key in [1, 2, 1, 3, 1] {
        let (query, future) = query(key);
        batch.add(query);
        futures.push(future);
    }

    assert_eq!(batch.len(), 3);
    assert_eq!(batch.waiters(), 5);

    let mut keys = batch.key_set().into_vec();
    keys.sort_unstable();
    assert_eq!(keys, [1, 2, 3]);
}

#[test]
fn resolve_all_routes_values_errors_and_missing() {
    let mut batch = PendingBatch::new();

    let (q1, f1) = query(1);
    let (q1b, f1b) = query(1);
    let (q2, f2) = query(2);
    let (q3, f3) = query(3);
    let (q4, f4) = query(4);

    for q in [q1, q1b, q2, q3, q4] {
        batch.add(q);
    }

    let fetched = Fetched::new()
        .with_value(1, String::from("one"))
        .with_error(2, String::from("no two"))
        // A key present in both maps resolves with its value
        .with_value(4, String::from("four"))
        .with_error(4, String::from("shadowed"))
        // Unrequested keys are ignored
        .with_value(5, String::from("five"));

    assert_eq!(batch.resolve_all(fetched), 1);

    assert_eq!(f1.wait(), Ok(String::from("one")));
    assert_eq!(f1b.wait(), Ok(String::from("one")));
    assert_eq!(f2.wait(), Err(LoadError::Fetch(String::from("no two"))));
    assert_eq!(f3.wait(), Err(LoadError::MissingResponse));
    assert_eq!(f4.wait(), Ok(String::from("four")));
}

#[test]
fn execute_contains_panics() {
    let mut batch = PendingBatch::new();
    let (q1, f1) = query(1);
    let (q2, f2) = query(2);
    batch.add(q1);
    batch.add(q2);

    let fetch = |_keys: KeySet<u32>| -> futures::future::Ready<Fetched<u32, String, String>> {
        panic!("backend exploded")
    };

    // Silence the default hook's report of the expected panic.
    let hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    execute(&fetch, batch);
    panic::set_hook(hook);

    for future in [f1, f2] {
        match future.wait() {
            Err(LoadError::Panicked(fault)) => assert_eq!(fault.message(), "backend exploded"),
            other => panic!("expected a panic error, got {:?}", other),
        }
    }
}

#[test]
fn panic_payload_message() {
    let fault = FetchPanic::from_payload(Box::new(String::from("owned")));
    assert_eq!(fault.message(), "owned");

    let fault = FetchPanic::from_payload(Box::new("static"));
    assert_eq!(fault.message(), "static");

    let fault = FetchPanic::from_payload(Box::new(17u8));
    assert_eq!(fault.message(), "<non-string panic payload>");

    // The original payload survives, once, for whichever clone asks first.
    let copy = fault.clone();
    let payload = copy.take_payload().unwrap();
    assert_eq!(payload.downcast_ref::<u8>(), Some(&17));
    assert!(fault.take_payload().is_none());
    assert_eq!(fault, copy);

    let err: LoadError<String> = LoadError::Panicked(FetchPanic::from_payload(Box::new("boom")));
    assert_eq!(err.to_string(), "panic in fetch function: boom");
}

#[test]
fn config_rejects_zero_limits() {
    assert_eq!(
        BatchConfig::new(1, 0).validate(),
        Err(ConfigError::ZeroBatchSize)
    );
    assert_eq!(
        BatchConfig::new(0, 10).validate(),
        Err(ConfigError::ZeroConcurrency)
    );

    let limits = BatchConfig::default().validate().unwrap();
    assert_eq!(limits.max_batch_size.get(), 100);
    assert_eq!(limits.max_concurrent_batches.get(), 1);
}

#[derive(Debug, Clone, PartialEq)]
struct Row {
    id: u32,
    name: &'static str,
}

impl KeyedEntry<u32> for Row {
    fn get_key(&self) -> &u32 {
        &self.id
    }
}

#[test]
fn keyset_helpers() {
    let keys = KeySet::from_distinct(vec![1, 2, 3]);

    let errors = keys.err_for_all("down");
    assert_eq!(errors.len(), 3);
    assert!(errors.values().all(|err| *err == "down"));

    let mut partial = HashMap::new();
    partial.insert(2, vec!["b"]);
    let filled = keys.fill_empty(partial);
    assert_eq!(filled[&1], Vec::<&str>::new());
    assert_eq!(filled[&2], ["b"]);
    assert_eq!(filled[&3], Vec::<&str>::new());

    let rows = vec![
        Row { id: 1, name: "first" },
        Row { id: 1, name: "second" },
        Row { id: 3, name: "third" },
        Row { id: 9, name: "unrequested" },
    ];

    let first = keys.values_from_iter(OnDuplicate::KeepFirst, rows.clone());
    assert_eq!(first.len(), 2);
    assert_eq!(first[&1].name, "first");

    let last = keys.values_from_iter(OnDuplicate::KeepLast, rows.clone());
    assert_eq!(last[&1].name, "second");

    let groups = keys.groups_from_iter(rows);
    assert_eq!(groups.len(), 3);
    assert_eq!(groups[&1].len(), 2);
    assert!(groups[&2].is_empty());
    assert_eq!(groups[&3], [Row { id: 3, name: "third" }]);
}
