//! Batchcoalesce is a threaded implementation of the
//! [dataloader pattern](https://github.com/graphql/dataloader). It coalesces
//! many concurrent, independent lookups by key into fewer bulk fetch calls,
//! then distributes each bulk result back to the individual callers, without
//! the callers knowing anything about the batching. It also deduplicates
//! repeated requests for the same key. The common use case is avoiding "N+1"
//! request storms against a database or an API, but it works in front of any
//! keyed backing store that can answer several keys at once.
//!
//! ## Overview
//!
//! Suppose you have an API that fetches user data for several usernames in
//! one request, but your request handlers each only need one user. First,
//! write a fetch function: it receives a [`KeySet`] of distinct keys, and
//! returns a [`Fetched`], which maps each key either to a value or to an
//! error.
//!
//! ```
//! use batchcoalesce::{Fetched, KeyedEntry, KeySet, OnDuplicate};
//! # use futures::future;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct UserData {
//!     username: String,
//!     age: u16,
//! }
//!
//! impl KeyedEntry<String> for UserData {
//!     fn get_key(&self) -> &String {
//!         &self.username
//!     }
//! }
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct ApiError(String);
//!
//! fn get_users(usernames: &[String]) -> Result<Vec<UserData>, ApiError> {
//!     Ok(usernames
//!         .iter()
//!         .map(|username| UserData { username: username.clone(), age: 30 })
//!         .collect())
//! }
//!
//! fn batch_get_users(usernames: KeySet<String>)
//!     -> future::Ready<Fetched<String, UserData, ApiError>>
//! {
//!     let fetched = match get_users(usernames.as_slice()) {
//!         // Users the API didn't return resolve as missing responses.
//!         Ok(users) => Fetched::from_values(
//!             usernames.values_from_iter(OnDuplicate::KeepFirst, users),
//!         ),
//!         // The whole request failed: every key gets the error.
//!         Err(err) => Fetched::fail_all(&usernames, err),
//!     };
//!
//!     future::ready(fetched)
//! }
//! ```
//!
//! Then create a [`Loader`] with a [`BatchConfig`]. The config sets two
//! limits:
//! - `max_batch_size` is the largest number of distinct keys passed to one
//!   fetch call.
//! - `max_concurrent_batches` is the number of fetch calls that may run at
//!   the same time.
//!
//! A loader can be shared by reference between many threads. Each
//! [`load`][Loader::load] blocks until the result for its key is known;
//! [`load_future`][Loader::load_future] returns a [`LoadFuture`] that can be
//! waited on later, or `.await`ed from async code.
//!
//! ```
//! # use batchcoalesce::{Fetched, KeySet};
//! # use futures::future;
//! # fn batch_get_users(usernames: KeySet<String>)
//! #     -> future::Ready<Fetched<String, u16, String>>
//! # {
//! #     future::ready(Fetched::from_values(usernames.into_iter().map(|u| (u, 30)).collect()))
//! # }
//! use batchcoalesce::{BatchConfig, Loader};
//!
//! let config = BatchConfig::default()
//!     .with_max_batch_size(100)
//!     .with_max_concurrent_batches(4);
//!
//! let loader = Loader::new(config, batch_get_users).unwrap();
//!
//! std::thread::scope(|s| {
//!     for name in ["alice", "bob", "carol", "alice"] {
//!         let loader = &loader;
//!         s.spawn(move || {
//!             let age = loader.load(String::from(name)).unwrap();
//!             assert_eq!(age, 30);
//!         });
//!     }
//! });
//!
//! // "alice" was only ever fetched once.
//! assert_eq!(loader.cached_len(), 3);
//! ```
//!
//! If you don't want results remembered between calls, use a
//! [`QueryBatcher`] instead: it batches in exactly the same way, but every
//! call is a fresh query.
//!
//! ## Design notes
//!
//! ### No batch timer
//!
//! Many dataloaders collect keys for a fixed window before dispatching. Here,
//! a batch is dispatched as soon as an executor slot is free and no new query
//! is immediately waiting to be added, or as soon as it is full. When load is
//! light, a lone request is fetched immediately. When every slot is busy,
//! requests pile up into the next batch, so batches grow exactly when there
//! is pressure to batch.
//!
//! ### Threads and backpressure
//!
//! The scheduler and each executor slot run on their own threads, and
//! communicate over zero-capacity channels. Submitting a query blocks until
//! the scheduler takes it, so a full batch waiting for a slot naturally slows
//! down callers instead of growing an unbounded queue.
//!
//! ### Errors are per key
//!
//! Every key resolves individually, with a value or a [`LoadError`]. Keys the
//! fetch function doesn't account for resolve with
//! [`LoadError::MissingResponse`], and a fetch function that panics resolves
//! every key of its batch with [`LoadError::Panicked`] while the rest of the
//! loader carries on. Nothing is retried.
//!
//! ### Shutdown
//!
//! [`close`][Loader::close] (or dropping the loader) stops the scheduler.
//! Queries in a batch that hasn't been dispatched yet resolve with
//! `MissingResponse` instead of hanging, while batches that are already
//! being fetched finish normally.
//!
//! ## Logging
//!
//! The crate emits [`tracing`](https://docs.rs/tracing) events: thread
//! lifecycle and shutdowns at `debug`, dispatches at `trace`, fetch
//! functions that omit keys at `warn`, and panics at `error`. Install any
//! subscriber to see them.

mod batch;
mod batcher;
mod config;
mod data;
mod error;
mod executor;
mod future;
mod loader;
mod scheduler;
mod wakerset;

mod test;

pub use batcher::QueryBatcher;
pub use config::{BatchConfig, ConfigError, Limits};
pub use data::{Fetched, KeySet, KeyedEntry, OnDuplicate};
pub use error::{FetchPanic, LoadError, StartError};
pub use executor::BatchFn;
pub use future::{LoadFuture, LoadResult};
pub use loader::Loader;
