//! Errors delivered through a [`LoadFuture`][crate::LoadFuture], and errors
//! raised while starting a batcher.

use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
    io,
    sync::{Arc, Mutex, PoisonError},
};

use thiserror::Error;

use crate::config::ConfigError;

/// The error half of a load result.
///
/// Every key gets its own result; there is no batch-level failure channel.
/// A fetch function that fails wholesale (a lost database connection, say)
/// reports the same error for every key, see [`KeySet::err_for_all`].
///
/// [`KeySet::err_for_all`]: crate::KeySet::err_for_all
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError<E> {
    /// The key was requested, but the fetch function reported neither a
    /// value nor an error for it. Also used for queries that were still
    /// waiting in an undispatched batch when the batcher was closed, and for
    /// lookups issued after the batcher was closed.
    #[error("no data or explicit error was returned for the given key")]
    MissingResponse,

    /// The fetch function explicitly reported this error for the key.
    #[error("{0}")]
    Fetch(E),

    /// The fetch function panicked. Every key in that batch gets this error.
    #[error("panic in fetch function: {0}")]
    Panicked(FetchPanic),
}

impl<E> LoadError<E> {
    /// Returns the fetch function's own error, if that's what this is.
    pub fn fetch_error(&self) -> Option<&E> {
        match self {
            LoadError::Fetch(err) => Some(err),
            _ => None,
        }
    }

    #[inline]
    pub fn is_missing_response(&self) -> bool {
        matches!(self, LoadError::MissingResponse)
    }
}

/// The payload of a panic caught at a batch boundary.
///
/// A panic payload is a `Box<dyn Any + Send>`, which can't be cloned for
/// every waiter. Each waiter gets the payload's message (a placeholder for
/// payloads that aren't strings, such as `panic_any` with another type),
/// while the payload itself is kept once, shared by every clone, for the
/// first caller of [`take_payload`][FetchPanic::take_payload].
#[derive(Clone, Error)]
#[error("{message}")]
pub struct FetchPanic {
    message: String,
    payload: Arc<Mutex<Option<Box<dyn Any + Send>>>>,
}

impl FetchPanic {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else if let Some(message) = payload.downcast_ref::<&'static str>() {
            String::from(*message)
        } else {
            String::from("<non-string panic payload>")
        };

        FetchPanic {
            message,
            payload: Arc::new(Mutex::new(Some(payload))),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Take the original panic payload, for downcasting or for
    /// [`resume_unwind`][std::panic::resume_unwind]. Only the first call,
    /// across every clone of this error, gets it.
    pub fn take_payload(&self) -> Option<Box<dyn Any + Send>> {
        self.payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Debug for FetchPanic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchPanic")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

// Two panics are equal when their messages are; the payload isn't compared.
impl PartialEq for FetchPanic {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl Eq for FetchPanic {}

/// Errors from [`QueryBatcher::new`][crate::QueryBatcher::new] and
/// [`Loader::new`][crate::Loader::new].
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid batch configuration")]
    Config(#[from] ConfigError),

    #[error("failed to spawn {role} thread")]
    Spawn {
        role: &'static str,
        #[source]
        source: io::Error,
    },
}
