use std::num::NonZeroUsize;

use thiserror::Error;

/// Limits for a [`QueryBatcher`][crate::QueryBatcher] or
/// [`Loader`][crate::Loader].
///
/// ```
/// use batchcoalesce::BatchConfig;
///
/// let config = BatchConfig::default()
///     .with_max_batch_size(50)
///     .with_max_concurrent_batches(4);
///
/// assert!(config.validate().is_ok());
/// assert!(BatchConfig::new(4, 0).validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BatchConfig {
    /// How many fetch function calls may run at the same time. Batches that
    /// are ready beyond this wait for a free slot.
    pub max_concurrent_batches: usize,

    /// The largest number of distinct keys passed to a single fetch function
    /// call.
    pub max_batch_size: usize,
}

impl BatchConfig {
    pub fn new(max_concurrent_batches: usize, max_batch_size: usize) -> Self {
        Self {
            max_concurrent_batches,
            max_batch_size,
        }
    }

    pub fn with_max_concurrent_batches(self, max_concurrent_batches: usize) -> Self {
        Self {
            max_concurrent_batches,
            ..self
        }
    }

    pub fn with_max_batch_size(self, max_batch_size: usize) -> Self {
        Self {
            max_batch_size,
            ..self
        }
    }

    /// Check that both limits are at least 1. A zero limit is never coerced
    /// into something usable.
    pub fn validate(&self) -> Result<Limits, ConfigError> {
        let max_batch_size =
            NonZeroUsize::new(self.max_batch_size).ok_or(ConfigError::ZeroBatchSize)?;
        let max_concurrent_batches =
            NonZeroUsize::new(self.max_concurrent_batches).ok_or(ConfigError::ZeroConcurrency)?;

        Ok(Limits {
            max_concurrent_batches,
            max_batch_size,
        })
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 1,
            max_batch_size: 100,
        }
    }
}

/// A validated [`BatchConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_concurrent_batches: NonZeroUsize,
    pub max_batch_size: NonZeroUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_batch_size must be at least 1")]
    ZeroBatchSize,

    #[error("max_concurrent_batches must be at least 1")]
    ZeroConcurrency,
}
