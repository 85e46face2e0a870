use std::time::Duration;

use thiserror::Error;

use crate::key::EncodingError;

/// The reasons a single [`LoadFuture`][crate::LoadFuture] can fail.
///
/// Failures are local: an encoding error only affects the `load` call that
/// produced it, and a fetch error only affects the futures that were waiting
/// on keys in the failed call. Everything else in the same batch resolves on
/// its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError<E> {
    /// The argument passed to `load` couldn't be canonicalized. Reported
    /// immediately; the argument never joined a batch.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// The batch function rejected the call that carried this key. Every
    /// future waiting on a key of that call gets a clone of the same error.
    #[error("batch fetch failed: {0}")]
    Fetch(E),

    /// The batch function didn't settle within the configured deadline.
    #[error("batch fetch did not complete within {0:?}")]
    DeadlineExceeded(Duration),

    /// The batch completed, but had no value left for this future. This only
    /// happens when a future is polled again after it already completed.
    #[error("batch completed without a value for this key")]
    Unresolved,
}

impl<E> LoadError<E> {
    /// If this is a [`Fetch`][LoadError::Fetch] error, get the error returned
    /// by the batch function.
    pub fn fetch_error(&self) -> Option<&E> {
        match self {
            LoadError::Fetch(err) => Some(err),
            _ => None,
        }
    }
}
