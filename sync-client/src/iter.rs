//! Deferred iterator: a single-consumer push/pull sequence.
//!
//! Producers push values with [`DeferredIterator::send`]; the consumer pulls
//! them with [`DeferredIterator::next`]. When the queue is empty the consumer
//! parks on an armed wait that the next `send` (or `complete`, `cancel`,
//! `fail`) resolves.
//!
//! # Design
//!
//! The armed wait is a [`tokio::sync::Notify`] used with `notify_one`, which
//! stores a permit when nobody is waiting yet. A `send` that lands between the
//! consumer checking the queue and starting to wait is therefore never lost.
//!
//! ```ignore
//! let iter = DeferredIterator::new();
//! iter.send(1);
//! iter.send(2);
//! iter.complete();
//!
//! assert_eq!(iter.next().await?, Some(1));
//! assert_eq!(iter.next().await?, Some(2));
//! assert_eq!(iter.next().await?, None);
//! ```

use futures_util::Stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;

/// Errors surfaced to the consumer of a deferred iterator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IteratorError {
    /// The producer aborted the sequence with an error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Lazy, single-consumer sequence fed by pushes.
pub struct DeferredIterator<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    state: Mutex<IterState<T>>,
    armed: Notify,
}

struct IterState<T> {
    queue: VecDeque<T>,
    /// No more values will be accepted.
    done: bool,
    /// Delivered to the next pull, then cleared.
    error: Option<String>,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, IterState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> DeferredIterator<T> {
    /// Create an open, empty sequence.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(IterState {
                    queue: VecDeque::new(),
                    done: false,
                    error: None,
                }),
                armed: Notify::new(),
            }),
        }
    }

    /// Push a value and wake the consumer.
    ///
    /// Returns false if the sequence has already ended; the value is dropped.
    pub fn send(&self, value: T) -> bool {
        {
            let mut state = self.inner.lock();
            if state.done {
                return false;
            }
            state.queue.push_back(value);
        }
        self.inner.armed.notify_one();
        true
    }

    /// End the sequence after the values already queued.
    pub fn complete(&self) {
        self.inner.lock().done = true;
        self.inner.armed.notify_one();
    }

    /// End the sequence immediately, discarding queued values.
    pub fn cancel(&self) {
        {
            let mut state = self.inner.lock();
            state.queue.clear();
            state.done = true;
        }
        self.inner.armed.notify_one();
    }

    /// Abort the sequence with an error.
    ///
    /// Queued values are discarded and the next pull returns the error. Values
    /// the consumer already received are unaffected.
    pub fn fail(&self, error: impl Into<String>) {
        {
            let mut state = self.inner.lock();
            state.queue.clear();
            state.error = Some(error.into());
            state.done = true;
        }
        self.inner.armed.notify_one();
    }

    /// Pull the next value.
    ///
    /// Returns `Ok(None)` once the sequence has ended and drained.
    pub async fn next(&self) -> Result<Option<T>, IteratorError> {
        loop {
            {
                let mut state = self.inner.lock();
                if let Some(value) = state.queue.pop_front() {
                    return Ok(Some(value));
                }
                if let Some(error) = state.error.take() {
                    return Err(IteratorError::Protocol(error));
                }
                if state.done {
                    return Ok(None);
                }
            }
            self.inner.armed.notified().await;
        }
    }

    /// Whether the sequence accepts no more values.
    pub fn is_done(&self) -> bool {
        self.inner.lock().done
    }

    /// Number of values waiting to be pulled.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Check if no values are waiting.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Adapt into a [`Stream`] of results.
    ///
    /// The stream ends when the sequence reports done; an injected error is
    /// yielded once as `Err` and the stream ends after it.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, IteratorError>> {
        futures_util::stream::unfold(Some(self), |iter| async move {
            let iter = iter?;
            match iter.next().await {
                Ok(Some(value)) => Some((Ok(value), Some(iter))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl<T> Clone for DeferredIterator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for DeferredIterator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for DeferredIterator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("DeferredIterator")
            .field("queued", &state.queue.len())
            .field("done", &state.done)
            .field("failed", &state.error.is_some())
            .finish()
    }
}
