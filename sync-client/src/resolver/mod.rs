//! Resolver abstraction.
//!
//! A resolver is the query-side collaborator of a live query: it owns the
//! accessor (the query shape backed by the cache), the freshness flag, the
//! recorded selections, and the network channel that fetches them. The live
//! query only decides *when* to call it.
//!
//! # Design
//!
//! Fetches are delivered through [`Resolver::subscribe`]: the first `on_next`
//! after a subscribe is the fetch's own response, later ones are push
//! updates. [`Resolver::resolve`] is the one-shot variant used when push
//! updates are disabled.

mod mock;

pub use mock::MockResolver;

use async_trait::async_trait;
use livesync_types::{CacheHandle, FetchError, SelectionSet};

/// Callbacks attached to a resolver subscription.
pub struct Handlers<D> {
    /// Fresh data arrived (fetch response or push update).
    pub on_next: Box<dyn Fn(D) + Send + Sync>,
    /// The channel failed.
    pub on_error: Box<dyn Fn(FetchError) + Send + Sync>,
    /// The channel ended normally.
    pub on_complete: Box<dyn Fn() + Send + Sync>,
}

impl<D> std::fmt::Debug for Handlers<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers").finish_non_exhaustive()
    }
}

/// Detaches a resolver subscription when called.
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send>>);

impl Unsubscribe {
    /// Wrap a detach function.
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(detach)))
    }

    /// A handle with nothing to detach.
    pub fn noop() -> Self {
        Self(None)
    }

    /// Detach now.
    pub fn call(mut self) {
        if let Some(detach) = self.0.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Unsubscribe").field(&self.0.is_some()).finish()
    }
}

/// Query-side collaborator of a live query.
///
/// Implementations must not call back into the live query while holding
/// their own locks; handlers may run synchronously inside `subscribe`.
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    /// The query shape handed to consumers.
    type Data: Clone + Send + Sync + 'static;

    /// Current data, read from the cache.
    fn accessor(&self) -> Self::Data;

    /// Freshness flag: the next decision should fetch.
    fn should_fetch(&self) -> bool;

    /// Set the freshness flag.
    fn set_should_fetch(&self, value: bool);

    /// The cache this resolver currently reads from.
    fn cache(&self) -> CacheHandle;

    /// Reset per-decision context. Clears the freshness flag.
    fn reset(&self);

    /// Fetch once, without a push channel.
    async fn resolve(&self) -> Result<Self::Data, FetchError>;

    /// Selections recorded so far.
    fn selections(&self) -> SelectionSet;

    /// Merge previously successful selections back in.
    fn restore_selections(&self, snapshot: &SelectionSet);

    /// Forget every recorded selection.
    fn clear_selections(&self);

    /// Dry-run the query to record selections and refresh the freshness flag.
    ///
    /// Only ever raises the flag; reading the cache here also extends its
    /// time-based liveness.
    fn prepass(&self);

    /// Fetch the current selections and keep a push channel open.
    fn subscribe(&self, handlers: Handlers<Self::Data>) -> Unsubscribe;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn unsubscribe_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let unsubscribe = Unsubscribe::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        unsubscribe.call();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_unsubscribe_does_nothing() {
        Unsubscribe::noop().call();
    }
}
