//! Mock resolver for testing.
//!
//! Simulates a cache-backed query: a query function records selections during
//! the prepass, fetches answer from a queue of canned responses, and tests can
//! push updates, swap the cache, or hold fetches in flight.

use super::{Handlers, Resolver, Unsubscribe};
use async_trait::async_trait;
use livesync_core::PrepassRecorder;
use livesync_types::{CacheHandle, CachePolicy, FetchError, Selection, SelectionSet};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::Instant;

type QueryFn = Arc<dyn Fn(&mut PrepassRecorder) + Send + Sync>;

/// Mock resolver for testing.
///
/// Clones share state, so a test can keep one handle and give another to a
/// live query.
pub struct MockResolver<D> {
    inner: Arc<Mutex<MockInner<D>>>,
    paused: Arc<watch::Sender<bool>>,
}

struct MockInner<D> {
    cache: CacheHandle,
    data: D,
    /// When the cached data was last written; `None` means nothing cached.
    fetched_at: Option<Instant>,
    should_fetch: bool,
    selections: SelectionSet,
    query: QueryFn,
    responses: VecDeque<Result<D, FetchError>>,
    /// Answer once the queue is empty. `None` echoes the cached data.
    fallback: Option<Result<D, FetchError>>,
    fetch_count: usize,
    reset_count: usize,
    prepass_count: usize,
    listeners: BTreeMap<u64, Arc<Handlers<D>>>,
    next_listener: u64,
}

fn lock<D>(inner: &Mutex<MockInner<D>>) -> MutexGuard<'_, MockInner<D>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<D: Clone + Default + Send + Sync + 'static> MockResolver<D> {
    /// Create a resolver with an empty cache using `policy`.
    ///
    /// The default query function reads a single `query.value` field.
    pub fn new(policy: CachePolicy) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(MockInner {
                cache: CacheHandle::new(policy),
                data: D::default(),
                fetched_at: None,
                should_fetch: false,
                selections: SelectionSet::new(),
                query: Arc::new(|rec: &mut PrepassRecorder| {
                    rec.record("query", Selection::root("query").field("value").build());
                }),
                responses: VecDeque::new(),
                fallback: None,
                fetch_count: 0,
                reset_count: 0,
                prepass_count: 0,
                listeners: BTreeMap::new(),
                next_listener: 0,
            })),
            paused: Arc::new(paused),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockInner<D>> {
        lock(&self.inner)
    }

    /// Replace the query function run by the prepass.
    pub fn with_query(self, query: impl Fn(&mut PrepassRecorder) + Send + Sync + 'static) -> Self {
        self.lock().query = Arc::new(query);
        self
    }

    /// Start with `data` already cached.
    pub fn warm(self, data: D) -> Self {
        {
            let mut inner = self.lock();
            inner.data = data;
            inner.fetched_at = Some(Instant::now());
        }
        self
    }

    /// Queue the answer for the next fetch.
    pub fn queue_response(&self, response: Result<D, FetchError>) {
        self.lock().responses.push_back(response);
    }

    /// Answer every fetch with `response` once the queue is empty.
    pub fn respond_with(&self, response: Result<D, FetchError>) {
        self.lock().fallback = Some(response);
    }

    /// Hold every fetch in flight until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Let held fetches complete.
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Write `data` to the cache and push it to every open subscription.
    pub fn push(&self, data: D) {
        let listeners = {
            let mut inner = self.lock();
            inner.data = data.clone();
            inner.fetched_at = Some(Instant::now());
            inner.listeners.values().cloned().collect::<Vec<_>>()
        };
        for handlers in listeners {
            (handlers.on_next)(data.clone());
        }
    }

    /// Fail every open subscription.
    pub fn push_error(&self, error: FetchError) {
        let listeners = self.lock().listeners.values().cloned().collect::<Vec<_>>();
        for handlers in listeners {
            (handlers.on_error)(error.clone());
        }
    }

    /// End every open subscription normally.
    pub fn complete(&self) {
        let listeners = std::mem::take(&mut self.lock().listeners);
        for handlers in listeners.into_values() {
            (handlers.on_complete)();
        }
    }

    /// Switch to a new, empty cache instance. Returns its handle.
    pub fn replace_cache(&self, policy: CachePolicy) -> CacheHandle {
        let mut inner = self.lock();
        inner.cache = CacheHandle::new(policy);
        inner.fetched_at = None;
        inner.cache
    }

    /// Record a selection outside of a prepass, as a partial render would.
    pub fn record(&self, selection: Selection) {
        self.lock().selections.insert(selection);
    }

    /// Number of network fetches issued.
    pub fn fetch_count(&self) -> usize {
        self.lock().fetch_count
    }

    /// Number of `reset()` calls.
    pub fn reset_count(&self) -> usize {
        self.lock().reset_count
    }

    /// Number of prepass runs.
    pub fn prepass_count(&self) -> usize {
        self.lock().prepass_count
    }

    /// Number of open subscriptions.
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn listener(&self, id: u64) -> Option<Arc<Handlers<D>>> {
        self.lock().listeners.get(&id).cloned()
    }
}

impl<D> Clone for MockResolver<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            paused: Arc::clone(&self.paused),
        }
    }
}

impl<D> std::fmt::Debug for MockResolver<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("MockResolver")
            .field("cache", &inner.cache)
            .field("should_fetch", &inner.should_fetch)
            .field("selections", &inner.selections.len())
            .field("fetch_count", &inner.fetch_count)
            .finish()
    }
}

#[async_trait]
impl<D: Clone + Default + Send + Sync + 'static> Resolver for MockResolver<D> {
    type Data = D;

    fn accessor(&self) -> D {
        self.lock().data.clone()
    }

    fn should_fetch(&self) -> bool {
        self.lock().should_fetch
    }

    fn set_should_fetch(&self, value: bool) {
        self.lock().should_fetch = value;
    }

    fn cache(&self) -> CacheHandle {
        self.lock().cache
    }

    fn reset(&self) {
        let mut inner = self.lock();
        inner.should_fetch = false;
        inner.reset_count += 1;
    }

    async fn resolve(&self) -> Result<D, FetchError> {
        let response = {
            let mut inner = self.lock();
            inner.fetch_count += 1;
            match inner.responses.pop_front() {
                Some(response) => response,
                None => match &inner.fallback {
                    Some(fallback) => fallback.clone(),
                    None => Ok(inner.data.clone()),
                },
            }
        };

        let mut paused = self.paused.subscribe();
        let _ = paused.wait_for(|held| !*held).await;

        if let Ok(data) = &response {
            let mut inner = self.lock();
            inner.data = data.clone();
            inner.fetched_at = Some(Instant::now());
        }
        response
    }

    fn selections(&self) -> SelectionSet {
        self.lock().selections.clone()
    }

    fn restore_selections(&self, snapshot: &SelectionSet) {
        self.lock().selections.extend_from(snapshot);
    }

    fn clear_selections(&self) {
        self.lock().selections.clear();
    }

    fn prepass(&self) {
        let query = Arc::clone(&self.lock().query);
        let ((), table) = PrepassRecorder::run(|rec| query(rec));

        let mut inner = self.lock();
        inner.prepass_count += 1;
        inner.selections.extend_from(&table.merged());
        let age = inner.fetched_at.map(|at| at.elapsed());
        if inner.cache.policy.freshness(age).needs_fetch() {
            inner.should_fetch = true;
        }
    }

    fn subscribe(&self, handlers: Handlers<D>) -> Unsubscribe {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_listener;
            inner.next_listener += 1;
            inner.listeners.insert(id, Arc::new(handlers));
            id
        };

        // The fetch runs to completion even if the subscription is dropped;
        // its answer is then discarded.
        let resolver = self.clone();
        tokio::spawn(async move {
            let result = resolver.resolve().await;
            let Some(handlers) = resolver.listener(id) else {
                return;
            };
            match result {
                Ok(data) => (handlers.on_next)(data),
                Err(error) => (handlers.on_error)(error),
            }
        });

        let inner = Arc::clone(&self.inner);
        Unsubscribe::new(move || {
            lock(&inner).listeners.remove(&id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn capture() -> (Arc<Mutex<Vec<String>>>, Handlers<u32>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (next, error, complete) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
        let handlers = Handlers {
            on_next: Box::new(move |v| next.lock().unwrap().push(format!("next:{v}"))),
            on_error: Box::new(move |e| error.lock().unwrap().push(format!("error:{e}"))),
            on_complete: Box::new(move || complete.lock().unwrap().push("complete".into())),
        };
        (log, handlers)
    }

    #[test]
    fn prepass_records_and_flags_empty_cache() {
        let resolver: MockResolver<u32> = MockResolver::new(CachePolicy::never_expires());
        resolver.reset();
        resolver.prepass();

        assert_eq!(resolver.selections().len(), 1);
        assert!(resolver.should_fetch(), "nothing cached yet");
    }

    #[test]
    fn prepass_leaves_flag_alone_for_fresh_cache() {
        let resolver = MockResolver::<u32>::new(CachePolicy::never_expires()).warm(5u32);
        resolver.prepass();
        assert!(!resolver.should_fetch());
    }

    #[tokio::test(start_paused = true)]
    async fn prepass_flags_stale_cache() {
        let policy = CachePolicy::with_max_age(Duration::from_secs(10));
        let resolver = MockResolver::<u32>::new(policy).warm(5);

        resolver.prepass();
        assert!(!resolver.should_fetch());

        tokio::time::advance(Duration::from_secs(11)).await;
        resolver.prepass();
        assert!(resolver.should_fetch());
    }

    #[tokio::test]
    async fn resolve_uses_queue_then_fallback() {
        let resolver = MockResolver::<u32>::new(CachePolicy::never_expires()).warm(1u32);
        resolver.queue_response(Ok(2));
        resolver.queue_response(Err(FetchError::new("boom")));

        assert_eq!(resolver.resolve().await, Ok(2));
        assert_eq!(resolver.resolve().await, Err(FetchError::new("boom")));
        // Empty queue, no fallback: echo the cache.
        assert_eq!(resolver.resolve().await, Ok(2));
        assert_eq!(resolver.fetch_count(), 3);

        resolver.respond_with(Ok(9));
        assert_eq!(resolver.resolve().await, Ok(9));
        assert_eq!(resolver.accessor(), 9);
    }

    #[tokio::test]
    async fn subscribe_delivers_fetch_then_pushes() {
        let resolver = MockResolver::<u32>::new(CachePolicy::never_expires());
        resolver.queue_response(Ok(1u32));
        let (log, handlers) = capture();

        let unsubscribe = resolver.subscribe(handlers);
        tokio::task::yield_now().await;
        resolver.push(2);
        resolver.push_error(FetchError::new("lost"));

        assert_eq!(*log.lock().unwrap(), vec!["next:1", "next:2", "error:lost"]);

        unsubscribe.call();
        resolver.push(3);
        assert_eq!(log.lock().unwrap().len(), 3);
        assert_eq!(resolver.listener_count(), 0);
    }

    #[tokio::test]
    async fn paused_fetch_waits_for_resume() {
        let resolver = MockResolver::<u32>::new(CachePolicy::never_expires());
        resolver.queue_response(Ok(7u32));
        resolver.pause();
        let (log, handlers) = capture();

        let _unsubscribe = resolver.subscribe(handlers);
        tokio::task::yield_now().await;
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(resolver.fetch_count(), 1);

        resolver.resume();
        tokio::task::yield_now().await;
        assert_eq!(*log.lock().unwrap(), vec!["next:7"]);
    }

    #[tokio::test]
    async fn dropped_subscription_discards_late_answer() {
        let resolver = MockResolver::<u32>::new(CachePolicy::never_expires());
        resolver.pause();
        let (log, handlers) = capture();

        resolver.subscribe(handlers).call();
        resolver.resume();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(resolver.fetch_count(), 1, "the request still went out");
    }

    #[test]
    fn replace_cache_changes_identity_and_empties_it() {
        let resolver = MockResolver::<u32>::new(CachePolicy::never_expires()).warm(1u32);
        let before = resolver.cache();

        let after = resolver.replace_cache(CachePolicy::never_expires());
        assert_ne!(before.id, after.id);

        resolver.prepass();
        assert!(resolver.should_fetch());
    }
}
