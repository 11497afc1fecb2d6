//! Live query coordinator.
//!
//! A [`LiveQuery`] owns one query session. It decides when its resolver has
//! to fetch, makes sure at most one fetch is in flight, keeps a push
//! subscription open after each fetch, and re-runs the decision on passive
//! triggers (interval, reconnect, visibility, cache invalidation).
//!
//! # Refetch decision
//!
//! Every trigger runs the same steps:
//!
//! 1. Reset the resolver context. Force the freshness flag on when the cache
//!    must be bypassed or the resolver switched to another cache.
//! 2. Unless this is a soft refetch against a never-expiring cache, restore
//!    the last successful selections into an empty collection and run the
//!    prepass.
//! 3. Stop if nothing is selected, or if the cache is fresh (clearing the
//!    selections when no fetch is in flight).
//! 4. Join the running fetch, or acquire the fetch mutex and subscribe. A
//!    fetch still running against a cache the resolver has since replaced is
//!    superseded instead of joined.
//!
//! The ordering rules live in [`livesync_core::refetch`]; this module
//! performs the side effects.
//!
//! # Notifications
//!
//! State changes are applied to the session immediately ([`LiveQuery::state`])
//! but published to [`LiveQuery::state_changes`] from a scheduler flush, so a
//! burst of changes in one turn produces one revision.

use livesync_core::{
    decide, plan_prepass, DecideInput, Phase, PhaseEvent, PrepassInput, RefetchDecision,
    RefetchRequest,
};
use livesync_types::{CacheId, FetchError, SelectionSet, SessionId, SnapshotError, Topic};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::client::CacheInvalidation;
use crate::config::QueryConfig;
use crate::pubsub::{PubSub, PubSubError};
use crate::resolver::{Handlers, Resolver, Unsubscribe};
use crate::scheduler::Scheduler;
use crate::transport::TransportStatus;

/// Message of the error handed to waiters of a fetch that was torn down.
const CLEANED_UP: &str = "live query was cleaned up before the fetch settled";

/// Outcome slot of the in-flight fetch. `None` until it settles.
type Settled = Option<Result<(), FetchError>>;

/// Per-query options.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Passive refetch period. `None` disables the interval trigger.
    pub refetch_interval: Option<Duration>,
    /// Refetch when the transport reconnects.
    pub refetch_on_reconnect: bool,
    /// Refetch when the application becomes visible.
    pub refetch_on_visible: bool,
    /// Keep a push subscription open after each fetch. When false, fetches go
    /// through [`Resolver::resolve`].
    pub push_updates: bool,
    /// Pub/sub topics whose invalidations this query follows.
    pub invalidation_topics: Vec<Topic>,
    /// Selections exported by an earlier session, used as the initial
    /// last-successful snapshot.
    pub restore_snapshot: Option<SelectionSet>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from(&QueryConfig::default())
    }
}

impl From<&QueryConfig> for QueryOptions {
    fn from(config: &QueryConfig) -> Self {
        Self {
            refetch_interval: config.refetch_interval(),
            refetch_on_reconnect: config.refetch_on_reconnect,
            refetch_on_visible: config.refetch_on_visible,
            push_updates: config.push_updates,
            invalidation_topics: Vec::new(),
            restore_snapshot: None,
        }
    }
}

impl QueryOptions {
    /// Follow invalidations published on `topic`.
    pub fn invalidated_by(mut self, topic: impl Into<Topic>) -> Self {
        self.invalidation_topics.push(topic.into());
        self
    }
}

/// UI-facing state of a live query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryState {
    /// A fetch is in flight.
    pub loading: bool,
    /// Error of the last failed fetch or push channel, cleared by new data.
    pub error: Option<FetchError>,
    /// Session phase.
    pub phase: Phase,
    /// Bumped once per published batch of changes.
    pub revision: u64,
}

/// Application visibility, for the visibility trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// In the foreground.
    #[default]
    Visible,
    /// In the background.
    Hidden,
}

/// Session control used by the client registry.
pub(crate) trait SessionControl: Send + Sync {
    fn cleanup(&self);
    fn is_closed(&self) -> bool;
}

/// A mounted live query.
///
/// Dropping it cleans the session up.
pub struct LiveQuery<R: Resolver> {
    shared: Arc<Shared<R>>,
}

struct Shared<R: Resolver> {
    id: SessionId,
    resolver: R,
    scheduler: Scheduler,
    options: QueryOptions,
    session: Mutex<Session>,
    state_tx: watch::Sender<QueryState>,
}

struct Session {
    state: QueryState,
    /// Fetch mutex: present while a fetch is in flight.
    fetch: Option<watch::Sender<Settled>>,
    /// Bumped on every acquire and on cleanup. Handlers carry the value they
    /// were created with and are ignored once it moves on.
    generation: u64,
    unsubscribe: Option<Unsubscribe>,
    /// Selections of the last successful fetch.
    snapshot: SelectionSet,
    bound_cache: CacheId,
    triggers: Vec<JoinHandle<()>>,
    mounted: bool,
    closed: bool,
}

impl<R: Resolver> LiveQuery<R> {
    /// Create a session for `resolver`. Nothing happens until
    /// [`mount`](Self::mount).
    pub fn new(resolver: R, scheduler: Scheduler, options: QueryOptions) -> Self {
        let bound_cache = resolver.cache().id;
        let snapshot = options.restore_snapshot.clone().unwrap_or_default();
        let (state_tx, _) = watch::channel(QueryState::default());
        Self {
            shared: Arc::new(Shared {
                id: SessionId::new(),
                resolver,
                scheduler,
                options,
                session: Mutex::new(Session {
                    state: QueryState::default(),
                    fetch: None,
                    generation: 0,
                    unsubscribe: None,
                    snapshot,
                    bound_cache,
                    triggers: Vec::new(),
                    mounted: false,
                    closed: false,
                }),
                state_tx,
            }),
        }
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Start the interval trigger and run the initial refetch decision.
    ///
    /// Only the first call has an effect. Fetch errors land in
    /// [`state`](Self::state); use [`settled`](Self::settled) to wait for the
    /// initial fetch. Must be called from within a tokio runtime.
    pub fn mount(&self) {
        self.shared.mount();
    }

    /// Run the refetch decision and wait for the resulting fetch, if any.
    ///
    /// With `ignore_cache` the cache is bypassed and a fetch always happens
    /// (or the running one is joined). Resolves immediately when nothing has
    /// to be fetched.
    pub async fn refetch(&self, ignore_cache: bool) -> Result<(), FetchError> {
        let waiter = self.shared.begin(RefetchRequest::imperative(ignore_cache));
        settle(waiter).await
    }

    /// Wait for the in-flight fetch, if any, to settle.
    pub async fn settled(&self) -> Result<(), FetchError> {
        let waiter = self.shared.lock().fetch.as_ref().map(watch::Sender::subscribe);
        settle(waiter).await
    }

    /// Current data, read through the resolver's accessor.
    pub fn data(&self) -> R::Data {
        self.shared.resolver.accessor()
    }

    /// The resolver behind this query.
    pub fn resolver(&self) -> &R {
        &self.shared.resolver
    }

    /// Current session state, including changes not yet published.
    pub fn state(&self) -> QueryState {
        self.shared.lock().state.clone()
    }

    /// Published state, one revision per scheduler flush.
    pub fn state_changes(&self) -> watch::Receiver<QueryState> {
        self.shared.state_tx.subscribe()
    }

    /// Check if a fetch is in flight.
    pub fn is_fetching(&self) -> bool {
        self.shared.lock().fetch.is_some()
    }

    /// Selections of the last successful fetch.
    pub fn snapshot(&self) -> SelectionSet {
        self.shared.lock().snapshot.clone()
    }

    /// Serialize [`snapshot`](Self::snapshot) for a later
    /// [`QueryOptions::restore_snapshot`].
    pub fn export_snapshot(&self) -> Result<Vec<u8>, SnapshotError> {
        self.snapshot().to_bytes()
    }

    /// Refetch on every disconnected to connected edge of `status`.
    ///
    /// Returns false if the reconnect trigger is disabled.
    pub fn watch_transport(&self, status: watch::Receiver<TransportStatus>) -> bool {
        if !self.shared.options.refetch_on_reconnect {
            return false;
        }
        self.shared.follow_edges(status, |before: TransportStatus, now: TransportStatus| {
            !before.is_connected() && now.is_connected()
        });
        true
    }

    /// Refetch on every hidden to visible edge of `visibility`.
    ///
    /// Returns false if the visibility trigger is disabled.
    pub fn watch_visibility(&self, visibility: watch::Receiver<Visibility>) -> bool {
        if !self.shared.options.refetch_on_visible {
            return false;
        }
        self.shared.follow_edges(visibility, |before, now| {
            before == Visibility::Hidden && now == Visibility::Visible
        });
        true
    }

    /// Follow invalidations on the configured topics.
    ///
    /// Each invalidation schedules a coalesced state refresh, or a cache
    /// bypassing refetch when it asks for one. Returns false when no topics
    /// are configured.
    pub fn watch_invalidations(
        &self,
        pubsub: &PubSub<CacheInvalidation>,
    ) -> Result<bool, PubSubError> {
        let topics = &self.shared.options.invalidation_topics;
        if topics.is_empty() {
            return Ok(false);
        }
        let subscription = pubsub.subscribe(topics.iter().cloned())?;
        let weak = Arc::downgrade(&self.shared);
        let handle = tokio::spawn(async move {
            while let Some(invalidation) = subscription.next().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                tracing::trace!("session {} invalidated by {}", shared.id, invalidation.topic);
                if invalidation.refetch {
                    shared.begin(RefetchRequest::imperative(true));
                } else {
                    shared.notify_ui();
                }
            }
        });
        self.shared.track(handle);
        Ok(true)
    }

    /// Tear the session down: unsubscribe the push channel, stop every
    /// trigger, and fail any waiter of the in-flight fetch. Idempotent.
    pub fn cleanup(&self) {
        self.shared.cleanup();
    }

    pub(crate) fn control(&self) -> Weak<dyn SessionControl> {
        let weak: Weak<Shared<R>> = Arc::downgrade(&self.shared);
        weak
    }

    /// A deferred [`mount`](Self::mount) that does nothing if the query is
    /// gone by the time it runs.
    pub(crate) fn mount_intent(&self) -> impl FnOnce() + Send + 'static {
        let weak = Arc::downgrade(&self.shared);
        move || {
            if let Some(shared) = weak.upgrade() {
                shared.mount();
            }
        }
    }
}

impl<R: Resolver> Drop for LiveQuery<R> {
    fn drop(&mut self) {
        self.shared.cleanup();
    }
}

impl<R: Resolver> std::fmt::Debug for LiveQuery<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuery")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

async fn settle(waiter: Option<watch::Receiver<Settled>>) -> Result<(), FetchError> {
    let Some(mut waiter) = waiter else {
        return Ok(());
    };
    let outcome = match waiter.wait_for(Option::is_some).await {
        Ok(settled) => (*settled).clone().unwrap_or(Ok(())),
        Err(_) => Err(FetchError::new(CLEANED_UP)),
    };
    outcome
}

impl<R: Resolver> Shared<R> {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mount(self: &Arc<Self>) {
        {
            let mut session = self.lock();
            if session.mounted || session.closed {
                return;
            }
            session.mounted = true;
        }
        if let Some(period) = self.options.refetch_interval {
            self.spawn_interval(period);
        }
        tracing::debug!("session {} mounted", self.id);
        self.begin(RefetchRequest::mount());
    }

    /// Run the refetch decision. Returns a waiter when a fetch was started or
    /// joined.
    fn begin(self: &Arc<Self>, request: RefetchRequest) -> Option<watch::Receiver<Settled>> {
        let cache = self.resolver.cache();
        let cache_changed = {
            let mut session = self.lock();
            // Passive triggers only act on mounted sessions.
            if session.closed || (request.soft && !session.mounted) {
                return None;
            }
            let changed = session.bound_cache != cache.id;
            session.bound_cache = cache.id;
            changed
        };

        let plan = plan_prepass(PrepassInput {
            request,
            cache_changed,
            never_expires: cache.policy.is_never_expiring(),
        });

        self.resolver.reset();
        if plan.force_fetch {
            self.resolver.set_should_fetch(true);
        }
        if plan.run_prepass {
            if plan.should_restore(self.resolver.selections().is_empty()) {
                let snapshot = self.lock().snapshot.clone();
                if !snapshot.is_empty() {
                    self.resolver.restore_selections(&snapshot);
                }
            }
            self.resolver.prepass();
        }

        let has_selections = !self.resolver.selections().is_empty();
        let should_fetch = self.resolver.should_fetch();

        let mut session = self.lock();
        if session.closed {
            return None;
        }
        let decision = decide(DecideInput {
            has_selections,
            should_fetch,
            fetch_in_flight: session.fetch.is_some(),
            cache_changed,
        });
        match decision {
            RefetchDecision::NothingSelected => None,
            RefetchDecision::UpToDate { clear_selections } => {
                drop(session);
                if clear_selections {
                    self.resolver.clear_selections();
                }
                None
            }
            RefetchDecision::Join => {
                tracing::debug!("session {} joined the in-flight fetch", self.id);
                session.fetch.as_ref().map(watch::Sender::subscribe)
            }
            RefetchDecision::Fetch | RefetchDecision::Supersede => {
                session.generation += 1;
                let generation = session.generation;
                // A superseded fetch keeps its settle channel, so its waiters
                // settle with the new fetch.
                let waiter = match &session.fetch {
                    Some(settled) => {
                        tracing::debug!(
                            "session {} superseding fetch after cache switch",
                            self.id
                        );
                        settled.subscribe()
                    }
                    None => {
                        let (settled, waiter) = watch::channel(None);
                        session.fetch = Some(settled);
                        session.state.phase =
                            session.state.phase.on_event(PhaseEvent::FetchStarted);
                        waiter
                    }
                };
                session.state.loading = true;
                let previous = session.unsubscribe.take();
                drop(session);

                tracing::debug!(
                    "session {} acquired fetch mutex (generation {})",
                    self.id,
                    generation
                );
                if let Some(previous) = previous {
                    tracing::debug!("session {} replacing push subscription", self.id);
                    previous.call();
                }
                self.notify_ui();
                self.start_fetch(generation);
                Some(waiter)
            }
        }
    }

    fn start_fetch(self: &Arc<Self>, generation: u64) {
        let unsubscribe = if self.options.push_updates {
            self.resolver.subscribe(self.handlers(generation))
        } else {
            let shared = Arc::clone(self);
            let task = tokio::spawn(async move {
                match shared.resolver.resolve().await {
                    Ok(_) => shared.handle_next(generation),
                    Err(error) => shared.handle_error(generation, error),
                }
            });
            Unsubscribe::new(move || task.abort())
        };

        let mut session = self.lock();
        if session.closed || session.generation != generation {
            drop(session);
            unsubscribe.call();
        } else {
            session.unsubscribe = Some(unsubscribe);
        }
    }

    fn handlers(self: &Arc<Self>, generation: u64) -> Handlers<R::Data> {
        let next = Arc::downgrade(self);
        let error = Arc::downgrade(self);
        let complete = Arc::downgrade(self);
        Handlers {
            on_next: Box::new(move |_data| {
                if let Some(shared) = next.upgrade() {
                    shared.handle_next(generation);
                }
            }),
            on_error: Box::new(move |err| {
                if let Some(shared) = error.upgrade() {
                    shared.handle_error(generation, err);
                }
            }),
            on_complete: Box::new(move || {
                if let Some(shared) = complete.upgrade() {
                    shared.handle_complete(generation);
                }
            }),
        }
    }

    /// Data arrived. Settles the fetch if one is held, otherwise it is a push
    /// update.
    fn handle_next(self: &Arc<Self>, generation: u64) {
        let fetch = {
            let mut session = self.lock();
            if session.closed || session.generation != generation {
                tracing::trace!("session {} ignoring stale data", self.id);
                return;
            }
            session.state.phase = session.state.phase.on_event(PhaseEvent::DataReceived);
            session.state.loading = false;
            session.state.error = None;
            session.fetch.take()
        };

        if let Some(fetch) = fetch {
            let selections = self.resolver.selections();
            self.resolver.set_should_fetch(false);
            self.lock().snapshot = selections;
            fetch.send_replace(Some(Ok(())));
            tracing::debug!(
                "session {} released fetch mutex (generation {})",
                self.id,
                generation
            );
        }
        self.notify_ui();
    }

    fn handle_error(self: &Arc<Self>, generation: u64, error: FetchError) {
        let fetch = {
            let mut session = self.lock();
            if session.closed || session.generation != generation {
                tracing::trace!("session {} ignoring stale error", self.id);
                return;
            }
            session.state.phase = session.state.phase.on_event(PhaseEvent::FetchFailed);
            session.state.loading = false;
            session.state.error = Some(error.clone());
            session.fetch.take()
        };

        tracing::warn!("session {} fetch failed: {}", self.id, error);
        if let Some(fetch) = fetch {
            fetch.send_replace(Some(Err(error)));
        }
        self.notify_ui();
    }

    fn handle_complete(self: &Arc<Self>, generation: u64) {
        let fetch = {
            let mut session = self.lock();
            if session.closed || session.generation != generation {
                return;
            }
            // The push channel is over; nothing left to detach.
            session.unsubscribe = None;
            let fetch = session.fetch.take();
            if fetch.is_some() {
                session.state.phase = session.state.phase.on_event(PhaseEvent::DataReceived);
                session.state.loading = false;
            }
            fetch
        };

        if let Some(fetch) = fetch {
            fetch.send_replace(Some(Ok(())));
            tracing::debug!("session {} fetch completed without data", self.id);
        }
        self.notify_ui();
    }

    /// Schedule a state publication for the end of the turn.
    fn notify_ui(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.scheduler.enqueue_keyed(self.id, move || {
            if let Some(shared) = weak.upgrade() {
                shared.publish_state();
            }
        });
    }

    fn publish_state(&self) {
        let state = {
            let mut session = self.lock();
            session.state.revision += 1;
            session.state.clone()
        };
        self.state_tx.send_replace(state);
    }

    fn follow_edges<S>(
        self: &Arc<Self>,
        mut feed: watch::Receiver<S>,
        rising: impl Fn(S, S) -> bool + Send + 'static,
    ) where
        S: Copy + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut last = *feed.borrow_and_update();
            while feed.changed().await.is_ok() {
                let now = *feed.borrow_and_update();
                let fire = rising(last, now);
                last = now;
                if !fire {
                    continue;
                }
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                tracing::debug!("session {} passive refetch", shared.id);
                shared.begin(RefetchRequest::passive());
            }
        });
        self.track(handle);
    }

    fn spawn_interval(self: &Arc<Self>, period: Duration) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                tracing::trace!("session {} interval refetch", shared.id);
                shared.begin(RefetchRequest::passive());
            }
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut session = self.lock();
        if session.closed {
            handle.abort();
        } else {
            session.triggers.push(handle);
        }
    }

    fn cleanup(&self) {
        let (unsubscribe, triggers, fetch) = {
            let mut session = self.lock();
            if session.closed {
                return;
            }
            session.closed = true;
            session.generation += 1;
            session.state.phase = session.state.phase.on_event(PhaseEvent::Cleared);
            session.state.loading = false;
            (
                session.unsubscribe.take(),
                std::mem::take(&mut session.triggers),
                session.fetch.take(),
            )
        };

        for trigger in triggers {
            trigger.abort();
        }
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe.call();
        }
        if let Some(fetch) = fetch {
            fetch.send_replace(Some(Err(FetchError::new(CLEANED_UP))));
        }
        self.publish_state();
        tracing::debug!("session {} cleaned up", self.id);
    }
}

impl<R: Resolver> SessionControl for Shared<R> {
    fn cleanup(&self) {
        Shared::cleanup(self);
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
