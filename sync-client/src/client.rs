//! LiveClient - the main interface for livesync.
//!
//! This module provides [`LiveClient`], which wires the pieces together for
//! an application: one transport, one coalescing scheduler shared by every
//! live query, a readiness gate that holds mounts back until the transport is
//! up, and a pub/sub engine for cache-invalidation fan-out.
//!
//! # Architecture
//!
//! ```text
//! Application → LiveClient → LiveQuery → Resolver → Network
//!                   ↓            ↓
//!            ReadinessGate   sync-core (pure decisions)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use livesync_client::{LiveClient, LiveConfig, MockTransport, MockResolver};
//!
//! let client = LiveClient::new(LiveConfig::default(), MockTransport::new());
//! let query = client.mount(MockResolver::<u32>::new(client.cache_policy()))?;
//!
//! client.connect().await?;     // buffered mounts start here
//! query.refetch(false).await?;
//! println!("{:?}", query.state());
//! ```

use dashmap::DashMap;
use livesync_types::{CachePolicy, FetchError, SessionId, SnapshotError, Topic};
use std::path::Path;
use std::sync::Weak;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::{ConfigError, LiveConfig};
use crate::gate::ReadinessGate;
use crate::pubsub::{PubSub, PubSubError};
use crate::query::{LiveQuery, QueryOptions, SessionControl, Visibility};
use crate::resolver::Resolver;
use crate::scheduler::Scheduler;
use crate::transport::{Transport, TransportError};

/// Client errors.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Pub/sub misuse.
    #[error("pub/sub error: {0}")]
    PubSub(#[from] PubSubError),

    /// Fetch failed.
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Snapshot encoding error.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Payload of a cache-invalidation publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInvalidation {
    /// Topic the invalidation was published on.
    pub topic: Topic,
    /// Bypass the cache and refetch instead of only refreshing state.
    pub refetch: bool,
}

impl CacheInvalidation {
    /// Cached entries changed; listeners re-read them.
    pub fn refresh(topic: impl Into<Topic>) -> Self {
        Self {
            topic: topic.into(),
            refetch: false,
        }
    }

    /// Cached entries are wrong; listeners refetch.
    pub fn refetch(topic: impl Into<Topic>) -> Self {
        Self {
            topic: topic.into(),
            refetch: true,
        }
    }
}

/// The main livesync client.
///
/// Owns the transport and the shared runtime pieces every live query uses.
pub struct LiveClient<T: Transport> {
    config: LiveConfig,
    transport: T,
    scheduler: Scheduler,
    pubsub: PubSub<CacheInvalidation>,
    gate: ReadinessGate,
    sessions: DashMap<SessionId, Weak<dyn SessionControl>>,
    visibility: watch::Sender<Visibility>,
}

impl<T: Transport> LiveClient<T> {
    /// Create a new LiveClient.
    pub fn new(config: LiveConfig, transport: T) -> Self {
        let (visibility, _) = watch::channel(Visibility::Visible);
        Self {
            config,
            transport,
            scheduler: Scheduler::new(),
            pubsub: PubSub::new(),
            gate: ReadinessGate::new(),
            sessions: DashMap::new(),
            visibility,
        }
    }

    /// Create a LiveClient from a TOML configuration file.
    pub fn from_file(path: &Path, transport: T) -> Result<Self, LiveError> {
        Ok(Self::new(LiveConfig::from_file(path)?, transport))
    }

    /// Connect the transport. Mounts buffered so far start once it reports
    /// connected.
    ///
    /// Fails with [`TransportError::Timeout`] when the attempt outlives the
    /// configured connect timeout.
    pub async fn connect(&self) -> Result<(), LiveError> {
        if self.gate.init(&self.transport) {
            tracing::debug!("readiness gate attached to transport");
        }

        let address = &self.config.transport.address;
        let connecting = self.transport.connect(address);
        let result = match self.config.transport.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .unwrap_or(Err(TransportError::Timeout)),
            None => connecting.await,
        };
        if let Err(e) = &result {
            tracing::warn!("connect to {} failed: {}", address, e);
        }
        result?;

        tracing::info!("connected to {}", address);
        Ok(())
    }

    /// Close the transport. Live queries stay mounted and refetch on
    /// reconnect.
    pub async fn disconnect(&self) -> Result<(), LiveError> {
        self.transport.close().await?;
        Ok(())
    }

    /// Check if the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Mount a live query with the configured defaults.
    pub fn mount<R: Resolver>(&self, resolver: R) -> Result<LiveQuery<R>, LiveError> {
        self.mount_with(resolver, QueryOptions::from(&self.config.query))
    }

    /// Mount a live query with explicit options.
    ///
    /// The query is wired to the transport, visibility, and invalidation
    /// feeds right away; its initial fetch waits for the transport. Must be
    /// called from within a tokio runtime.
    pub fn mount_with<R: Resolver>(
        &self,
        resolver: R,
        options: QueryOptions,
    ) -> Result<LiveQuery<R>, LiveError> {
        let query = LiveQuery::new(resolver, self.scheduler.clone(), options);
        query.watch_transport(self.transport.status());
        query.watch_visibility(self.visibility.subscribe());
        query.watch_invalidations(&self.pubsub)?;

        self.prune_sessions();
        self.sessions.insert(query.id(), query.control());
        self.gate.on_subscribe(query.mount_intent());
        tracing::debug!("session {} registered", query.id());
        Ok(query)
    }

    /// Clean a live query up and forget it.
    pub fn unmount<R: Resolver>(&self, query: LiveQuery<R>) {
        self.sessions.remove(&query.id());
        query.cleanup();
    }

    /// Publish a cache invalidation. Returns the number of live queries
    /// reached.
    pub fn invalidate(&self, topic: impl Into<Topic>, refetch: bool) -> Result<usize, LiveError> {
        let topic = topic.into();
        let invalidation = CacheInvalidation {
            topic: topic.clone(),
            refetch,
        };
        Ok(self.pubsub.publish(topic, invalidation)?)
    }

    /// Report application visibility. Hidden to visible refetches stale
    /// queries.
    pub fn set_visibility(&self, visibility: Visibility) {
        self.visibility.send_replace(visibility);
    }

    /// Number of live queries still mounted.
    pub fn session_count(&self) -> usize {
        self.prune_sessions();
        self.sessions.len()
    }

    /// Forget sessions that were dropped or cleaned up without `unmount`.
    fn prune_sessions(&self) {
        self.sessions
            .retain(|_, session| session.upgrade().is_some_and(|s| !s.is_closed()));
    }

    /// Cache policy from the configuration, for building resolvers.
    pub fn cache_policy(&self) -> CachePolicy {
        self.config.cache
    }

    /// Get the configuration.
    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    /// Get the pub/sub engine carrying invalidations.
    pub fn pubsub(&self) -> &PubSub<CacheInvalidation> {
        &self.pubsub
    }

    /// Get the shared scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Get the readiness gate.
    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Get the transport (for testing).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Clean every live query up, close the pub/sub engine, and close the
    /// transport.
    pub async fn shutdown(&self) -> Result<(), LiveError> {
        let sessions: Vec<_> = self
            .sessions
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        self.sessions.clear();
        for session in &sessions {
            session.cleanup();
        }
        self.pubsub.close();
        tracing::info!("shut down {} session(s)", sessions.len());

        self.transport.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MockResolver;
    use crate::transport::{MockTransport, TransportStatus};
    use livesync_core::Phase;

    fn test_client() -> LiveClient<MockTransport> {
        LiveClient::new(LiveConfig::default(), MockTransport::new())
    }

    // ===========================================
    // Connection Tests
    // ===========================================

    #[tokio::test]
    async fn client_connects_via_transport() {
        let client = test_client();
        assert!(!client.is_connected());

        client.connect().await.unwrap();

        assert!(client.is_connected());
        assert_eq!(
            client.transport().connected_address(),
            Some("127.0.0.1:4433".to_string())
        );
    }

    #[tokio::test]
    async fn connect_failure_returns_error() {
        let client = test_client();
        client.transport().fail_next_connect("refused");

        let result = client.connect().await;
        assert!(matches!(result, Err(LiveError::Transport(_))));
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connect_times_out_and_keeps_buffering() {
        let client = test_client();
        client.transport().stall_next_connect();
        let resolver: MockResolver<u32> = MockResolver::new(client.cache_policy());
        let _query = client.mount(resolver.clone()).unwrap();

        let result = client.connect().await;
        assert!(matches!(result, Err(LiveError::Transport(TransportError::Timeout))));
        assert_eq!(*client.transport().status().borrow(), TransportStatus::Connecting);

        tokio::task::yield_now().await;
        assert!(!client.gate().is_open());
        assert_eq!(client.gate().pending_count(), 1);
        assert_eq!(resolver.fetch_count(), 0);
    }

    #[tokio::test]
    async fn client_disconnects() {
        let client = test_client();
        client.connect().await.unwrap();

        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
    }

    // ===========================================
    // Mount Tests
    // ===========================================

    #[tokio::test]
    async fn mount_waits_for_connection() {
        let client = test_client();
        let resolver: MockResolver<u32> = MockResolver::new(client.cache_policy());
        let query = client.mount(resolver.clone()).unwrap();

        tokio::task::yield_now().await;
        assert_eq!(resolver.fetch_count(), 0);
        assert_eq!(client.gate().pending_count(), 1);

        client.connect().await.unwrap();
        tokio::task::yield_now().await;
        query.settled().await.unwrap();

        assert_eq!(resolver.fetch_count(), 1);
        assert_eq!(query.state().phase, Phase::Streaming);
    }

    #[tokio::test]
    async fn mount_after_connect_starts_immediately() {
        let client = test_client();
        client.connect().await.unwrap();
        tokio::task::yield_now().await;

        let resolver: MockResolver<u32> = MockResolver::new(client.cache_policy());
        let query = client.mount(resolver.clone()).unwrap();

        assert!(query.is_fetching());
        query.settled().await.unwrap();
        assert_eq!(resolver.fetch_count(), 1);
    }

    #[tokio::test]
    async fn session_count_tracks_unmount_and_drop() {
        let client = test_client();
        let a = client.mount(MockResolver::<u32>::new(client.cache_policy())).unwrap();
        let b = client.mount(MockResolver::<u32>::new(client.cache_policy())).unwrap();
        assert_eq!(client.session_count(), 2);

        client.unmount(a);
        assert_eq!(client.session_count(), 1);

        drop(b);
        assert_eq!(client.session_count(), 0);
    }

    #[tokio::test]
    async fn mount_forgets_dropped_sessions() {
        let client = test_client();
        for _ in 0..3 {
            drop(client.mount(MockResolver::<u32>::new(client.cache_policy())).unwrap());
        }
        let kept = client.mount(MockResolver::<u32>::new(client.cache_policy())).unwrap();

        assert_eq!(client.sessions.len(), 1);
        assert!(client.sessions.contains_key(&kept.id()));
    }

    // ===========================================
    // Invalidation Tests
    // ===========================================

    #[tokio::test]
    async fn invalidate_reaches_listening_queries() {
        let client = test_client();
        client.connect().await.unwrap();
        tokio::task::yield_now().await;

        let resolver: MockResolver<u32> = MockResolver::new(client.cache_policy());
        let options = QueryOptions::default().invalidated_by("users");
        let query = client.mount_with(resolver.clone(), options).unwrap();
        query.settled().await.unwrap();

        assert_eq!(client.invalidate("users", true).unwrap(), 1);
        assert_eq!(client.invalidate("posts", true).unwrap(), 0);

        tokio::task::yield_now().await;
        query.settled().await.unwrap();
        assert_eq!(resolver.fetch_count(), 2);
    }

    // ===========================================
    // Shutdown Tests
    // ===========================================

    #[tokio::test]
    async fn shutdown_cleans_everything_up() {
        let client = test_client();
        client.connect().await.unwrap();
        tokio::task::yield_now().await;

        let resolver: MockResolver<u32> = MockResolver::new(client.cache_policy());
        let query = client.mount(resolver.clone()).unwrap();
        query.settled().await.unwrap();
        assert_eq!(resolver.listener_count(), 1);

        client.shutdown().await.unwrap();

        assert_eq!(client.session_count(), 0);
        assert_eq!(resolver.listener_count(), 0);
        assert!(client.pubsub().is_closed());
        assert!(!client.is_connected());
        assert!(matches!(
            client.invalidate("users", false),
            Err(LiveError::PubSub(PubSubError::Closed))
        ));
    }

    #[test]
    fn config_error_converts() {
        let path = Path::new("/nonexistent/livesync.toml");
        let err = LiveClient::from_file(path, MockTransport::new()).err().unwrap();
        assert!(matches!(err, LiveError::Config(ConfigError::ReadError { .. })));
    }

    #[test]
    fn invalidation_constructors() {
        assert!(!CacheInvalidation::refresh("a").refetch);
        assert!(CacheInvalidation::refetch("a").refetch);
        assert_eq!(CacheInvalidation::refresh("a").topic, Topic::from("a"));
    }
}
