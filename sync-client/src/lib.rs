//! # sync-client
//!
//! Client library for livesync, a reactive data-synchronization engine.
//!
//! This is the main library that applications use to keep query results
//! live.
//!
//! ## Features
//!
//! - **Single-flight fetches**: at most one fetch per live query, joined by
//!   every concurrent refetch
//! - **Push updates**: each fetch leaves a subscription open, last subscribe
//!   wins
//! - **Passive refetch**: interval, reconnect, visibility, and
//!   cache-invalidation triggers
//! - **Coalesced notifications**: one state revision per scheduler turn
//! - **Pub/Sub**: topic fan-out over pull-based deferred iterators
//! - **Pure decisions**: uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use livesync_client::{LiveClient, LiveConfig, MockResolver, MockTransport};
//!
//! let client = LiveClient::new(LiveConfig::default(), MockTransport::new());
//! let query = client.mount(MockResolver::<u32>::new(client.cache_policy()))?;
//! client.connect().await?;
//!
//! query.refetch(false).await?;
//! let mut changes = query.state_changes();
//! changes.changed().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod gate;
pub mod iter;
pub mod pubsub;
pub mod query;
pub mod resolver;
pub mod scheduler;
pub mod transport;

pub use client::{CacheInvalidation, LiveClient, LiveError};
pub use config::{ConfigError, LiveConfig, QueryConfig, TransportConfig};
pub use gate::ReadinessGate;
pub use iter::{DeferredIterator, IteratorError};
pub use pubsub::{PubSub, PubSubError, Subscription};
pub use query::{LiveQuery, QueryOptions, QueryState, Visibility};
pub use resolver::{Handlers, MockResolver, Resolver, Unsubscribe};
pub use scheduler::Scheduler;
pub use transport::{MockTransport, Transport, TransportError, TransportStatus};

pub use livesync_core::Phase;
pub use livesync_types::{
    CacheHandle, CachePolicy, FetchError, Selection, SelectionSet, SessionId, SubscriberId, Topic,
};
