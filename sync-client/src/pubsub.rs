//! Topic-based publish/subscribe engine.
//!
//! Each [`Subscription`] owns one [`DeferredIterator`] mailbox. Publishing to
//! a topic pushes the payload into the mailbox of every subscriber currently
//! registered on that topic. Delivery is at-least-once and non-durable: a
//! subscriber that arrives after a publish never sees it.
//!
//! The engine is used for cache-invalidation fan-out between live queries and
//! for delivering live-subscription payloads to consumers.
//!
//! # Example
//!
//! ```ignore
//! let pubsub = PubSub::new();
//! let sub = pubsub.subscribe(["users", "posts"])?;
//!
//! pubsub.publish("users", 1)?;
//! pubsub.publish("comments", 3)?; // nobody listening
//!
//! assert_eq!(sub.next().await, Some(1));
//! ```

use livesync_types::{SubscriberId, Topic};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;

use crate::iter::DeferredIterator;

/// Pub/sub misuse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubSubError {
    /// The engine was closed.
    #[error("pub/sub engine is closed")]
    Closed,

    /// A subscription needs at least one topic.
    #[error("subscribe requires at least one topic")]
    NoTopics,
}

/// Topic-keyed fan-out engine.
pub struct PubSub<P> {
    registry: Arc<Mutex<Registry<P>>>,
}

struct Registry<P> {
    /// Subscribers per topic, in subscription order.
    topics: HashMap<Topic, Vec<SubscriberId>>,
    subscribers: HashMap<SubscriberId, Entry<P>>,
    next_id: SubscriberId,
    closed: bool,
}

struct Entry<P> {
    topics: Vec<Topic>,
    mailbox: DeferredIterator<P>,
}

fn lock<P>(registry: &Mutex<Registry<P>>) -> MutexGuard<'_, Registry<P>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<P> Registry<P> {
    /// Detach one subscriber from every topic. Returns its mailbox if it was
    /// still registered.
    fn remove(&mut self, id: SubscriberId) -> Option<DeferredIterator<P>> {
        let entry = self.subscribers.remove(&id)?;
        for topic in &entry.topics {
            if let Some(ids) = self.topics.get_mut(topic) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.topics.remove(topic);
                }
            }
        }
        Some(entry.mailbox)
    }
}

impl<P: Clone> PubSub<P> {
    /// Create an open engine with no subscribers.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                topics: HashMap::new(),
                subscribers: HashMap::new(),
                next_id: SubscriberId::new(1),
                closed: false,
            })),
        }
    }

    /// Push `payload` to every subscriber currently on `topic`.
    ///
    /// Returns the number of subscribers reached.
    pub fn publish(&self, topic: impl Into<Topic>, payload: P) -> Result<usize, PubSubError> {
        let topic = topic.into();
        let registry = lock(&self.registry);
        if registry.closed {
            tracing::warn!("publish to {} on a closed engine", topic);
            return Err(PubSubError::Closed);
        }

        let Some(ids) = registry.topics.get(&topic) else {
            tracing::trace!("publish to {}: no subscribers", topic);
            return Ok(0);
        };

        let mut delivered = 0;
        for id in ids {
            if let Some(entry) = registry.subscribers.get(id) {
                if entry.mailbox.send(payload.clone()) {
                    delivered += 1;
                }
            }
        }
        tracing::trace!("publish to {}: {} subscriber(s)", topic, delivered);
        Ok(delivered)
    }

    /// Register a new subscriber on the given topics.
    ///
    /// Duplicate topics collapse, so a payload reaches the subscriber once
    /// per publish.
    pub fn subscribe<I, T>(&self, topics: I) -> Result<Subscription<P>, PubSubError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Topic>,
    {
        let topics: Vec<Topic> = topics
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if topics.is_empty() {
            return Err(PubSubError::NoTopics);
        }

        let mut registry = lock(&self.registry);
        if registry.closed {
            return Err(PubSubError::Closed);
        }

        let id = registry.next_id;
        registry.next_id = id.next();

        let mailbox = DeferredIterator::new();
        for topic in &topics {
            registry.topics.entry(topic.clone()).or_default().push(id);
        }
        registry.subscribers.insert(
            id,
            Entry {
                topics: topics.clone(),
                mailbox: mailbox.clone(),
            },
        );
        tracing::debug!("subscriber {} joined {:?}", id, topics);

        Ok(Subscription {
            id,
            mailbox,
            registry: Arc::downgrade(&self.registry),
        })
    }

    /// Remove subscribers. Unknown or already-removed ids are ignored.
    ///
    /// Any consumer blocked on a removed subscription resumes as done.
    pub fn unsubscribe(&self, ids: &[SubscriberId]) {
        let released: Vec<DeferredIterator<P>> = {
            let mut registry = lock(&self.registry);
            ids.iter().filter_map(|id| registry.remove(*id)).collect()
        };
        for mailbox in released {
            mailbox.cancel();
        }
    }

    /// Unsubscribe everyone, clear every topic, and refuse further use.
    pub fn close(&self) {
        let released: Vec<DeferredIterator<P>> = {
            let mut registry = lock(&self.registry);
            registry.closed = true;
            registry.topics.clear();
            registry
                .subscribers
                .drain()
                .map(|(_, entry)| entry.mailbox)
                .collect()
        };
        tracing::debug!("pub/sub closed, released {} subscriber(s)", released.len());
        for mailbox in released {
            mailbox.cancel();
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        lock(&self.registry).closed
    }

    /// Number of subscribers on a topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        lock(&self.registry).topics.get(topic).map_or(0, Vec::len)
    }

    /// Topics with at least one subscriber, sorted.
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = lock(&self.registry).topics.keys().cloned().collect();
        topics.sort();
        topics
    }
}

impl<P: Clone> Default for PubSub<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Clone for PubSub<P> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

/// One subscriber's view of the engine: a pull-based sequence of payloads.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription<P> {
    id: SubscriberId,
    mailbox: DeferredIterator<P>,
    registry: Weak<Mutex<Registry<P>>>,
}

impl<P> Subscription<P> {
    /// The subscriber id, for use with [`PubSub::unsubscribe`].
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next payload.
    ///
    /// Returns `None` once the subscriber was removed; the entry is then gone
    /// from the engine.
    pub async fn next(&self) -> Option<P> {
        match self.mailbox.next().await {
            Ok(Some(payload)) => Some(payload),
            // Mailboxes are only ever cancelled by the engine, never failed,
            // so an error here still just means the sequence is over.
            Ok(None) | Err(_) => {
                self.detach();
                None
            }
        }
    }

    /// Payloads waiting to be pulled.
    pub fn pending(&self) -> usize {
        self.mailbox.len()
    }

    fn detach(&self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(self.id);
        }
    }
}

impl<P> Drop for Subscription<P> {
    fn drop(&mut self) {
        self.detach();
        self.mailbox.cancel();
    }
}

impl<P> std::fmt::Debug for Subscription<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pending", &self.mailbox.len())
            .finish()
    }
}
