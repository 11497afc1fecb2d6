//! Transport-readiness gate.
//!
//! Holds subscription intents back until the transport reports connected,
//! then releases them in registration order. The decisions come from
//! [`livesync_core::GateState`]; this wrapper owns the state, runs released
//! intents outside the lock, and follows a transport's status feed.

use livesync_core::{GateEvent, GateState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::transport::{Transport, TransportStatus};

/// Deferred subscription start.
pub type Intent = Box<dyn FnOnce() + Send + 'static>;

/// Buffers intents until the transport is ready.
#[derive(Clone)]
pub struct ReadinessGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    state: Mutex<GateState<Intent>>,
    /// Status listener; present once `init` has run.
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl GateInner {
    fn state(&self) -> MutexGuard<'_, GateState<Intent>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, event: GateEvent<Intent>) {
        let ready = {
            let mut state = self.state();
            let (next, ready) = std::mem::take(&mut *state).on_event(event);
            *state = next;
            ready
        };
        if !ready.is_empty() {
            tracing::debug!("gate released {} intent(s)", ready.len());
        }
        for intent in ready {
            intent();
        }
    }
}

impl Drop for GateInner {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
    }
}

impl ReadinessGate {
    /// Create a gate in buffering mode.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::new()),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Register an intent. Runs now if the gate is open, otherwise on the
    /// next connected signal.
    pub fn on_subscribe(&self, intent: impl FnOnce() + Send + 'static) {
        self.inner.apply(GateEvent::Subscribe(Box::new(intent)));
    }

    /// Signal that the transport is connected.
    pub fn connected(&self) {
        self.inner.apply(GateEvent::Connected);
    }

    /// Signal that the transport dropped. New intents buffer again.
    pub fn disconnected(&self) {
        self.inner.apply(GateEvent::Disconnected);
    }

    /// Check if intents currently pass straight through.
    pub fn is_open(&self) -> bool {
        self.inner.state().is_open()
    }

    /// Number of intents waiting for a connection.
    pub fn pending_count(&self) -> usize {
        self.inner.state().pending_count()
    }

    /// Attach the gate to a transport's status feed.
    ///
    /// Applies the current status right away, then follows every change.
    /// Only the first call attaches; later calls return false and do nothing.
    /// Must be called from within a tokio runtime.
    pub fn init<T: Transport + ?Sized>(&self, transport: &T) -> bool {
        let mut status = transport.status();
        {
            let mut listener = self
                .inner
                .listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if listener.is_some() {
                return false;
            }
            let gate = Arc::downgrade(&self.inner);
            let mut feed = status.clone();
            feed.mark_unchanged();
            *listener = Some(tokio::spawn(follow(gate, feed)));
        }

        if status.borrow_and_update().is_connected() {
            self.connected();
        }
        true
    }
}

async fn follow(gate: Weak<GateInner>, mut feed: watch::Receiver<TransportStatus>) {
    while feed.changed().await.is_ok() {
        let connected = feed.borrow_and_update().is_connected();
        let Some(gate) = gate.upgrade() else {
            break;
        };
        if connected {
            gate.apply(GateEvent::Connected);
        } else {
            gate.apply(GateEvent::Disconnected);
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("open", &self.is_open())
            .field("pending", &self.pending_count())
            .finish()
    }
}
