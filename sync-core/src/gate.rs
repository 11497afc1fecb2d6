//! Transport-readiness gate state machine.
//!
//! Subscription intents registered while the transport is not connected are
//! held back and released, in registration order, on the first connected
//! signal. While connected, new intents are released immediately. A disconnect
//! puts the gate back into buffering mode.
//!
//! Like the rest of sync-core this is pure: the caller feeds events and runs
//! whatever intents come back.

/// Gate state - NO I/O, just buffering decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState<T> {
    /// Transport not connected; intents are held.
    Buffering {
        /// Intents in registration order.
        pending: Vec<T>,
    },
    /// Transport connected; intents pass straight through.
    Open,
}

/// Events that drive the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent<T> {
    /// A consumer wants to start subscribing.
    Subscribe(T),
    /// The transport reported connected.
    Connected,
    /// The transport reported disconnected.
    Disconnected,
}

impl<T> GateState<T> {
    /// Create a gate in buffering mode.
    pub fn new() -> Self {
        Self::Buffering {
            pending: Vec::new(),
        }
    }

    /// Process an event and return the new state plus the intents to run now.
    pub fn on_event(self, event: GateEvent<T>) -> (Self, Vec<T>) {
        match (self, event) {
            (Self::Buffering { mut pending }, GateEvent::Subscribe(intent)) => {
                pending.push(intent);
                (Self::Buffering { pending }, vec![])
            }
            (Self::Buffering { pending }, GateEvent::Connected) => (Self::Open, pending),
            (Self::Buffering { pending }, GateEvent::Disconnected) => {
                (Self::Buffering { pending }, vec![])
            }

            (Self::Open, GateEvent::Subscribe(intent)) => (Self::Open, vec![intent]),
            // Already flushed; a repeated connected signal changes nothing.
            (Self::Open, GateEvent::Connected) => (Self::Open, vec![]),
            (Self::Open, GateEvent::Disconnected) => (Self::new(), vec![]),
        }
    }

    /// Check if intents currently pass straight through.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Number of intents waiting for a connection.
    pub fn pending_count(&self) -> usize {
        match self {
            Self::Buffering { pending } => pending.len(),
            Self::Open => 0,
        }
    }
}

impl<T> Default for GateState<T> {
    fn default() -> Self {
        Self::new()
    }
}
