//! Query session phase machine.
//!
//! A live query moves through these phases:
//!
//! ```text
//! Idle ──FetchStarted──► Pending ──DataReceived──► Streaming
//!                           │                        │   ▲
//!                      FetchFailed           FetchStarted │
//!                           ▼                        ▼   │
//!                         Error ◄──FetchFailed── Refetching
//! ```
//!
//! The machine is pure; sync-client feeds it events as fetches start and
//! settle and reads it back for UI state.

/// Phase of a live query session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No selections, nothing fetched.
    #[default]
    Idle,
    /// Fetch in flight and no data yet.
    Pending,
    /// Subscribed for push updates, no fetch in flight.
    Streaming,
    /// Fetch in flight while previous data is still shown.
    Refetching,
    /// Last fetch failed.
    Error {
        /// Whether data from an earlier success is still available.
        has_data: bool,
    },
}

/// Events that move a session between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// The fetch mutex was acquired.
    FetchStarted,
    /// Data arrived, from a fetch or a push update.
    DataReceived,
    /// A fetch or push channel reported an error.
    FetchFailed,
    /// The session was torn down.
    Cleared,
}

impl Phase {
    /// Process an event and return the new phase.
    pub fn on_event(self, event: PhaseEvent) -> Self {
        match (self, event) {
            (_, PhaseEvent::Cleared) => Self::Idle,

            (Self::Idle, PhaseEvent::FetchStarted) => Self::Pending,
            (Self::Streaming, PhaseEvent::FetchStarted) => Self::Refetching,
            (Self::Error { has_data: true }, PhaseEvent::FetchStarted) => Self::Refetching,
            (Self::Error { has_data: false }, PhaseEvent::FetchStarted) => Self::Pending,

            (Self::Pending | Self::Refetching | Self::Streaming, PhaseEvent::DataReceived) => {
                Self::Streaming
            }
            (Self::Error { .. }, PhaseEvent::DataReceived) => Self::Streaming,

            (Self::Pending, PhaseEvent::FetchFailed) => Self::Error { has_data: false },
            (Self::Refetching | Self::Streaming, PhaseEvent::FetchFailed) => {
                Self::Error { has_data: true }
            }

            // Invalid transitions - stay in current phase
            (phase, _) => phase,
        }
    }

    /// Check if a fetch is in flight.
    pub fn is_fetching(&self) -> bool {
        matches!(self, Self::Pending | Self::Refetching)
    }

    /// Check if data from some successful fetch is available.
    pub fn has_data(&self) -> bool {
        matches!(
            self,
            Self::Streaming | Self::Refetching | Self::Error { has_data: true }
        )
    }
}
