//! Transport abstraction for livesync.
//!
//! The live query engine never moves bytes itself; resolvers own the wire.
//! What the engine needs from the transport is its connection status, so
//! that subscriptions can wait for the link to come up and live queries can
//! refetch after a reconnect.
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection
//! - `close()` gracefully terminates
//! - `status()` hands out a `watch` feed of [`TransportStatus`] changes
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! let mut status = transport.status();
//! transport.connect("relay.example").await?;
//! assert_eq!(*status.borrow_and_update(), TransportStatus::Connected);
//! ```

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Connection status reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportStatus {
    /// No connection.
    #[default]
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Ready to carry traffic.
    Connected,
}

impl TransportStatus {
    /// Check if the transport can carry traffic.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Transport trait for the connection underneath resolvers.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, QUIC, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the server identified by the given address.
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;

    /// Subscribe to status changes. The receiver starts at the current status.
    fn status(&self) -> watch::Receiver<TransportStatus>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool {
        self.status().borrow().is_connected()
    }
}
