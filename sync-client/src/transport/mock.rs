//! Mock transport for testing.
//!
//! Lets tests drive the connection status by hand, force connect failures,
//! and stall a connect attempt in the connecting state.

use super::{Transport, TransportError, TransportStatus};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle and give another to the
/// client.
#[derive(Debug)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    status: Arc<watch::Sender<TransportStatus>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected_address: Option<String>,
    connect_count: usize,
    fail_next_connect: Option<String>,
    stall_next_connect: bool,
}

impl MockTransport {
    /// Create a new, disconnected mock transport.
    pub fn new() -> Self {
        let (status, _) = watch::channel(TransportStatus::Disconnected);
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
            status: Arc::new(status),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.lock().connected_address.clone()
    }

    /// Number of successful `connect()` calls.
    pub fn connect_count(&self) -> usize {
        self.lock().connect_count
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next connect() to stay in `Connecting` and never finish.
    pub fn stall_next_connect(&self) {
        self.lock().stall_next_connect = true;
    }

    /// Force a status, as if the link changed underneath us.
    ///
    /// Setting the current status again does not notify watchers.
    pub fn set_status(&self, status: TransportStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Simulate a dropped link.
    pub fn drop_connection(&self) {
        self.set_status(TransportStatus::Disconnected);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            status: Arc::clone(&self.status),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let stall = {
            let mut inner = self.lock();

            // Check for forced failure
            if let Some(error) = inner.fail_next_connect.take() {
                return Err(TransportError::ConnectionFailed(error));
            }
            std::mem::take(&mut inner.stall_next_connect)
        };

        self.set_status(TransportStatus::Connecting);
        if stall {
            std::future::pending::<()>().await;
        }

        {
            let mut inner = self.lock();
            inner.connected_address = Some(address.to_string());
            inner.connect_count += 1;
        }
        self.set_status(TransportStatus::Connected);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.set_status(TransportStatus::Disconnected);
        Ok(())
    }

    fn status(&self) -> watch::Receiver<TransportStatus> {
        self.status.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_connects() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect("test-relay").await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(transport.connected_address(), Some("test-relay".to_string()));
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn mock_transport_closes() {
        let transport = MockTransport::new();
        transport.connect("relay").await.unwrap();
        assert!(transport.is_connected());

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn status_feed_sees_changes() {
        let transport = MockTransport::new();
        let mut status = transport.status();
        assert_eq!(*status.borrow_and_update(), TransportStatus::Disconnected);

        transport.connect("relay").await.unwrap();
        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), TransportStatus::Connected);

        transport.drop_connection();
        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), TransportStatus::Disconnected);
    }

    #[test]
    fn repeated_status_is_not_a_change() {
        let transport = MockTransport::new();
        let status = transport.status();

        transport.set_status(TransportStatus::Disconnected);
        assert!(!status.has_changed().unwrap());
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn forced_connect_failure() {
        let transport = MockTransport::new();
        transport.fail_next_connect("network unreachable");

        let result = transport.connect("relay").await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!transport.is_connected());

        // Next connect should work
        transport.connect("relay").await.unwrap();
        assert!(transport.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connect_stays_connecting() {
        let transport = MockTransport::new();
        transport.stall_next_connect();

        let attempt = tokio::time::timeout(Duration::from_secs(5), transport.connect("relay"));
        assert!(attempt.await.is_err());
        assert_eq!(*transport.status().borrow(), TransportStatus::Connecting);
        assert!(!transport.is_connected());
        assert_eq!(transport.connect_count(), 0);

        transport.connect("relay").await.unwrap();
        assert!(transport.is_connected());
    }

    // ===========================================
    // Clone and Shared State Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.connect("relay").await.unwrap();
        assert!(transport2.is_connected());

        transport2.drop_connection();
        assert!(!transport1.is_connected());
    }
}
