//! Error types shared across livesync crates.

use thiserror::Error;

/// A network or protocol failure reported by a resolver.
///
/// Cloneable because one failed fetch settles every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FetchError {
    /// Human-readable failure message, surfaced through query state.
    pub message: String,
}

impl FetchError {
    /// Create a fetch error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for FetchError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for FetchError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

/// Errors from encoding or decoding a selection snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// MessagePack serialization failed
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("snapshot deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_display_is_message() {
        let err = FetchError::new("boom");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn fetch_error_from_str() {
        let err: FetchError = "timeout".into();
        assert_eq!(err, FetchError::new("timeout"));
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FetchError>();
        assert_send_sync::<SnapshotError>();
    }
}
