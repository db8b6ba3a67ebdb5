//! Error types for the BitChat mobile core
//!
//! `BitchatError` is the single taxonomy surfaced by the connection manager.
//! Storage failures have their own `StorageError` type; the conversation store
//! catches those locally and degrades to defaults instead of propagating them.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures at the durable key-value boundary
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage is not available")]
    Unavailable,
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt record under key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

// ----------------------------------------------------------------------------
// Core Error Type
// ----------------------------------------------------------------------------

/// Core error types for the BitChat mobile core
#[derive(Debug, thiserror::Error)]
pub enum BitchatError {
    /// Radio is powered off or the platform lacks the capability
    #[error("Radio unavailable: {reason}")]
    RadioUnavailable { reason: String },

    /// Peer id is not part of the current discovery snapshot
    #[error("Peer not found: {peer_id}")]
    PeerNotFound { peer_id: String },

    /// No active connection exists for the peer
    #[error("Peer not connected: {peer_id}")]
    NotConnected { peer_id: String },

    /// Connect, enumerate or write failed at the radio layer
    #[error("Transport failure: {reason}")]
    TransportFailure { reason: String },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl BitchatError {
    /// Create a radio unavailable error with a reason
    pub fn radio_unavailable<T: Into<String>>(reason: T) -> Self {
        BitchatError::RadioUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a peer not found error
    pub fn peer_not_found<P: Into<String>>(peer_id: P) -> Self {
        BitchatError::PeerNotFound {
            peer_id: peer_id.into(),
        }
    }

    /// Create a not connected error
    pub fn not_connected<P: Into<String>>(peer_id: P) -> Self {
        BitchatError::NotConnected {
            peer_id: peer_id.into(),
        }
    }

    /// Create a transport failure with a reason
    pub fn transport_failure<T: Into<String>>(reason: T) -> Self {
        BitchatError::TransportFailure {
            reason: reason.into(),
        }
    }

    /// Create a timeout error from the elapsed budget
    pub fn timeout(duration: core::time::Duration) -> Self {
        BitchatError::Timeout {
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        BitchatError::Configuration {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, BitchatError>;
pub type BitchatResult<T> = Result<T>;

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            BitchatError::peer_not_found("xyz").to_string(),
            "Peer not found: xyz"
        );
        assert_eq!(
            BitchatError::timeout(Duration::from_secs(2)).to_string(),
            "Operation timed out after 2000ms"
        );
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: BitchatError = StorageError::Unavailable.into();
        assert!(matches!(err, BitchatError::Storage(StorageError::Unavailable)));
    }
}
