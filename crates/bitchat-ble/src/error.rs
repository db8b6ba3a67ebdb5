//! Error types for the radio layer

use bitchat_core::{BitchatError, PeerId};
use thiserror::Error;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised by a `RadioTransport` implementation
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(PeerId),

    #[error("Characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: Uuid },

    #[error("Link closed")]
    LinkClosed,

    #[error("BLE error: {0}")]
    Btleplug(#[from] btleplug::Error),

    #[error("Simulated radio failure: {0}")]
    Simulated(String),
}

impl From<RadioError> for BitchatError {
    fn from(err: RadioError) -> Self {
        match err {
            RadioError::AdapterNotAvailable => BitchatError::radio_unavailable(err.to_string()),
            other => BitchatError::transport_failure(other.to_string()),
        }
    }
}

/// Errors decoding a characteristic payload into text
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}
