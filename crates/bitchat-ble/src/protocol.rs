//! BLE protocol constants and payload codec for BitChat

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use uuid::Uuid;

use crate::error::PayloadError;

// ----------------------------------------------------------------------------
// BLE Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// BitChat BLE service UUID
pub const BITCHAT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FFF0_0000_1000_8000_00805F9B34FB);

/// BitChat BLE characteristic carrying all message traffic in both directions
pub const MESSAGE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000FFF1_0000_1000_8000_00805F9B34FB);

/// Advertised-name marker identifying BitChat devices
pub const DEFAULT_NAME_MARKER: &str = "BitChat";

// ----------------------------------------------------------------------------
// Protocol Utilities
// ----------------------------------------------------------------------------

/// Generate a BLE-compatible device name carrying the marker
pub fn generate_device_name(nickname: &str, marker: &str) -> String {
    format!("{}-{}", marker, nickname)
}

/// Whether an advertised name passes the application allow-list
pub fn matches_marker(name: Option<&str>, marker: &str) -> bool {
    name.is_some_and(|name| name.contains(marker))
}

/// Encode message text into the transport-safe characteristic value
pub fn encode_payload(text: &str) -> Vec<u8> {
    STANDARD.encode(text.as_bytes()).into_bytes()
}

/// Decode a characteristic value back into message text
pub fn decode_payload(value: &[u8]) -> Result<String, PayloadError> {
    let raw = STANDARD.decode(value)?;
    Ok(String::from_utf8(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_layout() {
        assert_eq!(
            BITCHAT_SERVICE_UUID.to_string(),
            "0000fff0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            MESSAGE_CHARACTERISTIC_UUID.to_string(),
            "0000fff1-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_marker_is_substring_match() {
        assert!(matches_marker(Some("BitChat-alice"), "BitChat"));
        assert!(matches_marker(Some("My BitChat Phone"), "BitChat"));
        assert!(!matches_marker(Some("bitchat-lowercase"), "BitChat"));
        assert!(!matches_marker(Some("Headphones"), "BitChat"));
        assert!(!matches_marker(None, "BitChat"));
    }

    #[test]
    fn test_payload_is_base64_text() {
        assert_eq!(encode_payload("hello"), b"aGVsbG8=".to_vec());
        assert_eq!(decode_payload(b"aGVsbG8=").unwrap(), "hello");
        assert_eq!(decode_payload(&encode_payload("héllo 👋")).unwrap(), "héllo 👋");
    }

    #[test]
    fn test_rejects_malformed_payloads() {
        assert!(matches!(
            decode_payload(b"not base64!"),
            Err(PayloadError::InvalidBase64(_))
        ));
        let invalid_utf8 = STANDARD.encode([0xFF, 0xFE]).into_bytes();
        assert!(matches!(
            decode_payload(&invalid_utf8),
            Err(PayloadError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_device_name_generation() {
        assert_eq!(generate_device_name("alice", "BitChat"), "BitChat-alice");
    }
}
