//! BLE peer management and state

use bitchat_core::{PeerId, Timestamp};

use crate::radio::Advertisement;

// ----------------------------------------------------------------------------
// Peer State Management
// ----------------------------------------------------------------------------

/// Connection state for a discovered peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Discovered,
    Connecting,
    Connected,
    Disconnected,
    /// Last connection attempt failed at the radio layer
    Failed(String),
}

/// A discovered radio endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    /// Advertised display name
    pub name: String,
    /// Signal strength from the most recent advertisement
    pub rssi: Option<i16>,
    pub state: ConnectionState,
    /// When the most recent advertisement arrived
    pub last_seen: Timestamp,
}

impl Peer {
    /// Create a peer from its first advertisement
    pub fn discovered(advertisement: &Advertisement) -> Self {
        Self {
            id: advertisement.id.clone(),
            name: advertisement
                .name
                .clone()
                .unwrap_or_else(|| "Unknown Device".to_string()),
            rssi: advertisement.rssi,
            state: ConnectionState::Discovered,
            last_seen: Timestamp::now(),
        }
    }

    /// Fold a re-advertisement into this entry
    pub fn refresh(&mut self, advertisement: &Advertisement) {
        if let Some(name) = &advertisement.name {
            self.name = name.clone();
        }
        if advertisement.rssi.is_some() {
            self.rssi = advertisement.rssi;
        }
        self.last_seen = Timestamp::now();
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    pub fn mark_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.state = ConnectionState::Failed(reason.into());
    }

    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advert(name: Option<&str>, rssi: Option<i16>) -> Advertisement {
        Advertisement {
            id: PeerId::from("AA:BB"),
            name: name.map(str::to_string),
            rssi,
        }
    }

    #[test]
    fn test_refresh_keeps_latest_signal() {
        let mut peer = Peer::discovered(&advert(Some("BitChat-a"), Some(-40)));
        assert_eq!(peer.state, ConnectionState::Discovered);

        peer.refresh(&advert(Some("BitChat-b"), Some(-55)));
        assert_eq!(peer.rssi, Some(-55));
        assert_eq!(peer.name, "BitChat-b");

        // Advertisements without rssi or name leave the previous values
        peer.refresh(&advert(None, None));
        assert_eq!(peer.rssi, Some(-55));
        assert_eq!(peer.name, "BitChat-b");
    }

    #[test]
    fn test_connection_state_transitions() {
        let mut peer = Peer::discovered(&advert(Some("BitChat-a"), None));
        peer.mark_connecting();
        assert!(peer.is_connecting());
        peer.mark_connected();
        assert!(peer.is_connected());
        peer.mark_disconnected();
        assert!(!peer.is_connected());
        peer.mark_failed("timeout");
        assert_eq!(peer.state, ConnectionState::Failed("timeout".into()));
    }
}
