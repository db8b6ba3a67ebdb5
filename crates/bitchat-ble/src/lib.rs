//! Bluetooth Low Energy peer discovery and connection manager for BitChat
//!
//! This crate finds nearby BitChat devices, manages single-hop radio links to
//! them, and moves message text over one GATT characteristic.
//!
//! ## Architecture
//!
//! - [`radio`] - The `RadioTransport` seam over the platform BLE stack
//! - [`error`] - Radio and payload error types
//! - [`protocol`] - Service/characteristic ids, name marker, payload codec
//! - [`peer`] - Discovered peers and their connection state
//! - [`manager`] - The connection manager itself
//! - [`subscription`] - Cancellable inbound message streams
//! - `platform` - btleplug-backed radio
//! - `simulated` - In-process radio for tests and demos
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bitchat_ble::{BtleRadio, ConnectionManager};
//! use bitchat_core::MeshConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::new(BtleRadio::new(), MeshConfig::default());
//!
//! if manager.initialize().await {
//!     let peers = manager
//!         .start_discovery(|peer| println!("found {}", peer.name))
//!         .await?;
//!
//!     if let Some(peer) = peers.first() {
//!         manager.connect_to_device(&peer.id).await?;
//!         manager.send_message(&peer.id, "hello").await?;
//!     }
//! }
//!
//! manager.teardown().await;
//! # Ok(())
//! # }
//! ```

mod connection;
mod discovery;
pub mod error;
pub mod manager;
pub mod peer;
mod platform;
pub mod protocol;
pub mod radio;
mod simulated;
pub mod subscription;

// Public API exports
pub use error::{PayloadError, RadioError};
pub use manager::ConnectionManager;
pub use peer::{ConnectionState, Peer};
pub use platform::BtleRadio;
pub use protocol::{
    decode_payload, encode_payload, generate_device_name, matches_marker, BITCHAT_SERVICE_UUID,
    DEFAULT_NAME_MARKER, MESSAGE_CHARACTERISTIC_UUID,
};
pub use radio::{
    Advertisement, AdvertisementStream, DisconnectFuture, NotificationStream, RadioState,
    RadioTransport,
};
pub use simulated::{RecordedWrite, SimulatedLink, SimulatedRadio};
pub use subscription::MessageSubscription;

// Re-export the configuration consumed by the manager
pub use bitchat_core::MeshConfig;
