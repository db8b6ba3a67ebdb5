//! Radio transport abstraction
//!
//! The connection manager never talks to a platform BLE stack directly; it
//! drives a [`RadioTransport`]. Implementations exist for btleplug
//! ([`crate::BtleRadio`]) and for an in-process simulation
//! ([`crate::SimulatedRadio`]).

use std::pin::Pin;

use async_trait::async_trait;
use bitchat_core::PeerId;
use futures::{Future, Stream};
use uuid::Uuid;

use crate::error::RadioError;

// ----------------------------------------------------------------------------
// Radio Types
// ----------------------------------------------------------------------------

/// Power state reported by the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
    Unknown,
}

/// One advertisement seen while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: PeerId,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

pub type AdvertisementStream = Pin<Box<dyn Stream<Item = Advertisement> + Send>>;
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;
/// Resolves once the link behind a handle is lost, for whatever reason
pub type DisconnectFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Platform short-range radio stack as consumed by the connection manager
#[async_trait]
pub trait RadioTransport: Send + Sync + 'static {
    /// Opaque link handle produced by `connect`
    type Handle: Clone + Send + Sync + 'static;

    async fn query_state(&self) -> Result<RadioState, RadioError>;

    /// Begin scanning; the stream yields advertisements until `stop_scan`
    async fn start_scan(&self, name_filter: &str) -> Result<AdvertisementStream, RadioError>;

    async fn stop_scan(&self) -> Result<(), RadioError>;

    async fn connect(&self, id: &PeerId) -> Result<Self::Handle, RadioError>;

    /// Enumerate services and characteristics on a fresh link
    async fn discover_capabilities(&self, handle: &Self::Handle) -> Result<(), RadioError>;

    /// Acknowledged write; returns once the peer's stack confirmed receipt
    async fn write_characteristic(
        &self,
        handle: &Self::Handle,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), RadioError>;

    async fn subscribe_characteristic(
        &self,
        handle: &Self::Handle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, RadioError>;

    async fn unsubscribe_characteristic(
        &self,
        _handle: &Self::Handle,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<(), RadioError> {
        Ok(())
    }

    /// Future resolving when the link drops, caller-initiated or not
    async fn disconnected(&self, handle: &Self::Handle) -> Result<DisconnectFuture, RadioError>;

    async fn disconnect(&self, handle: &Self::Handle) -> Result<(), RadioError>;

    /// Release the radio resource
    async fn shutdown(&self) -> Result<(), RadioError> {
        Ok(())
    }
}
