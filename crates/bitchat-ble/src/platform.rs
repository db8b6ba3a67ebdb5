//! btleplug-backed radio transport
//!
//! Drives the host's first BLE adapter in central mode. Endpoint ids are the
//! peripheral's Bluetooth address where the platform exposes one, otherwise
//! the platform peripheral id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bitchat_core::PeerId;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::channel::mpsc;
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RadioError;
use crate::protocol::matches_marker;
use crate::radio::{
    Advertisement, AdvertisementStream, DisconnectFuture, NotificationStream, RadioState,
    RadioTransport,
};

// ----------------------------------------------------------------------------
// Radio Implementation
// ----------------------------------------------------------------------------

/// BLE central backed by btleplug
pub struct BtleRadio {
    adapter: RwLock<Option<Adapter>>,
    /// Peripherals seen during the current scan, by endpoint id
    peripherals: Arc<RwLock<HashMap<PeerId, Peripheral>>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for BtleRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl BtleRadio {
    /// Create a radio; the adapter is acquired lazily on first use
    pub fn new() -> Self {
        Self {
            adapter: RwLock::new(None),
            peripherals: Arc::new(RwLock::new(HashMap::new())),
            scan_task: Mutex::new(None),
        }
    }

    /// Initialize BLE adapter
    async fn adapter(&self) -> Result<Adapter, RadioError> {
        if let Some(adapter) = self.adapter.read().await.as_ref() {
            return Ok(adapter.clone());
        }

        let mut slot = self.adapter.write().await;
        if let Some(adapter) = slot.as_ref() {
            return Ok(adapter.clone());
        }

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(RadioError::AdapterNotAvailable)?;

        info!("BLE adapter initialized");
        *slot = Some(adapter.clone());
        Ok(adapter)
    }

    fn endpoint_id(peripheral: &Peripheral, properties: &PeripheralProperties) -> PeerId {
        if properties.address != BDAddr::default() {
            PeerId::new(properties.address.to_string())
        } else {
            PeerId::new(format!("{:?}", peripheral.id()))
        }
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Characteristic, RadioError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or(RadioError::CharacteristicNotFound { characteristic })
    }
}

fn radio_state(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        CentralState::Unknown => RadioState::Unknown,
    }
}

#[async_trait]
impl RadioTransport for BtleRadio {
    type Handle = Peripheral;

    async fn query_state(&self) -> Result<RadioState, RadioError> {
        let adapter = match self.adapter().await {
            Ok(adapter) => adapter,
            Err(RadioError::AdapterNotAvailable) => return Ok(RadioState::Unsupported),
            Err(e) => return Err(e),
        };

        if let Ok(info) = adapter.adapter_info().await {
            debug!("BLE adapter: {}", info);
        }

        match adapter.adapter_state().await {
            Ok(state) => Ok(radio_state(state)),
            Err(e) => {
                warn!("BLE adapter did not report its power state: {}", e);
                Ok(RadioState::Unknown)
            }
        }
    }

    async fn start_scan(&self, name_filter: &str) -> Result<AdvertisementStream, RadioError> {
        let adapter = self.adapter().await?;
        let mut events = adapter.events().await?;

        // Name filtering is not expressible in a btleplug ScanFilter
        adapter.start_scan(ScanFilter::default()).await?;
        self.peripherals.write().await.clear();

        let (tx, rx) = mpsc::unbounded();
        let peripherals = Arc::clone(&self.peripherals);
        let filter = name_filter.to_string();

        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };
                if !matches_marker(properties.local_name.as_deref(), &filter) {
                    continue;
                }

                let endpoint = Self::endpoint_id(&peripheral, &properties);
                peripherals
                    .write()
                    .await
                    .insert(endpoint.clone(), peripheral);

                let advertisement = Advertisement {
                    id: endpoint,
                    name: properties.local_name,
                    rssi: properties.rssi,
                };
                if tx.unbounded_send(advertisement).is_err() {
                    break;
                }
            }
            debug!("BLE advertisement pump ended");
        });

        if let Some(previous) = self.scan_task.lock().await.replace(task) {
            previous.abort();
        }

        info!("Started BLE scanning");
        Ok(rx.boxed())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
        }
        if let Some(adapter) = self.adapter.read().await.as_ref() {
            adapter.stop_scan().await?;
        }
        Ok(())
    }

    async fn connect(&self, id: &PeerId) -> Result<Self::Handle, RadioError> {
        let peripheral = self
            .peripherals
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RadioError::UnknownEndpoint(id.clone()))?;

        peripheral.connect().await?;
        Ok(peripheral)
    }

    async fn discover_capabilities(&self, handle: &Self::Handle) -> Result<(), RadioError> {
        handle.discover_services().await?;
        Ok(())
    }

    async fn write_characteristic(
        &self,
        handle: &Self::Handle,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), RadioError> {
        let target = Self::find_characteristic(handle, service, characteristic)?;
        handle.write(&target, value, WriteType::WithResponse).await?;
        Ok(())
    }

    async fn subscribe_characteristic(
        &self,
        handle: &Self::Handle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, RadioError> {
        let target = Self::find_characteristic(handle, service, characteristic)?;
        handle.subscribe(&target).await?;

        let notifications = handle.notifications().await?;
        Ok(notifications
            .filter_map(move |notification| {
                let value = (notification.uuid == characteristic).then_some(notification.value);
                futures::future::ready(value)
            })
            .boxed())
    }

    async fn unsubscribe_characteristic(
        &self,
        handle: &Self::Handle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), RadioError> {
        let target = Self::find_characteristic(handle, service, characteristic)?;
        handle.unsubscribe(&target).await?;
        Ok(())
    }

    async fn disconnected(&self, handle: &Self::Handle) -> Result<DisconnectFuture, RadioError> {
        let adapter = self.adapter().await?;
        let mut events = adapter.events().await?;
        let target = handle.id();

        Ok(Box::pin(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == target {
                        break;
                    }
                }
            }
        }))
    }

    async fn disconnect(&self, handle: &Self::Handle) -> Result<(), RadioError> {
        handle.disconnect().await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), RadioError> {
        self.stop_scan().await?;
        self.peripherals.write().await.clear();
        self.adapter.write().await.take();
        info!("BLE radio released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_power_state_mapping() {
        assert_eq!(radio_state(CentralState::PoweredOn), RadioState::PoweredOn);
        assert_eq!(radio_state(CentralState::PoweredOff), RadioState::PoweredOff);
        assert_eq!(radio_state(CentralState::Unknown), RadioState::Unknown);
    }
}
