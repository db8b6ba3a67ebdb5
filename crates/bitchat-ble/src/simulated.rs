//! In-process simulated radio
//!
//! Behaves like a BLE central with a fixed neighbourhood of peripherals.
//! Tests and the CLI demo mode script advertisements, inject notifications,
//! drop links and force failures through the control methods.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bitchat_core::PeerId;
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::RadioError;
use crate::radio::{
    Advertisement, AdvertisementStream, DisconnectFuture, NotificationStream, RadioState,
    RadioTransport,
};

// ----------------------------------------------------------------------------
// Simulation State
// ----------------------------------------------------------------------------

/// Link handle issued by the simulated radio
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SimulatedLink {
    pub link_id: u64,
    pub peer: PeerId,
}

/// A characteristic write observed by the simulated radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub peer: PeerId,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

struct LinkState {
    peer: PeerId,
    notify_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    disconnect_waiters: Vec<oneshot::Sender<()>>,
}

struct SimState {
    state: RadioState,
    neighbourhood: Vec<Advertisement>,
    scan_tx: Option<mpsc::UnboundedSender<Advertisement>>,
    last_name_filter: Option<String>,
    scan_starts: usize,
    links: HashMap<u64, LinkState>,
    next_link_id: u64,
    connect_attempts: HashMap<PeerId, usize>,
    failing_connects: HashSet<PeerId>,
    failing_enumerations: HashSet<PeerId>,
    hanging_connects: HashSet<PeerId>,
    held_connects: HashMap<PeerId, Vec<oneshot::Sender<()>>>,
    deferred_disconnects: HashSet<PeerId>,
    /// Disconnect waiters of closed links whose report is being held back
    pending_reports: Vec<oneshot::Sender<()>>,
    failing_writes: bool,
    writes: Vec<RecordedWrite>,
    shut_down: bool,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            state: RadioState::PoweredOn,
            neighbourhood: Vec::new(),
            scan_tx: None,
            last_name_filter: None,
            scan_starts: 0,
            links: HashMap::new(),
            next_link_id: 1,
            connect_attempts: HashMap::new(),
            failing_connects: HashSet::new(),
            failing_enumerations: HashSet::new(),
            hanging_connects: HashSet::new(),
            held_connects: HashMap::new(),
            deferred_disconnects: HashSet::new(),
            pending_reports: Vec::new(),
            failing_writes: false,
            writes: Vec::new(),
            shut_down: false,
        }
    }
}

/// Simulated radio transport
#[derive(Clone, Default)]
pub struct SimulatedRadio {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRadio {
    /// Create a powered-on radio with an empty neighbourhood
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic inside a control method must not wedge every later call
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the reported power state
    pub fn set_state(&self, state: RadioState) {
        self.lock().state = state;
    }

    /// Add an advertisement replayed at the start of every scan
    pub fn add_neighbour(&self, advertisement: Advertisement) {
        self.lock().neighbourhood.push(advertisement);
    }

    /// Emit an advertisement into the running scan
    ///
    /// Returns false when no scan is active.
    pub fn advertise(&self, advertisement: Advertisement) -> bool {
        let state = self.lock();
        match &state.scan_tx {
            Some(tx) => tx.unbounded_send(advertisement).is_ok(),
            None => false,
        }
    }

    /// Make connection attempts to `peer` fail
    pub fn fail_connects_to(&self, peer: &PeerId) {
        self.lock().failing_connects.insert(peer.clone());
    }

    /// Make capability enumeration on links to `peer` fail
    pub fn fail_enumeration_for(&self, peer: &PeerId) {
        self.lock().failing_enumerations.insert(peer.clone());
    }

    /// Make connection attempts to `peer` never complete
    pub fn hang_connects_to(&self, peer: &PeerId) {
        self.lock().hanging_connects.insert(peer.clone());
    }

    /// Let connection attempts to `peer` complete again, including held ones
    pub fn release_connects_to(&self, peer: &PeerId) -> usize {
        let mut state = self.lock();
        state.hanging_connects.remove(peer);
        let held = state.held_connects.remove(peer).unwrap_or_default();
        let released = held.len();
        for waiter in held {
            let _ = waiter.send(());
        }
        released
    }

    /// Hold back disconnect reports for links to `peer` once they close
    pub fn defer_disconnect_reports(&self, peer: &PeerId) {
        self.lock().deferred_disconnects.insert(peer.clone());
    }

    /// Deliver every held-back disconnect report
    pub fn release_disconnect_reports(&self) -> usize {
        let mut state = self.lock();
        state.deferred_disconnects.clear();
        let pending = std::mem::take(&mut state.pending_reports);
        pending.len()
    }

    /// Make every characteristic write fail
    pub fn set_failing_writes(&self, failing: bool) {
        self.lock().failing_writes = failing;
    }

    /// Deliver a raw characteristic value on the newest link to `peer`
    ///
    /// Returns false when nothing is subscribed.
    pub fn notify(&self, peer: &PeerId, value: impl Into<Vec<u8>>) -> bool {
        let state = self.lock();
        let value = value.into();
        state
            .links
            .iter()
            .filter(|(_, link)| &link.peer == peer)
            .max_by_key(|(id, _)| **id)
            .and_then(|(_, link)| link.notify_tx.as_ref())
            .is_some_and(|tx| tx.unbounded_send(value).is_ok())
    }

    /// Drop every link to `peer` as if it walked out of range
    pub fn drop_links_to(&self, peer: &PeerId) -> usize {
        let mut state = self.lock();
        let ids: Vec<u64> = state
            .links
            .iter()
            .filter(|(_, link)| &link.peer == peer)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            Self::close_link(&mut state, *id);
        }
        ids.len()
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scan_tx.is_some()
    }

    pub fn scan_starts(&self) -> usize {
        self.lock().scan_starts
    }

    pub fn last_name_filter(&self) -> Option<String> {
        self.lock().last_name_filter.clone()
    }

    pub fn connect_attempts(&self, peer: &PeerId) -> usize {
        self.lock().connect_attempts.get(peer).copied().unwrap_or(0)
    }

    /// Number of open links to `peer`
    pub fn open_links(&self, peer: &PeerId) -> usize {
        self.lock()
            .links
            .values()
            .filter(|link| &link.peer == peer)
            .count()
    }

    /// Writes observed so far, oldest first
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Remove a link; its disconnect waiters fire unless reports are deferred
    fn close_link(state: &mut SimState, link_id: u64) {
        let Some(link) = state.links.remove(&link_id) else {
            return;
        };
        if state.deferred_disconnects.contains(&link.peer) {
            state.pending_reports.extend(link.disconnect_waiters);
        }
    }

    fn ensure_link(state: &SimState, handle: &SimulatedLink) -> Result<(), RadioError> {
        if state.links.contains_key(&handle.link_id) {
            Ok(())
        } else {
            Err(RadioError::LinkClosed)
        }
    }
}

// ----------------------------------------------------------------------------
// Transport Implementation
// ----------------------------------------------------------------------------

#[async_trait]
impl RadioTransport for SimulatedRadio {
    type Handle = SimulatedLink;

    async fn query_state(&self) -> Result<RadioState, RadioError> {
        Ok(self.lock().state)
    }

    async fn start_scan(&self, name_filter: &str) -> Result<AdvertisementStream, RadioError> {
        let mut state = self.lock();
        if state.state != RadioState::PoweredOn {
            return Err(RadioError::AdapterNotAvailable);
        }

        let (tx, rx) = mpsc::unbounded();
        for advertisement in &state.neighbourhood {
            let _ = tx.unbounded_send(advertisement.clone());
        }
        state.scan_tx = Some(tx);
        state.scan_starts += 1;
        state.last_name_filter = Some(name_filter.to_string());
        debug!("Simulated scan started with filter {:?}", name_filter);
        Ok(rx.boxed())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.lock().scan_tx = None;
        Ok(())
    }

    async fn connect(&self, id: &PeerId) -> Result<Self::Handle, RadioError> {
        let held = {
            let mut state = self.lock();
            *state.connect_attempts.entry(id.clone()).or_default() += 1;
            if state.failing_connects.contains(id) {
                return Err(RadioError::Simulated(format!("connect to {} refused", id)));
            }
            if state.hanging_connects.contains(id) {
                let (tx, rx) = oneshot::channel();
                state.held_connects.entry(id.clone()).or_default().push(tx);
                Some(rx)
            } else {
                None
            }
        };
        if let Some(release) = held {
            // Held until release_connects_to
            let _ = release.await;
        }

        let mut state = self.lock();
        let link_id = state.next_link_id;
        state.next_link_id += 1;
        state.links.insert(
            link_id,
            LinkState {
                peer: id.clone(),
                notify_tx: None,
                disconnect_waiters: Vec::new(),
            },
        );
        Ok(SimulatedLink {
            link_id,
            peer: id.clone(),
        })
    }

    async fn discover_capabilities(&self, handle: &Self::Handle) -> Result<(), RadioError> {
        let state = self.lock();
        Self::ensure_link(&state, handle)?;
        if state.failing_enumerations.contains(&handle.peer) {
            return Err(RadioError::CharacteristicNotFound {
                characteristic: crate::protocol::MESSAGE_CHARACTERISTIC_UUID,
            });
        }
        Ok(())
    }

    async fn write_characteristic(
        &self,
        handle: &Self::Handle,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), RadioError> {
        let mut state = self.lock();
        Self::ensure_link(&state, handle)?;
        if state.failing_writes {
            return Err(RadioError::Simulated("write not acknowledged".into()));
        }
        state.writes.push(RecordedWrite {
            peer: handle.peer.clone(),
            service,
            characteristic,
            value: value.to_vec(),
        });
        Ok(())
    }

    async fn subscribe_characteristic(
        &self,
        handle: &Self::Handle,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<NotificationStream, RadioError> {
        let mut state = self.lock();
        let link = state
            .links
            .get_mut(&handle.link_id)
            .ok_or(RadioError::LinkClosed)?;
        let (tx, rx) = mpsc::unbounded();
        link.notify_tx = Some(tx);
        Ok(rx.boxed())
    }

    async fn unsubscribe_characteristic(
        &self,
        handle: &Self::Handle,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<(), RadioError> {
        if let Some(link) = self.lock().links.get_mut(&handle.link_id) {
            link.notify_tx = None;
        }
        Ok(())
    }

    async fn disconnected(&self, handle: &Self::Handle) -> Result<DisconnectFuture, RadioError> {
        let mut state = self.lock();
        let link = state
            .links
            .get_mut(&handle.link_id)
            .ok_or(RadioError::LinkClosed)?;
        let (tx, rx) = oneshot::channel();
        link.disconnect_waiters.push(tx);
        // Resolves when the waiter is dropped together with the link
        Ok(Box::pin(async move {
            let _ = rx.await;
        }))
    }

    async fn disconnect(&self, handle: &Self::Handle) -> Result<(), RadioError> {
        Self::close_link(&mut self.lock(), handle.link_id);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), RadioError> {
        let mut state = self.lock();
        state.scan_tx = None;
        let ids: Vec<u64> = state.links.keys().copied().collect();
        for id in ids {
            Self::close_link(&mut state, id);
        }
        state.shut_down = true;
        Ok(())
    }
}
