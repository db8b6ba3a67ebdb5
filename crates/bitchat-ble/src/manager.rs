//! Peer discovery and connection manager
//!
//! [`ConnectionManager`] owns the radio, the discovery snapshot and the
//! connection table. It is cheap to clone; clones share state. Construct it
//! once per process, pass it to whoever needs it and call
//! [`ConnectionManager::teardown`] at shutdown.
//!
//! Locking: the peer table and the connection table each sit behind one
//! `RwLock`. Neither lock is held across a user callback or a radio call.
//! Where both are needed the connection table is taken first.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bitchat_core::{BitchatError, BitchatResult, MeshConfig, PeerId};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::connection::Connection;
use crate::discovery::{fold_advertisement, scan_finished, ScanState};
use crate::error::RadioError;
use crate::peer::Peer;
use crate::protocol::{encode_payload, BITCHAT_SERVICE_UUID, MESSAGE_CHARACTERISTIC_UUID};
use crate::radio::{Advertisement, AdvertisementStream, DisconnectFuture, RadioState, RadioTransport};
use crate::subscription::{forward_notifications, ListenOutcome, MessageSubscription};

// ----------------------------------------------------------------------------
// Manager State
// ----------------------------------------------------------------------------

struct Inner<R: RadioTransport> {
    radio: Arc<R>,
    config: MeshConfig,
    /// Discovery snapshot in first-seen order
    peers: RwLock<Vec<Peer>>,
    connections: RwLock<HashMap<PeerId, Connection<R::Handle>>>,
    scan: Mutex<ScanState>,
    next_generation: AtomicU64,
    torn_down: AtomicBool,
}

/// Discovers BitChat peers and manages radio links to them
pub struct ConnectionManager<R: RadioTransport> {
    inner: Arc<Inner<R>>,
}

impl<R: RadioTransport> Clone for ConnectionManager<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Run a radio call under a deadline
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, RadioError>>,
) -> BitchatResult<T> {
    match timeout(limit, call).await {
        Ok(result) => result.map_err(BitchatError::from),
        Err(_) => Err(BitchatError::timeout(limit)),
    }
}

impl<R: RadioTransport> ConnectionManager<R> {
    /// Create a manager over a radio; nothing touches the radio until a call
    pub fn new(radio: R, config: MeshConfig) -> Self {
        Self::with_shared_radio(Arc::new(radio), config)
    }

    /// Create a manager over an already shared radio
    pub fn with_shared_radio(radio: Arc<R>, config: MeshConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                radio,
                config,
                peers: RwLock::new(Vec::new()),
                connections: RwLock::new(HashMap::new()),
                scan: Mutex::new(ScanState::new()),
                next_generation: AtomicU64::new(0),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &MeshConfig {
        &self.inner.config
    }

    fn ensure_live(&self) -> BitchatResult<()> {
        if self.inner.torn_down.load(Ordering::SeqCst) {
            return Err(BitchatError::radio_unavailable(
                "Connection manager has been torn down",
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Check that the radio is powered on and usable
    ///
    /// Never fails; any problem reading the radio state yields `false`.
    pub async fn initialize(&self) -> bool {
        if self.ensure_live().is_err() {
            return false;
        }

        match self.inner.radio.query_state().await {
            Ok(RadioState::PoweredOn) => {
                info!("Radio powered on");
                true
            }
            Ok(state) => {
                warn!("Radio not ready: {:?}", state);
                false
            }
            Err(e) => {
                error!("Failed to query radio state: {}", e);
                false
            }
        }
    }

    /// Stop scanning, drop every connection and release the radio
    ///
    /// A second call does nothing.
    pub async fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            debug!("Teardown already performed");
            return;
        }

        self.inner.finish_scan(None).await;

        let connections: Vec<_> = self.inner.connections.write().await.drain().collect();
        for (peer_id, connection) in connections {
            self.inner.close_link(&peer_id, connection).await;
            self.inner.update_peer(&peer_id, Peer::mark_disconnected).await;
        }

        if let Err(e) = self.inner.radio.shutdown().await {
            warn!("Radio shutdown failed: {}", e);
        }
        info!("Connection manager torn down");
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Scan for peers for the configured duration
    ///
    /// `on_peer_found` runs once per newly discovered id. Returns the final
    /// snapshot when the scan ends by timer, [`Self::stop_discovery`] or
    /// teardown. While another scan is in flight this returns the current
    /// snapshot immediately; use [`Self::await_discovery`] to wait for it.
    pub async fn start_discovery<F>(&self, on_peer_found: F) -> BitchatResult<Vec<Peer>>
    where
        F: Fn(&Peer) + Send + Sync + 'static,
    {
        self.ensure_live()?;

        let (session, mut done_rx) = {
            let mut scan = self.inner.scan.lock().await;
            if scan.is_active() {
                debug!("Discovery already running, returning current snapshot");
                drop(scan);
                return Ok(self.discovered_peers().await);
            }
            // Cleared under the scan lock so a concurrent call never sees
            // the previous session's peers
            self.inner.peers.write().await.clear();
            scan.begin()
        };

        let adverts = match self
            .inner
            .radio
            .start_scan(&self.inner.config.name_marker)
            .await
        {
            Ok(adverts) => adverts,
            Err(e) => {
                error!("Failed to start scan: {}", e);
                let mut scan = self.inner.scan.lock().await;
                if scan.end(Some(session)) {
                    scan.release_waiters();
                }
                return Err(BitchatError::transport_failure(format!(
                    "Failed to start scan: {}",
                    e
                )));
            }
        };

        info!(
            "Started discovery for {}s",
            self.inner.config.scan_duration_secs
        );
        tokio::spawn(run_scan(
            Arc::clone(&self.inner),
            session,
            adverts,
            done_rx.clone(),
            on_peer_found,
        ));

        scan_finished(&mut done_rx).await;
        Ok(self.discovered_peers().await)
    }

    /// Wait for the in-flight scan, if any, and return its snapshot
    pub async fn await_discovery(&self) -> Vec<Peer> {
        let mut done_rx = self.inner.scan.lock().await.waiter();
        scan_finished(&mut done_rx).await;
        self.discovered_peers().await
    }

    /// Halt any running scan; safe to call at any time
    pub async fn stop_discovery(&self) {
        self.inner.finish_scan(None).await;
    }

    pub async fn is_scanning(&self) -> bool {
        self.inner.scan.lock().await.is_active()
    }

    /// Snapshot of the current discovery set
    pub async fn discovered_peers(&self) -> Vec<Peer> {
        self.inner.peers.read().await.clone()
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    /// Open a link to a peer from the current discovery snapshot
    ///
    /// Connecting an already connected peer closes the old link and runs the
    /// full connect sequence again.
    pub async fn connect_to_device(&self, peer_id: &PeerId) -> BitchatResult<()> {
        self.ensure_live()?;

        if !self.inner.update_peer(peer_id, Peer::mark_connecting).await {
            return Err(BitchatError::peer_not_found(peer_id.as_str()));
        }

        let previous = self.inner.connections.write().await.remove(peer_id);
        if let Some(previous) = previous {
            debug!("Replacing existing link to {}", peer_id);
            self.inner.close_link(peer_id, previous).await;
        }

        match self.inner.open_link(peer_id).await {
            Ok((handle, disconnected)) => {
                self.inner.register(peer_id, handle, disconnected).await?;
                info!("Connected to peer: {}", peer_id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", peer_id, e);
                let reason = e.to_string();
                self.inner
                    .update_peer(peer_id, |peer| peer.mark_failed(reason))
                    .await;
                Err(e)
            }
        }
    }

    /// Close the link to a peer; no-op when not connected
    pub async fn disconnect_device(&self, peer_id: &PeerId) {
        let removed = self.inner.connections.write().await.remove(peer_id);
        let Some(connection) = removed else {
            debug!("Disconnect for {} ignored, not connected", peer_id);
            return;
        };

        self.inner.close_link(peer_id, connection).await;
        self.inner.update_peer(peer_id, Peer::mark_disconnected).await;
        info!("Disconnected from peer: {}", peer_id);
    }

    pub async fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.inner.connections.read().await.contains_key(peer_id)
    }

    /// Ids of every peer with an open link, sorted
    pub async fn connected_peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.inner.connections.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    /// Send text to a connected peer with an acknowledged write
    pub async fn send_message(&self, peer_id: &PeerId, text: &str) -> BitchatResult<()> {
        let (handle, _) = self.inner.connection_handle(peer_id).await?;
        let payload = encode_payload(text);

        bounded(
            self.inner.config.write_timeout(),
            self.inner.radio.write_characteristic(
                &handle,
                BITCHAT_SERVICE_UUID,
                MESSAGE_CHARACTERISTIC_UUID,
                &payload,
            ),
        )
        .await
        .map_err(|e| {
            error!("Failed to send to {}: {}", peer_id, e);
            e
        })?;

        debug!("Sent {} bytes to {}", payload.len(), peer_id);
        Ok(())
    }

    /// Subscribe to inbound messages from a connected peer
    ///
    /// A newer subscription for the same peer ends the older one.
    pub async fn start_listening(&self, peer_id: &PeerId) -> BitchatResult<MessageSubscription> {
        let (handle, generation) = self.inner.connection_handle(peer_id).await?;

        let notifications = bounded(
            self.inner.config.write_timeout(),
            self.inner.radio.subscribe_characteristic(
                &handle,
                BITCHAT_SERVICE_UUID,
                MESSAGE_CHARACTERISTIC_UUID,
            ),
        )
        .await?;

        let (tx, rx) = mpsc::channel(self.inner.config.notification_buffer);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        {
            let mut connections = self.inner.connections.write().await;
            match connections.get_mut(peer_id) {
                Some(connection) if connection.generation == generation => {
                    if connection.replace_listener(cancel_tx) {
                        debug!("Replaced previous subscription for {}", peer_id);
                    }
                }
                _ => return Err(BitchatError::not_connected(peer_id.as_str())),
            }
        }

        let radio = Arc::clone(&self.inner.radio);
        let peer = peer_id.clone();
        tokio::spawn(async move {
            let outcome = forward_notifications(&peer, notifications, tx, cancel_rx).await;
            if outcome == ListenOutcome::SubscriberGone {
                if let Err(e) = radio
                    .unsubscribe_characteristic(
                        &handle,
                        BITCHAT_SERVICE_UUID,
                        MESSAGE_CHARACTERISTIC_UUID,
                    )
                    .await
                {
                    debug!("Unsubscribe from {} failed: {}", peer, e);
                }
            }
            debug!("Subscription for {} ended: {:?}", peer, outcome);
        });

        info!("Listening for messages from {}", peer_id);
        Ok(MessageSubscription::new(peer_id.clone(), rx))
    }

    /// Callback flavour of [`Self::start_listening`]
    ///
    /// The returned task ends with the subscription; aborting it unsubscribes.
    pub async fn start_listening_with<F>(
        &self,
        peer_id: &PeerId,
        mut on_message: F,
    ) -> BitchatResult<JoinHandle<()>>
    where
        F: FnMut(String) + Send + 'static,
    {
        let mut subscription = self.start_listening(peer_id).await?;
        Ok(tokio::spawn(async move {
            while let Some(text) = subscription.recv().await {
                on_message(text);
            }
        }))
    }

    /// Whether a subscription is currently active for a peer
    pub async fn is_listening(&self, peer_id: &PeerId) -> bool {
        self.inner
            .connections
            .read()
            .await
            .get(peer_id)
            .is_some_and(Connection::is_listening)
    }
}

// ----------------------------------------------------------------------------
// Internals
// ----------------------------------------------------------------------------

impl<R: RadioTransport> Inner<R> {
    /// Apply `change` to a peer in the snapshot; `false` when absent
    async fn update_peer(&self, peer_id: &PeerId, change: impl FnOnce(&mut Peer)) -> bool {
        let mut peers = self.peers.write().await;
        match peers.iter_mut().find(|p| &p.id == peer_id) {
            Some(peer) => {
                change(peer);
                true
            }
            None => false,
        }
    }

    async fn record_advertisement(&self, advertisement: &Advertisement) -> Option<Peer> {
        let linked = self.connections.read().await.contains_key(&advertisement.id);

        let mut peers = self.peers.write().await;
        let mut found = fold_advertisement(&mut peers, advertisement, &self.config.name_marker)?;
        if linked {
            found.mark_connected();
            if let Some(entry) = peers.iter_mut().find(|p| p.id == found.id) {
                entry.mark_connected();
            }
        }
        Some(found)
    }

    /// End a scan session, halting the radio scan and releasing waiters
    async fn finish_scan(&self, session: Option<u64>) {
        // The scan lock is held across stop_scan so a new session cannot start
        // between clearing the flag and halting the radio
        let mut scan = self.scan.lock().await;
        if !scan.end(session) {
            return;
        }
        if let Err(e) = self.radio.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        scan.release_waiters();
        info!("Discovery finished");
    }

    async fn connection_handle(&self, peer_id: &PeerId) -> BitchatResult<(R::Handle, u64)> {
        self.connections
            .read()
            .await
            .get(peer_id)
            .map(|c| (c.handle.clone(), c.generation))
            .ok_or_else(|| BitchatError::not_connected(peer_id.as_str()))
    }

    /// Connect and enumerate under the connection timeout
    async fn open_link(&self, peer_id: &PeerId) -> BitchatResult<(R::Handle, DisconnectFuture)> {
        let limit = self.config.connection_timeout();
        let handle = bounded(limit, self.radio.connect(peer_id)).await?;

        let prepared = async {
            bounded(limit, self.radio.discover_capabilities(&handle)).await?;
            self.radio
                .disconnected(&handle)
                .await
                .map_err(BitchatError::from)
        }
        .await;

        match prepared {
            Ok(disconnected) => Ok((handle, disconnected)),
            Err(e) => {
                if let Err(close_err) = self.radio.disconnect(&handle).await {
                    debug!("Closing half-open link to {} failed: {}", peer_id, close_err);
                }
                Err(e)
            }
        }
    }

    /// Record a fresh link and start its disconnect observer
    ///
    /// A link that finishes opening after teardown is closed instead.
    async fn register(
        self: &Arc<Self>,
        peer_id: &PeerId,
        handle: R::Handle,
        disconnected: DisconnectFuture,
    ) -> BitchatResult<()> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let displaced = {
            let mut connections = self.connections.write().await;
            // Checked under the lock teardown drains with
            if self.torn_down.load(Ordering::SeqCst) {
                drop(connections);
                warn!("Link to {} opened after teardown, closing it", peer_id);
                if let Err(e) = self.radio.disconnect(&handle).await {
                    debug!("Closing late link to {} failed: {}", peer_id, e);
                }
                self.update_peer(peer_id, Peer::mark_disconnected).await;
                return Err(BitchatError::radio_unavailable(
                    "Connection manager has been torn down",
                ));
            }

            // Spawned under the lock so the observer always finds its entry
            tokio::spawn(observe_disconnect(
                Arc::downgrade(self),
                peer_id.clone(),
                generation,
                disconnected,
            ));
            let displaced = connections.insert(peer_id.clone(), Connection::new(handle, generation));
            self.update_peer(peer_id, Peer::mark_connected).await;
            displaced
        };

        if let Some(displaced) = displaced {
            debug!("Concurrent connect to {} displaced an older link", peer_id);
            self.close_link(peer_id, displaced).await;
        }
        Ok(())
    }

    async fn close_link(&self, peer_id: &PeerId, connection: Connection<R::Handle>) {
        let handle = connection.close();
        if let Err(e) = self.radio.disconnect(&handle).await {
            warn!("Failed to close link to {}: {}", peer_id, e);
        }
    }

    /// Transport reported the link lost
    async fn link_lost(&self, peer_id: &PeerId, generation: u64) {
        let removed = {
            let mut connections = self.connections.write().await;
            match connections.get(peer_id) {
                Some(connection) if connection.generation == generation => {
                    connections.remove(peer_id)
                }
                _ => None,
            }
        };

        match removed {
            Some(connection) => {
                drop(connection.close());
                self.update_peer(peer_id, Peer::mark_disconnected).await;
                info!("Link to {} lost", peer_id);
            }
            None => debug!("Stale disconnect for {} (generation {})", peer_id, generation),
        }
    }
}

async fn observe_disconnect<R: RadioTransport>(
    inner: Weak<Inner<R>>,
    peer_id: PeerId,
    generation: u64,
    disconnected: DisconnectFuture,
) {
    disconnected.await;
    if let Some(inner) = inner.upgrade() {
        inner.link_lost(&peer_id, generation).await;
    }
}

/// Drive one scan session until its deadline or an external stop
async fn run_scan<R, F>(
    inner: Arc<Inner<R>>,
    session: u64,
    mut adverts: AdvertisementStream,
    mut done_rx: tokio::sync::watch::Receiver<bool>,
    on_peer_found: F,
) where
    R: RadioTransport,
    F: Fn(&Peer) + Send + Sync + 'static,
{
    let deadline = sleep(inner.config.scan_duration());
    tokio::pin!(deadline);
    let mut stream_open = true;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                debug!("Scan duration elapsed");
                break;
            }
            _ = scan_finished(&mut done_rx) => break,
            next = adverts.next(), if stream_open => match next {
                Some(advertisement) => {
                    if let Some(peer) = inner.record_advertisement(&advertisement).await {
                        debug!("Discovered peer {} ({})", peer.id, peer.name);
                        on_peer_found(&peer);
                    }
                }
                None => stream_open = false,
            },
        }
    }

    inner.finish_scan(Some(session)).await;
}
