//! Discovery session bookkeeping
//!
//! One scan session at a time. The session counter lets the timer task and
//! `stop_discovery` race on the same session without ending a newer one.

use tokio::sync::watch;

use crate::peer::Peer;
use crate::protocol::matches_marker;
use crate::radio::Advertisement;

// ----------------------------------------------------------------------------
// Scan Session
// ----------------------------------------------------------------------------

pub(crate) struct ScanState {
    active: bool,
    session: u64,
    /// Flips to `true` when the current session ends
    done_tx: watch::Sender<bool>,
}

impl ScanState {
    pub(crate) fn new() -> Self {
        let (done_tx, _) = watch::channel(true);
        Self {
            active: false,
            session: 0,
            done_tx,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    /// Open a new session and return its id with a completion receiver
    pub(crate) fn begin(&mut self) -> (u64, watch::Receiver<bool>) {
        self.active = true;
        self.session += 1;
        let (done_tx, done_rx) = watch::channel(false);
        self.done_tx = done_tx;
        (self.session, done_rx)
    }

    /// Completion receiver for the current (or last) session
    pub(crate) fn waiter(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    /// Mark the session inactive; `None` ends whichever session is current
    ///
    /// Returns `false` when there was nothing to end.
    pub(crate) fn end(&mut self, session: Option<u64>) -> bool {
        if !self.active || session.is_some_and(|id| id != self.session) {
            return false;
        }
        self.active = false;
        true
    }

    pub(crate) fn release_waiters(&self) {
        self.done_tx.send_replace(true);
    }
}

/// Wait until a session's completion flag is raised
pub(crate) async fn scan_finished(done_rx: &mut watch::Receiver<bool>) {
    // A dropped sender means a newer session replaced this one
    let _ = done_rx.wait_for(|done| *done).await;
}

// ----------------------------------------------------------------------------
// Peer Table
// ----------------------------------------------------------------------------

/// Fold one advertisement into the discovery snapshot
///
/// Returns the new entry when the id was not seen before in this session.
/// Advertisements failing the marker allow-list are ignored.
pub(crate) fn fold_advertisement(
    peers: &mut Vec<Peer>,
    advertisement: &Advertisement,
    marker: &str,
) -> Option<Peer> {
    if !matches_marker(advertisement.name.as_deref(), marker) {
        return None;
    }

    if let Some(existing) = peers.iter_mut().find(|p| p.id == advertisement.id) {
        existing.refresh(advertisement);
        return None;
    }

    let peer = Peer::discovered(advertisement);
    peers.push(peer.clone());
    Some(peer)
}
