//! Connection table entries

use tokio::sync::oneshot;

// ----------------------------------------------------------------------------
// Connection Management
// ----------------------------------------------------------------------------

/// An established link owned by the connection manager
///
/// Each link has a disconnect observer task that outlives the entry. When the
/// entry was already replaced or removed, the observer's report carries a
/// stale generation and is ignored.
pub(crate) struct Connection<H> {
    pub(crate) handle: H,
    /// Distinguishes this link from earlier links to the same peer
    pub(crate) generation: u64,
    /// Dropping the sender cancels the active notification pump
    listener: Option<oneshot::Sender<()>>,
}

impl<H> Connection<H> {
    pub(crate) fn new(handle: H, generation: u64) -> Self {
        Self {
            handle,
            generation,
            listener: None,
        }
    }

    /// Install a new listener cancel handle, cancelling the previous one
    pub(crate) fn replace_listener(&mut self, cancel: oneshot::Sender<()>) -> bool {
        self.listener.replace(cancel).is_some()
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.listener.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Cancel the listener, yielding the handle
    pub(crate) fn close(mut self) -> H {
        self.listener.take();
        self.handle
    }
}
