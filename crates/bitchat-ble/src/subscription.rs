//! Inbound message subscriptions
//!
//! A [`MessageSubscription`] is the receiving end of one notification pump.
//! The pump decodes characteristic values in transport order and stops when
//! the subscription is dropped, when the manager cancels it (disconnect,
//! teardown, replacement by a newer subscription), or when the link's
//! notification stream ends.

use std::pin::Pin;
use std::task::{Context, Poll};

use bitchat_core::PeerId;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::protocol::decode_payload;
use crate::radio::NotificationStream;

// ----------------------------------------------------------------------------
// Subscription Handle
// ----------------------------------------------------------------------------

/// Stream of decoded inbound messages from one connected peer
#[derive(Debug)]
pub struct MessageSubscription {
    peer_id: PeerId,
    rx: mpsc::Receiver<String>,
}

impl MessageSubscription {
    pub(crate) fn new(peer_id: PeerId, rx: mpsc::Receiver<String>) -> Self {
        Self { peer_id, rx }
    }

    /// Peer this subscription listens to
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Next decoded message, or `None` once the subscription has ended
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Stop listening; buffered messages are discarded
    pub fn unsubscribe(mut self) {
        self.rx.close();
    }
}

impl Stream for MessageSubscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ----------------------------------------------------------------------------
// Notification Pump
// ----------------------------------------------------------------------------

/// Why a notification pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenOutcome {
    /// Cancelled by the manager
    Cancelled,
    /// The subscriber dropped or unsubscribed
    SubscriberGone,
    /// The transport closed the notification stream
    StreamEnded,
}

pub(crate) async fn forward_notifications(
    peer_id: &PeerId,
    mut notifications: NotificationStream,
    tx: mpsc::Sender<String>,
    mut cancel: oneshot::Receiver<()>,
) -> ListenOutcome {
    loop {
        let value = tokio::select! {
            _ = &mut cancel => return ListenOutcome::Cancelled,
            _ = tx.closed() => return ListenOutcome::SubscriberGone,
            next = notifications.next() => match next {
                Some(value) => value,
                None => return ListenOutcome::StreamEnded,
            },
        };

        let text = match decode_payload(&value) {
            Ok(text) => text,
            Err(e) => {
                warn!("Dropping undecodable payload from {}: {}", peer_id, e);
                continue;
            }
        };

        debug!("Received {} bytes from {}", value.len(), peer_id);
        tokio::select! {
            _ = &mut cancel => return ListenOutcome::Cancelled,
            sent = tx.send(text) => {
                if sent.is_err() {
                    return ListenOutcome::SubscriberGone;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::channel::mpsc as fmpsc;

    use super::*;
    use crate::protocol::encode_payload;

    #[tokio::test]
    async fn test_pump_preserves_order_and_skips_garbage() {
        let (raw_tx, raw_rx) = fmpsc::unbounded();
        let (tx, rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let peer = PeerId::from("p1");

        raw_tx.unbounded_send(encode_payload("one")).unwrap();
        raw_tx.unbounded_send(b"%%not base64%%".to_vec()).unwrap();
        raw_tx.unbounded_send(encode_payload("two")).unwrap();
        drop(raw_tx);

        let outcome = forward_notifications(&peer, raw_rx.boxed(), tx, cancel_rx).await;
        assert_eq!(outcome, ListenOutcome::StreamEnded);

        let received: Vec<String> = MessageSubscription::new(peer, rx).collect().await;
        assert_eq!(received, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_pump_stops_on_cancel() {
        let (_raw_tx, raw_rx) = fmpsc::unbounded::<Vec<u8>>();
        let (tx, _rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        drop(cancel_tx);

        let outcome =
            forward_notifications(&PeerId::from("p1"), raw_rx.boxed(), tx, cancel_rx).await;
        assert_eq!(outcome, ListenOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_pump_notices_unsubscribe() {
        let (_raw_tx, raw_rx) = fmpsc::unbounded::<Vec<u8>>();
        let (tx, rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = oneshot::channel();

        MessageSubscription::new(PeerId::from("p1"), rx).unsubscribe();
        let outcome =
            forward_notifications(&PeerId::from("p1"), raw_rx.boxed(), tx, cancel_rx).await;
        assert_eq!(outcome, ListenOutcome::SubscriberGone);
    }
}
