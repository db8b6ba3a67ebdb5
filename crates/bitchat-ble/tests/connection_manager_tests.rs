//! Connection manager behaviour against the simulated radio

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitchat_ble::{
    encode_payload, Advertisement, ConnectionManager, ConnectionState, RadioState,
    SimulatedRadio, BITCHAT_SERVICE_UUID, MESSAGE_CHARACTERISTIC_UUID,
};
use bitchat_core::{BitchatError, MeshConfig, PeerId};
use futures::StreamExt;
use tokio::time::{sleep, Instant};

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn advert(id: &str, name: &str, rssi: i16) -> Advertisement {
    Advertisement {
        id: PeerId::from(id),
        name: Some(name.to_string()),
        rssi: Some(rssi),
    }
}

fn setup() -> (SimulatedRadio, ConnectionManager<SimulatedRadio>) {
    let radio = SimulatedRadio::new();
    let manager = ConnectionManager::new(radio.clone(), MeshConfig::default());
    (radio, manager)
}

async fn discover(radio: &SimulatedRadio, manager: &ConnectionManager<SimulatedRadio>, ids: &[&str]) {
    for id in ids {
        radio.add_neighbour(advert(id, &format!("BitChat-{id}"), -50));
    }
    manager.start_discovery(|_| {}).await.unwrap();
}

async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

async fn state_of(manager: &ConnectionManager<SimulatedRadio>, id: &str) -> Option<ConnectionState> {
    manager
        .discovered_peers()
        .await
        .into_iter()
        .find(|p| p.id.as_str() == id)
        .map(|p| p.state)
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_initialize_reflects_radio_state() {
    let (radio, manager) = setup();
    assert!(manager.initialize().await);

    radio.set_state(RadioState::PoweredOff);
    assert!(!manager.initialize().await);

    radio.set_state(RadioState::Unauthorized);
    assert!(!manager.initialize().await);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_twice_is_harmless() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1", "p2"]).await;
    manager.connect_to_device(&PeerId::from("p1")).await.unwrap();
    manager.connect_to_device(&PeerId::from("p2")).await.unwrap();

    manager.teardown().await;
    manager.teardown().await;

    assert!(manager.connected_peers().await.is_empty());
    assert_eq!(radio.open_links(&PeerId::from("p1")), 0);
    assert_eq!(radio.open_links(&PeerId::from("p2")), 0);
    assert!(radio.is_shut_down());

    assert!(!manager.initialize().await);
    assert!(matches!(
        manager.start_discovery(|_| {}).await,
        Err(BitchatError::RadioUnavailable { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_teardown_ends_running_scan() {
    let (radio, manager) = setup();
    let scan = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start_discovery(|_| {}).await })
    };
    settle().await;
    assert!(manager.is_scanning().await);

    manager.teardown().await;
    assert!(!manager.is_scanning().await);
    assert!(!radio.is_scanning());
    assert!(scan.await.unwrap().unwrap().is_empty());
}

// ----------------------------------------------------------------------------
// Discovery
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_repeat_advertisement_folds_into_one_entry() {
    let (radio, manager) = setup();
    radio.add_neighbour(advert("p1", "BitChat-alice", -40));
    radio.add_neighbour(advert("p1", "BitChat-alice", -55));
    radio.add_neighbour(advert("p2", "Headphones", -30));

    let found = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&found);
    let peers = manager
        .start_discovery(move |peer| sink.lock().unwrap().push(peer.id.clone()))
        .await
        .unwrap();

    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, PeerId::from("p1"));
    assert_eq!(peers[0].rssi, Some(-55));
    assert_eq!(peers[0].state, ConnectionState::Discovered);
    assert_eq!(*found.lock().unwrap(), vec![PeerId::from("p1")]);
    assert_eq!(radio.last_name_filter().as_deref(), Some("BitChat"));
}

#[tokio::test(start_paused = true)]
async fn test_scan_stops_after_configured_duration() {
    let (radio, manager) = setup();
    let started = Instant::now();
    manager.start_discovery(|_| {}).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(!manager.is_scanning().await);
    assert!(!radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_second_discovery_returns_current_snapshot() {
    let (radio, manager) = setup();
    radio.add_neighbour(advert("p1", "BitChat-alice", -40));

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start_discovery(|_| {}).await })
    };
    settle().await;
    assert!(manager.is_scanning().await);

    let snapshot = manager.start_discovery(|_| {}).await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(radio.scan_starts(), 1);

    let awaited = manager.await_discovery().await;
    assert_eq!(awaited.len(), 1);
    assert!(!manager.is_scanning().await);
    assert_eq!(first.await.unwrap().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_discovery_releases_pending_scan() {
    let (radio, manager) = setup();
    let scan = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start_discovery(|_| {}).await })
    };
    settle().await;
    assert!(radio.advertise(advert("p2", "BitChat-bob", -60)));
    settle().await;

    let stopped_at = Instant::now();
    manager.stop_discovery().await;
    assert!(!manager.is_scanning().await);
    assert!(!radio.is_scanning());

    let peers = scan.await.unwrap().unwrap();
    assert_eq!(peers.len(), 1);
    assert!(stopped_at.elapsed() < Duration::from_secs(1));

    // Idempotent, and harmless with no scan running
    manager.stop_discovery().await;
    assert!(manager.await_discovery().await.len() == 1);
}

#[tokio::test(start_paused = true)]
async fn test_new_scan_clears_previous_snapshot() {
    let (radio, manager) = setup();
    let scan = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start_discovery(|_| {}).await })
    };
    settle().await;
    radio.advertise(advert("p1", "BitChat-alice", -40));
    assert_eq!(scan.await.unwrap().unwrap().len(), 1);

    assert!(manager.start_discovery(|_| {}).await.unwrap().is_empty());
    assert!(matches!(
        manager.connect_to_device(&PeerId::from("p1")).await,
        Err(BitchatError::PeerNotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_discovery_sees_only_current_session() {
    let (radio, manager) = setup();
    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start_discovery(|_| {}).await })
    };
    settle().await;
    radio.advertise(advert("old", "BitChat-old", -40));
    settle().await;
    manager.stop_discovery().await;
    assert_eq!(first.await.unwrap().unwrap().len(), 1);

    let second = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start_discovery(|_| {}).await })
    };
    settle().await;
    assert!(manager.is_scanning().await);
    assert!(manager.start_discovery(|_| {}).await.unwrap().is_empty());

    manager.stop_discovery().await;
    assert!(second.await.unwrap().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scan_start_failure_is_transport_failure() {
    let (radio, manager) = setup();
    radio.set_state(RadioState::PoweredOff);

    assert!(matches!(
        manager.start_discovery(|_| {}).await,
        Err(BitchatError::TransportFailure { .. })
    ));
    assert!(!manager.is_scanning().await);
}

// ----------------------------------------------------------------------------
// Connections
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_connect_unknown_peer_is_not_found() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;

    let unknown = PeerId::from("xyz");
    match manager.connect_to_device(&unknown).await {
        Err(BitchatError::PeerNotFound { peer_id }) => assert_eq!(peer_id, "xyz"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(manager.connected_peers().await.is_empty());
    assert_eq!(radio.connect_attempts(&unknown), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_marks_peer_connected() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");

    manager.connect_to_device(&peer).await.unwrap();

    assert!(manager.is_connected(&peer).await);
    assert_eq!(manager.connected_peers().await, vec![peer.clone()]);
    assert_eq!(state_of(&manager, "p1").await, Some(ConnectionState::Connected));
    assert_eq!(radio.open_links(&peer), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_keeps_exactly_one_connection() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");

    manager.connect_to_device(&peer).await.unwrap();
    manager.connect_to_device(&peer).await.unwrap();
    settle().await;

    // The replaced link's closure must not remove the fresh connection
    assert!(manager.is_connected(&peer).await);
    assert_eq!(radio.open_links(&peer), 1);
    assert_eq!(radio.connect_attempts(&peer), 2);

    radio.drop_links_to(&peer);
    settle().await;
    assert!(!manager.is_connected(&peer).await);
}

#[tokio::test(start_paused = true)]
async fn test_late_disconnect_of_replaced_link_is_ignored() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");

    manager.connect_to_device(&peer).await.unwrap();
    radio.defer_disconnect_reports(&peer);
    manager.connect_to_device(&peer).await.unwrap();
    settle().await;
    assert!(manager.is_connected(&peer).await);

    // The first link reports its disconnect only after the second registered
    assert_eq!(radio.release_disconnect_reports(), 1);
    settle().await;

    assert!(manager.is_connected(&peer).await);
    assert_eq!(state_of(&manager, "p1").await, Some(ConnectionState::Connected));
    assert_eq!(radio.open_links(&peer), 1);
    manager.send_message(&peer, "still here").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");
    manager.connect_to_device(&peer).await.unwrap();

    manager.disconnect_device(&peer).await;
    manager.disconnect_device(&peer).await;
    manager.disconnect_device(&PeerId::from("never-seen")).await;

    assert!(!manager.is_connected(&peer).await);
    assert_eq!(radio.open_links(&peer), 0);
    assert_eq!(state_of(&manager, "p1").await, Some(ConnectionState::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn test_async_disconnect_removes_entry() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");
    manager.connect_to_device(&peer).await.unwrap();

    assert_eq!(radio.drop_links_to(&peer), 1);
    settle().await;

    assert!(!manager.is_connected(&peer).await);
    assert_eq!(state_of(&manager, "p1").await, Some(ConnectionState::Disconnected));
    assert!(matches!(
        manager.send_message(&peer, "hi").await,
        Err(BitchatError::NotConnected { .. })
    ));

    // Explicit disconnect after the link already went away
    manager.disconnect_device(&peer).await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_marks_peer_failed() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");
    radio.fail_connects_to(&peer);

    assert!(matches!(
        manager.connect_to_device(&peer).await,
        Err(BitchatError::TransportFailure { .. })
    ));
    assert!(!manager.is_connected(&peer).await);
    assert!(matches!(
        state_of(&manager, "p1").await,
        Some(ConnectionState::Failed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_enumeration_failure_closes_half_open_link() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");
    radio.fail_enumeration_for(&peer);

    assert!(matches!(
        manager.connect_to_device(&peer).await,
        Err(BitchatError::TransportFailure { .. })
    ));
    assert_eq!(radio.open_links(&peer), 0);
    assert!(!manager.is_connected(&peer).await);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_connect_times_out() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");
    radio.hang_connects_to(&peer);

    match manager.connect_to_device(&peer).await {
        Err(BitchatError::Timeout { duration_ms }) => assert_eq!(duration_ms, 10_000),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(
        state_of(&manager, "p1").await,
        Some(ConnectionState::Failed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_connect_finishing_after_teardown_is_closed() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");
    radio.hang_connects_to(&peer);

    let connect = {
        let manager = manager.clone();
        let peer = peer.clone();
        tokio::spawn(async move { manager.connect_to_device(&peer).await })
    };
    settle().await;
    manager.teardown().await;
    assert_eq!(radio.release_connects_to(&peer), 1);

    assert!(matches!(
        connect.await.unwrap(),
        Err(BitchatError::RadioUnavailable { .. })
    ));
    assert!(!manager.is_connected(&peer).await);
    assert!(manager.connected_peers().await.is_empty());
    assert_eq!(radio.open_links(&peer), 0);
    assert_eq!(state_of(&manager, "p1").await, Some(ConnectionState::Disconnected));
}

// ----------------------------------------------------------------------------
// Messaging
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_send_writes_base64_payload() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");
    manager.connect_to_device(&peer).await.unwrap();

    manager.send_message(&peer, "hello").await.unwrap();

    let writes = radio.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].peer, peer);
    assert_eq!(writes[0].service, BITCHAT_SERVICE_UUID);
    assert_eq!(writes[0].characteristic, MESSAGE_CHARACTERISTIC_UUID);
    assert_eq!(writes[0].value, b"aGVsbG8=".to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_send_without_connection_is_not_connected() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;

    match manager.send_message(&PeerId::from("p1"), "hello").await {
        Err(BitchatError::NotConnected { peer_id }) => assert_eq!(peer_id, "p1"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(radio.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_is_transport_failure() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");
    manager.connect_to_device(&peer).await.unwrap();
    radio.set_failing_writes(true);

    assert!(matches!(
        manager.send_message(&peer, "hello").await,
        Err(BitchatError::TransportFailure { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_listen_delivers_in_transport_order() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");
    manager.connect_to_device(&peer).await.unwrap();

    let mut subscription = manager.start_listening(&peer).await.unwrap();
    assert_eq!(subscription.peer_id(), &peer);
    assert!(manager.is_listening(&peer).await);

    assert!(radio.notify(&peer, encode_payload("first")));
    assert!(radio.notify(&peer, b"!!garbage!!".to_vec()));
    assert!(radio.notify(&peer, encode_payload("second")));
    assert!(radio.notify(&peer, encode_payload("second")));

    assert_eq!(subscription.recv().await.as_deref(), Some("first"));
    assert_eq!(subscription.next().await.as_deref(), Some("second"));
    assert_eq!(subscription.next().await.as_deref(), Some("second"));
}

#[tokio::test(start_paused = true)]
async fn test_listen_without_connection_is_not_connected() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;

    assert!(matches!(
        manager.start_listening(&PeerId::from("p1")).await,
        Err(BitchatError::NotConnected { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_subscription_ends_on_disconnect() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1", "p2"]).await;
    let p1 = PeerId::from("p1");
    let p2 = PeerId::from("p2");
    manager.connect_to_device(&p1).await.unwrap();
    manager.connect_to_device(&p2).await.unwrap();

    let mut explicit = manager.start_listening(&p1).await.unwrap();
    let mut dropped = manager.start_listening(&p2).await.unwrap();

    manager.disconnect_device(&p1).await;
    assert_eq!(explicit.recv().await, None);

    radio.drop_links_to(&p2);
    assert_eq!(dropped.recv().await, None);
    settle().await;
    assert!(manager.connected_peers().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_new_subscription_replaces_old() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");
    manager.connect_to_device(&peer).await.unwrap();

    let mut old = manager.start_listening(&peer).await.unwrap();
    let mut new = manager.start_listening(&peer).await.unwrap();
    assert_eq!(old.recv().await, None);

    assert!(radio.notify(&peer, encode_payload("hi")));
    assert_eq!(new.recv().await.as_deref(), Some("hi"));
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_releases_notifications() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");
    manager.connect_to_device(&peer).await.unwrap();

    let subscription = manager.start_listening(&peer).await.unwrap();
    subscription.unsubscribe();
    settle().await;

    assert!(!manager.is_listening(&peer).await);
    assert!(!radio.notify(&peer, encode_payload("late")));
    assert!(manager.is_connected(&peer).await);
}

#[tokio::test(start_paused = true)]
async fn test_listen_with_callback() {
    let (radio, manager) = setup();
    discover(&radio, &manager, &["p1"]).await;
    let peer = PeerId::from("p1");
    manager.connect_to_device(&peer).await.unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let task = manager
        .start_listening_with(&peer, move |text| sink.lock().unwrap().push(text))
        .await
        .unwrap();

    radio.notify(&peer, encode_payload("a"));
    radio.notify(&peer, encode_payload("b"));
    settle().await;

    manager.disconnect_device(&peer).await;
    task.await.unwrap();
    assert_eq!(*received.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
}
