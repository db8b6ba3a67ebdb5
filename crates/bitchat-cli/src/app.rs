//! Application context
//!
//! Owns one connection manager and one conversation store for the lifetime
//! of the process and implements the flows the commands are built from.
//! Call [`App::shutdown`] before exiting.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use bitchat_ble::{ConnectionManager, Peer, RadioTransport};
use bitchat_core::{Chat, ChatMessage, ChatRoute, PeerId, Route};
use bitchat_store::{ConversationStore, KeyValueStore};

use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Services shared by every command
pub struct App<R: RadioTransport, S: KeyValueStore> {
    config: AppConfig,
    manager: ConnectionManager<R>,
    store: Arc<ConversationStore<S>>,
    route: RwLock<Route>,
}

impl<R: RadioTransport, S: KeyValueStore> App<R, S> {
    pub fn new(config: AppConfig, radio: R, kv: S) -> Self {
        let manager = ConnectionManager::new(radio, config.mesh.clone());
        let store = Arc::new(ConversationStore::with_config(kv, &config.store));
        Self {
            config,
            manager,
            store,
            route: RwLock::new(Route::Home),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn manager(&self) -> &ConnectionManager<R> {
        &self.manager
    }

    pub fn store(&self) -> &Arc<ConversationStore<S>> {
        &self.store
    }

    /// Screen the shell currently shows
    pub async fn route(&self) -> Route {
        self.route.read().await.clone()
    }

    pub async fn navigate(&self, route: Route) {
        debug!("Navigating to {}", route.screen_name());
        *self.route.write().await = route;
    }

    // ------------------------------------------------------------------------
    // Radio Flows
    // ------------------------------------------------------------------------

    /// Initialize the radio and run one discovery scan
    pub async fn scan<F>(&self, on_peer_found: F) -> Result<Vec<Peer>>
    where
        F: Fn(&Peer) + Send + Sync + 'static,
    {
        if !self.manager.initialize().await {
            return Err(CliError::RadioNotReady);
        }
        self.navigate(Route::NewChat).await;
        Ok(self.manager.start_discovery(on_peer_found).await?)
    }

    /// Scan until `peer_id` shows up, stopping the scan early when it does
    pub async fn find_peer(&self, peer_id: &PeerId) -> Result<Peer> {
        let target = peer_id.clone();
        let manager = self.manager.clone();
        let peers = self
            .scan(move |peer| {
                if peer.id == target {
                    let manager = manager.clone();
                    tokio::spawn(async move { manager.stop_discovery().await });
                }
            })
            .await?;

        peers
            .into_iter()
            .find(|peer| &peer.id == peer_id)
            .ok_or_else(|| CliError::PeerNotNearby(peer_id.to_string()))
    }

    /// Connect to a discovered peer and open a fresh chat with it
    ///
    /// Saves the peer as a contact, stores a new chat whose preview notes the
    /// connection, and navigates to it.
    pub async fn open_chat(&self, peer: &Peer) -> Result<Chat> {
        self.manager.connect_to_device(&peer.id).await?;
        self.store.save_contact(&peer.id, &peer.name, None).await;

        let chat = Chat::for_peer(peer.id.clone(), peer.name.clone());
        self.store.save_chat(&chat).await;
        info!("Opened chat {} with {}", chat.id, peer.name);

        self.navigate(Route::Chat(ChatRoute { chat: chat.clone() }))
            .await;
        Ok(chat)
    }

    /// Connect to a peer and reuse its latest chat, opening one if needed
    pub async fn resume_chat(&self, peer: &Peer) -> Result<Chat> {
        match self.store.find_chat_for_device(&peer.id).await {
            Some(chat) => {
                self.manager.connect_to_device(&peer.id).await?;
                self.navigate(Route::Chat(ChatRoute { chat: chat.clone() }))
                    .await;
                Ok(chat)
            }
            None => self.open_chat(peer).await,
        }
    }

    /// Send text to a connected peer and record it in the chat
    pub async fn send(&self, chat: &Chat, text: &str) -> Result<ChatMessage> {
        self.manager.send_message(&chat.device_id, text).await?;
        let message = ChatMessage::outgoing(&chat.id, text);
        self.store.record_message(&message).await;
        Ok(message)
    }

    /// Record a message that arrived from the chat's peer
    pub async fn receive(&self, chat: &Chat, text: String) -> ChatMessage {
        let message = ChatMessage::incoming(&chat.id, text, chat.device_id.clone());
        self.store.record_message(&message).await;
        message
    }

    /// Tear down the radio; the store needs no shutdown
    pub async fn shutdown(&self) {
        self.manager.teardown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bitchat_ble::{Advertisement, RadioState, SimulatedRadio};
    use bitchat_core::models::CONNECTED_PREVIEW;
    use bitchat_store::MemoryStore;

    use super::*;

    fn demo_app() -> (SimulatedRadio, App<SimulatedRadio, MemoryStore>) {
        let radio = SimulatedRadio::new();
        radio.add_neighbour(Advertisement {
            id: PeerId::from("SIM-ALICE"),
            name: Some("BitChat-alice".to_string()),
            rssi: Some(-48),
        });
        let app = App::new(AppConfig::default(), radio.clone(), MemoryStore::new());
        (radio, app)
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_chat_saves_contact_and_chat() {
        let (_radio, app) = demo_app();
        let peer = app.find_peer(&PeerId::from("SIM-ALICE")).await.unwrap();
        let chat = app.open_chat(&peer).await.unwrap();

        assert_eq!(chat.last_message, CONNECTED_PREVIEW);
        assert!(chat.id.starts_with("chat_SIM-ALICE_"));
        assert_eq!(app.store().get_all_chats().await, vec![chat.clone()]);
        assert_eq!(
            app.store().get_contacts().await[&peer.id].name,
            "BitChat-alice"
        );
        assert_eq!(app.route().await, Route::Chat(ChatRoute { chat }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_peer_stops_scan_early() {
        let (_radio, app) = demo_app();
        let started = tokio::time::Instant::now();
        app.find_peer(&PeerId::from("SIM-ALICE")).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(!app.manager().is_scanning().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_and_receive_update_chat() {
        let (radio, app) = demo_app();
        let peer = app.find_peer(&PeerId::from("SIM-ALICE")).await.unwrap();
        let chat = app.resume_chat(&peer).await.unwrap();

        app.send(&chat, "hello").await.unwrap();
        app.receive(&chat, "hi back".to_string()).await;

        assert_eq!(radio.writes().len(), 1);
        let stored = app.store().get_chat(&chat.id).await.unwrap();
        assert_eq!(stored.last_message, "hi back");
        assert_eq!(stored.unread, 1);
        assert_eq!(app.store().get_messages_for_chat(&chat.id).await.len(), 2);

        // A second session reuses the chat
        let again = app.resume_chat(&peer).await.unwrap();
        assert_eq!(again.id, chat.id);
        assert_eq!(app.store().get_all_chats().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_peer_is_reported() {
        let (_radio, app) = demo_app();
        assert!(matches!(
            app.find_peer(&PeerId::from("SIM-NOBODY")).await,
            Err(CliError::PeerNotNearby(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_off_is_reported() {
        let (radio, app) = demo_app();
        radio.set_state(RadioState::PoweredOff);
        assert!(matches!(
            app.scan(|_| {}).await,
            Err(CliError::RadioNotReady)
        ));
    }
}
