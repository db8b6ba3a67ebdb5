//! Command handlers for the BitChat CLI

use tracing::{info, warn};

use bitchat_ble::{generate_device_name, Peer, RadioTransport};
use bitchat_core::{Chat, ChatMessage, PeerId, Route};
use bitchat_store::KeyValueStore;

use crate::app::App;
use crate::cli::Commands;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute<R, S>(command: &Commands, app: &App<R, S>) -> Result<()>
    where
        R: RadioTransport,
        S: KeyValueStore,
    {
        match command {
            Commands::Scan => Self::handle_scan_command(app).await,
            Commands::Connect { peer } => Self::handle_connect_command(app, peer).await,
            Commands::Send { peer, message } => {
                Self::handle_send_command(app, peer, message).await
            }
            Commands::Chats => Self::handle_chats_command(app).await,
            Commands::Messages { chat_id } => Self::handle_messages_command(app, chat_id).await,
            Commands::Stats => Self::handle_stats_command(app).await,
            Commands::Whoami => Self::handle_whoami_command(app).await,
            Commands::Clear { yes } => Self::handle_clear_command(app, *yes).await,
            Commands::Config => Self::handle_config_command(app),
        }
    }

    async fn handle_scan_command<R, S>(app: &App<R, S>) -> Result<()>
    where
        R: RadioTransport,
        S: KeyValueStore,
    {
        let scan_secs = app.config().mesh.scan_duration_secs;
        println!("Scanning for BitChat devices for {}s...", scan_secs);

        let live = app.config().cli.live_scan_output;
        let peers = app
            .scan(move |peer| {
                if live {
                    println!("  found {}", describe_peer(peer));
                }
            })
            .await?;

        if peers.is_empty() {
            println!("No BitChat devices found nearby.");
            return Ok(());
        }

        println!("\n{} device(s) nearby:", peers.len());
        for peer in &peers {
            println!("  {}", describe_peer(peer));
        }
        Ok(())
    }

    /// Connect, then print incoming messages until Ctrl-C or link loss
    async fn handle_connect_command<R, S>(app: &App<R, S>, peer_id: &str) -> Result<()>
    where
        R: RadioTransport,
        S: KeyValueStore,
    {
        let peer = app.find_peer(&PeerId::from(peer_id)).await?;
        let chat = app.open_chat(&peer).await?;
        let mut subscription = app.manager().start_listening(&peer.id).await?;

        println!(
            "Connected to {} in chat {}. Press Ctrl-C to leave.",
            peer.name, chat.id
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, leaving chat {}", chat.id);
                    break;
                }
                next = subscription.recv() => match next {
                    Some(text) => {
                        let message = app.receive(&chat, text).await;
                        print_message(&chat, &message);
                    }
                    None => {
                        println!("Connection to {} closed.", peer.name);
                        break;
                    }
                },
            }
        }

        subscription.unsubscribe();
        app.store().mark_chat_read(&chat.id).await;
        app.navigate(Route::Home).await;
        Ok(())
    }

    async fn handle_send_command<R, S>(app: &App<R, S>, peer_id: &str, text: &str) -> Result<()>
    where
        R: RadioTransport,
        S: KeyValueStore,
    {
        let peer = app.find_peer(&PeerId::from(peer_id)).await?;
        let chat = app.resume_chat(&peer).await?;
        let message = app.send(&chat, text).await?;
        print_message(&chat, &message);
        Ok(())
    }

    async fn handle_chats_command<R, S>(app: &App<R, S>) -> Result<()>
    where
        R: RadioTransport,
        S: KeyValueStore,
    {
        let chats = app.store().get_all_chats().await;
        if chats.is_empty() {
            println!("No chats yet. Use `bitchat connect <peer>` to start one.");
            return Ok(());
        }

        for chat in &chats {
            let unread = if chat.unread > 0 {
                format!(" ({} unread)", chat.unread)
            } else {
                String::new()
            };
            println!("{}  {}{}", chat.id, chat.name, unread);
            println!("    {}", chat.last_message);
        }
        Ok(())
    }

    async fn handle_messages_command<R, S>(app: &App<R, S>, chat_id: &str) -> Result<()>
    where
        R: RadioTransport,
        S: KeyValueStore,
    {
        let chat = app
            .store()
            .get_chat(chat_id)
            .await
            .ok_or_else(|| CliError::UnknownChat(chat_id.to_string()))?;

        let messages = app.store().get_messages_for_chat(chat_id).await;
        if messages.is_empty() {
            println!("No messages in {}.", chat.name);
        }
        for message in &messages {
            print_message(&chat, message);
        }

        app.store().mark_chat_read(chat_id).await;
        Ok(())
    }

    async fn handle_stats_command<R, S>(app: &App<R, S>) -> Result<()>
    where
        R: RadioTransport,
        S: KeyValueStore,
    {
        let stats = app.store().get_storage_stats().await;
        println!("Messages: {}", stats.messages);
        println!("Chats:    {}", stats.chats);
        println!("Contacts: {}", stats.contacts);
        Ok(())
    }

    async fn handle_whoami_command<R, S>(app: &App<R, S>) -> Result<()>
    where
        R: RadioTransport,
        S: KeyValueStore,
    {
        let user_id = app.store().get_user_id().await;
        let device_name =
            generate_device_name(&app.config().cli.nickname, &app.config().mesh.name_marker);
        println!("User id:     {}", user_id);
        println!("Device name: {}", device_name);
        match app.store().get_public_key().await {
            Some(key) => println!("Public key:  {}", key),
            None => println!("Public key:  (none)"),
        }
        Ok(())
    }

    async fn handle_clear_command<R, S>(app: &App<R, S>, confirmed: bool) -> Result<()>
    where
        R: RadioTransport,
        S: KeyValueStore,
    {
        if !confirmed {
            return Err(CliError::Refused(
                "Refusing to delete all conversations without --yes".to_string(),
            ));
        }

        let before = app.store().get_storage_stats().await;
        app.store().clear_all().await;
        let after = app.store().get_storage_stats().await;
        if after.messages + after.chats + after.contacts > 0 {
            warn!("Some records survived clearing: {:?}", after);
        }
        println!(
            "Deleted {} message(s), {} chat(s) and {} contact(s).",
            before.messages, before.chats, before.contacts
        );
        Ok(())
    }

    fn handle_config_command<R, S>(app: &App<R, S>) -> Result<()>
    where
        R: RadioTransport,
        S: KeyValueStore,
    {
        print!("{}", app.config().to_toml()?);
        Ok(())
    }
}

fn describe_peer(peer: &Peer) -> String {
    match peer.rssi {
        Some(rssi) => format!("{}  {}  {} dBm", peer.id, peer.name, rssi),
        None => format!("{}  {}", peer.id, peer.name),
    }
}

fn print_message(chat: &Chat, message: &ChatMessage) {
    let sender = if message.is_own { "me" } else { chat.name.as_str() };
    println!("[{}] {}: {}", message.timestamp, sender, message.text);
}

#[cfg(test)]
mod tests {
    use bitchat_ble::{Advertisement, SimulatedRadio};
    use bitchat_store::MemoryStore;

    use super::*;
    use crate::config::AppConfig;

    fn app_with_peer() -> App<SimulatedRadio, MemoryStore> {
        let radio = SimulatedRadio::new();
        radio.add_neighbour(Advertisement {
            id: PeerId::from("SIM-BOB"),
            name: Some("BitChat-bob".to_string()),
            rssi: None,
        });
        App::new(AppConfig::default(), radio, MemoryStore::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_command_records_message() {
        let app = app_with_peer();
        CommandDispatcher::execute(
            &Commands::Send {
                peer: "SIM-BOB".into(),
                message: "ping".into(),
            },
            &app,
        )
        .await
        .unwrap();

        let stats = app.store().get_storage_stats().await;
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.chats, 1);
        assert_eq!(stats.contacts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_requires_confirmation() {
        let app = app_with_peer();
        app.store()
            .save_message(&ChatMessage::outgoing("chat_1", "keep me"))
            .await;

        let refused = CommandDispatcher::execute(&Commands::Clear { yes: false }, &app).await;
        assert!(matches!(refused, Err(CliError::Refused(_))));
        assert_eq!(app.store().get_storage_stats().await.messages, 1);

        CommandDispatcher::execute(&Commands::Clear { yes: true }, &app)
            .await
            .unwrap();
        assert_eq!(app.store().get_storage_stats().await.messages, 0);
    }

    #[tokio::test]
    async fn test_messages_for_unknown_chat() {
        let app = app_with_peer();
        let result = CommandDispatcher::execute(
            &Commands::Messages {
                chat_id: "chat_missing".into(),
            },
            &app,
        )
        .await;
        assert!(matches!(result, Err(CliError::UnknownChat(_))));
    }
}
