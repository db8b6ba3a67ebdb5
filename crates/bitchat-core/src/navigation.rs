//! Typed navigation parameters
//!
//! Screens in the presentation layer receive one of these variants instead of
//! an untyped parameter bag.

use serde::{Deserialize, Serialize};

use crate::models::Chat;

/// Parameters for the chat screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoute {
    pub chat: Chat,
}

/// Navigation destination with its parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "screen", content = "params")]
pub enum Route {
    /// Chat list
    Home,
    /// Scan and connect to a nearby peer
    NewChat,
    /// Conversation with one peer
    Chat(ChatRoute),
}

impl Route {
    /// Screen name as used by the presentation layer
    pub fn screen_name(&self) -> &'static str {
        match self {
            Route::Home => "Home",
            Route::NewChat => "NewChat",
            Route::Chat(_) => "Chat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerId;

    #[test]
    fn test_route_round_trips_through_json() {
        let route = Route::Chat(ChatRoute {
            chat: Chat::for_peer(PeerId::from("dev1"), "Alice"),
        });
        let json = serde_json::to_string(&route).unwrap();
        assert!(json.contains("\"screen\":\"Chat\""));
        let back: Route = serde_json::from_str(&json).unwrap();
        assert_eq!(back, route);
        assert_eq!(Route::NewChat.screen_name(), "NewChat");
    }
}
