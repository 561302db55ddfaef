use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Reaction};

/// Events sent from the server to a client over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms the handshake
    Ready { user_id: Uuid },

    /// Full roster of users that currently hold a live connection
    GetOnlineUsers { user_ids: Vec<Uuid> },

    /// A message addressed to this client, text already decrypted
    NewMessage { message: Message },

    /// The reaction set on one of this client's conversation messages changed
    MessageReactionUpdate {
        message_id: Uuid,
        reactions: Vec<Reaction>,
    },

    UserTyping { sender_id: Uuid },

    UserStoppedTyping { sender_id: Uuid },

    /// A newer connection for the same account took over; this one is closing
    SessionReplaced,
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayCommand {
    Typing { receiver_id: Uuid },

    StopTyping { receiver_id: Uuid },
}
