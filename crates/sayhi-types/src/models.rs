use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    /// Unknown values from storage fall back to the least privileged role.
    pub fn parse(value: &str) -> Self {
        match value {
            "admin" => Self::Admin,
            _ => Self::User,
        }
    }
}

/// Public view of an account. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub profile_pic: String,
    pub role: Role,
    pub is_verified: bool,
    pub is_blocked: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A conversation partner together with how many of their messages
/// the requester has not seen yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPartner {
    #[serde(flatten)]
    pub user: User,
    pub unread_count: u64,
}

/// One user's reaction to a message. A user holds at most one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
}

/// Shallow view of the message being replied to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReplyPreview {
    Available {
        id: Uuid,
        sender_id: Uuid,
        text: Option<String>,
        image: Option<String>,
        created_at: DateTime<Utc>,
    },
    /// The referenced message has been deleted since the reply was sent.
    Deleted { id: Uuid },
}

/// A message as handed to clients: text is always plaintext here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub text: Option<String>,
    pub image: Option<String>,
    pub reply_to: Option<ReplyPreview>,
    pub is_seen: bool,
    pub reactions: Vec<Reaction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
