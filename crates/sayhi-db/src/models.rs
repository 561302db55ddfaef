/// Database row types. These map directly to SQLite rows.
/// Distinct from sayhi-types API models to keep the DB layer independent.
/// Timestamps are RFC 3339 strings with microseconds, so they sort lexically.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub profile_pic: String,
    pub role: String,
    pub is_verified: bool,
    pub is_blocked: bool,
    pub last_seen: Option<String>,
    pub created_at: String,
}

pub struct NewMessage<'a> {
    pub id: &'a str,
    pub sender_id: &'a str,
    pub receiver_id: &'a str,
    /// Already-encrypted envelope
    pub text: Option<&'a str>,
    pub image: Option<&'a str>,
    pub reply_to: Option<&'a str>,
    pub created_at: &'a str,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub image: Option<String>,
    pub reply_to: Option<String>,
    pub is_seen: bool,
    pub created_at: String,
    pub updated_at: String,
    /// Present when `reply_to` is set and the target still exists
    pub reply: Option<ReplyRow>,
}

#[derive(Debug, Clone)]
pub struct ReplyRow {
    pub id: String,
    pub sender_id: String,
    pub text: Option<String>,
    pub image: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

/// Outcome of applying one user's reaction to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionChange {
    Added,
    Removed,
    Switched,
}

pub struct ReactionOutcome {
    pub change: ReactionChange,
    pub message: MessageRow,
    pub reactions: Vec<ReactionRow>,
}

pub struct ChatPartnerRow {
    pub user: UserRow,
    pub unread_count: u64,
}
