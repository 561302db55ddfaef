//! Row -> wire model conversion. Corrupt stored ids or timestamps are logged
//! and replaced with defaults rather than failing the whole response.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use sayhi_db::models::{ChatPartnerRow, UserRow};
use sayhi_types::models::{ChatPartner, Role, User};

pub fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub fn parse_time(raw: &str, what: &str) -> DateTime<Utc> {
    sayhi_db::parse_timestamp(raw).unwrap_or_else(|| {
        warn!("Corrupt {} '{}'", what, raw);
        DateTime::default()
    })
}

pub fn user_from_row(row: UserRow) -> User {
    User {
        id: parse_id(&row.id, "user id"),
        created_at: parse_time(&row.created_at, "user created_at"),
        last_seen: row.last_seen.as_deref().and_then(sayhi_db::parse_timestamp),
        role: Role::parse(&row.role),
        email: row.email,
        full_name: row.full_name,
        profile_pic: row.profile_pic,
        is_verified: row.is_verified,
        is_blocked: row.is_blocked,
    }
}

pub fn chat_partner_from_row(row: ChatPartnerRow) -> ChatPartner {
    ChatPartner {
        user: user_from_row(row.user),
        unread_count: row.unread_count,
    }
}
