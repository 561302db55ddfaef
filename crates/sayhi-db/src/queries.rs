use crate::Database;
use crate::models::{
    ChatPartnerRow, MessageRow, NewMessage, ReactionChange, ReactionOutcome, ReactionRow, ReplyRow,
    UserRow,
};
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str =
    "id, email, full_name, password, profile_pic, role, is_verified, is_blocked, last_seen, created_at";

// LEFT JOIN pulls the reply preview in the same query
const MESSAGE_SELECT: &str = "SELECT m.id, m.sender_id, m.receiver_id, m.text, m.image, m.reply_to,
            m.is_seen, m.created_at, m.updated_at,
            r.id, r.sender_id, r.text, r.image, r.created_at
     FROM messages m
     LEFT JOIN messages r ON r.id = m.reply_to";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        full_name: &str,
        password_hash: &str,
        is_verified: bool,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, full_name, password, is_verified, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, email, full_name, password_hash, is_verified, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    /// Every account except `id`, by name.
    pub fn list_users_except(&self, id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users WHERE id <> ?1 ORDER BY full_name COLLATE NOCASE",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([id], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false when no such user exists.
    pub fn set_profile_pic(&self, id: &str, url: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE users SET profile_pic = ?2 WHERE id = ?1",
                rusqlite::params![id, url],
            )?;
            Ok(n > 0)
        })
    }

    pub fn touch_last_seen(&self, id: &str, at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_seen = ?2 WHERE id = ?1",
                rusqlite::params![id, at],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, text, image, reply_to, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![
                    msg.id,
                    msg.sender_id,
                    msg.receiver_id,
                    msg.text,
                    msg.image,
                    msg.reply_to,
                    msg.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// All messages between two users in either direction, oldest first.
    pub fn get_thread(&self, user_a: &str, user_b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                     OR (m.sender_id = ?2 AND m.receiver_id = ?1)
                 ORDER BY m.created_at, m.rowid",
                MESSAGE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_a, user_b], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Flip every unseen message from `sender_id` to `receiver_id` to seen.
    /// Returns how many rows changed; zero is not an error.
    pub fn mark_seen(&self, sender_id: &str, receiver_id: &str, at: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET is_seen = 1, updated_at = ?3
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND is_seen = 0",
                rusqlite::params![sender_id, receiver_id, at],
            )?;
            Ok(n)
        })
    }

    /// Hard delete. Reactions go with it; replies pointing here are left dangling.
    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    /// Everyone the user has exchanged at least one message with, most recent
    /// conversation first, with the count of their messages still unseen.
    pub fn get_chat_partners(&self, user_id: &str) -> Result<Vec<ChatPartnerRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {},
                    (SELECT COUNT(*) FROM messages u1
                      WHERE u1.sender_id = users.id AND u1.receiver_id = ?1 AND u1.is_seen = 0)
                 FROM users
                 WHERE id IN (SELECT receiver_id FROM messages WHERE sender_id = ?1
                              UNION
                              SELECT sender_id FROM messages WHERE receiver_id = ?1)
                 ORDER BY (SELECT MAX(l.created_at) FROM messages l
                            WHERE (l.sender_id = users.id AND l.receiver_id = ?1)
                               OR (l.sender_id = ?1 AND l.receiver_id = users.id)) DESC",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ChatPartnerRow {
                        user: map_user_row(row)?,
                        unread_count: row.get::<_, i64>(10)?.max(0) as u64,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reactions --

    /// Apply `user_id`'s reaction: add when absent, remove when the same
    /// emoji is already there, switch otherwise. Returns `None` when the
    /// message does not exist.
    pub fn apply_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        at: &str,
    ) -> Result<Option<ReactionOutcome>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if query_message(&tx, message_id)?.is_none() {
                return Ok(None);
            }

            let existing: Option<String> = tx
                .query_row(
                    "SELECT emoji FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                    [message_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;

            let change = match existing {
                None => {
                    tx.execute(
                        "INSERT INTO reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![message_id, user_id, emoji, at],
                    )?;
                    ReactionChange::Added
                }
                Some(current) if current == emoji => {
                    tx.execute(
                        "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                        [message_id, user_id],
                    )?;
                    ReactionChange::Removed
                }
                Some(_) => {
                    // UPDATE keeps the rowid, so the entry keeps its position
                    tx.execute(
                        "UPDATE reactions SET emoji = ?3 WHERE message_id = ?1 AND user_id = ?2",
                        rusqlite::params![message_id, user_id, emoji],
                    )?;
                    ReactionChange::Switched
                }
            };

            tx.execute(
                "UPDATE messages SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![message_id, at],
            )?;

            let message = query_message(&tx, message_id)?
                .ok_or_else(|| anyhow::anyhow!("Message vanished mid-transaction: {}", message_id))?;
            let reactions = query_reactions(&tx, "message_id = ?1", &[message_id])?;

            tx.commit()?;

            Ok(Some(ReactionOutcome {
                change,
                message,
                reactions,
            }))
        })
    }

    /// Reactions on every message between two users, in insertion order.
    pub fn get_thread_reactions(&self, user_a: &str, user_b: &str) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            query_reactions(
                conn,
                "message_id IN (SELECT id FROM messages
                                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                                    OR (sender_id = ?2 AND receiver_id = ?1))",
                &[user_a, user_b],
            )
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([value], map_user_row).optional()?;

    Ok(row)
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!("{} WHERE m.id = ?1", MESSAGE_SELECT);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([id], map_message_row).optional()?;

    Ok(row)
}

fn query_reactions(conn: &Connection, filter: &str, params: &[&str]) -> Result<Vec<ReactionRow>> {
    let sql = format!(
        "SELECT message_id, user_id, emoji FROM reactions WHERE {} ORDER BY rowid",
        filter
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), |row| {
            Ok(ReactionRow {
                message_id: row.get(0)?,
                user_id: row.get(1)?,
                emoji: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn map_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        password: row.get(3)?,
        profile_pic: row.get(4)?,
        role: row.get(5)?,
        is_verified: row.get(6)?,
        is_blocked: row.get(7)?,
        last_seen: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let reply = match row.get::<_, Option<String>>(9)? {
        Some(id) => Some(ReplyRow {
            id,
            sender_id: row.get(10)?,
            text: row.get(11)?,
            image: row.get(12)?,
            created_at: row.get(13)?,
        }),
        None => None,
    };

    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        text: row.get(3)?,
        image: row.get(4)?,
        reply_to: row.get(5)?,
        is_seen: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        reply,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
