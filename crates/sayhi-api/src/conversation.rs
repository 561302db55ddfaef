//! Request-driven message operations.
//!
//! Every operation commits to the store before any realtime push, and the
//! push itself is fire-and-forget: an offline recipient is a normal branch,
//! the message stays available through the next fetch.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use sayhi_crypto::Codec;
use sayhi_db::Database;
use sayhi_db::models::{MessageRow, NewMessage, ReactionRow};
use sayhi_gateway::dispatcher::Dispatcher;
use sayhi_types::api::SendMessageRequest;
use sayhi_types::events::GatewayEvent;
use sayhi_types::models::{ChatPartner, Message, Reaction, ReplyPreview, User};

use crate::convert::{chat_partner_from_row, parse_id, parse_time, user_from_row};
use crate::media::MediaStore;

pub const MAX_TEXT_CHARS: usize = 2000;
pub const MAX_EMOJI_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Failed to upload image.")]
    Upload,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ConversationError>;

#[derive(Clone)]
pub struct ConversationService {
    db: Arc<Database>,
    codec: Arc<Codec>,
    dispatcher: Dispatcher,
    media: Arc<dyn MediaStore>,
}

impl ConversationService {
    pub fn new(db: Arc<Database>, codec: Codec, dispatcher: Dispatcher, media: Arc<dyn MediaStore>) -> Self {
        Self {
            db,
            codec: Arc::new(codec),
            dispatcher,
            media,
        }
    }

    /// Validate, upload any image, persist encrypted, then push the
    /// plaintext message to the receiver if they are online.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        req: SendMessageRequest,
    ) -> Result<Message> {
        // Whitespace only counts as no text; anything else is stored as sent
        let text = req.text.as_deref().filter(|t| !t.trim().is_empty());
        let image = req.image.as_deref().map(str::trim).filter(|i| !i.is_empty());

        if text.is_none() && image.is_none() {
            return Err(ConversationError::Validation("Text or image is required.".into()));
        }
        if sender_id == receiver_id {
            return Err(ConversationError::Validation("Cannot send messages to yourself.".into()));
        }
        if text.is_some_and(|t| t.trim().chars().count() > MAX_TEXT_CHARS) {
            return Err(ConversationError::Validation(format!(
                "Message text is limited to {} characters.",
                MAX_TEXT_CHARS
            )));
        }

        let rid = receiver_id.to_string();
        let reply_to = req.reply_to.map(|id| id.to_string());
        let reply_check = reply_to.clone();
        let sid = sender_id.to_string();
        self.blocking(move |db| {
            if db.get_user_by_id(&rid)?.is_none() {
                return Ok(Err(ConversationError::NotFound("Receiver")));
            }
            if let Some(target_id) = reply_check {
                let Some(target) = db.get_message(&target_id)? else {
                    return Ok(Err(ConversationError::Validation("Replied-to message not found.".into())));
                };
                if !same_pair(&target, &sid, &rid) {
                    return Ok(Err(ConversationError::Validation(
                        "Replies must stay within the same conversation.".into(),
                    )));
                }
            }
            Ok(Ok(()))
        })
        .await??;

        // Upload before anything is written; a failure aborts the whole send
        let image_url = match image {
            Some(data) => Some(self.media.upload(data).await.map_err(|e| {
                error!("Image upload for {} failed: {:#}", sender_id, e);
                ConversationError::Upload
            })?),
            None => None,
        };

        let envelope = match text {
            Some(t) => self.codec.encrypt(t)?,
            None => None,
        };

        let message_id = Uuid::now_v7();
        let mid = message_id.to_string();
        let sid = sender_id.to_string();
        let rid = receiver_id.to_string();
        let row = self
            .blocking(move |db| {
                db.insert_message(&NewMessage {
                    id: &mid,
                    sender_id: &sid,
                    receiver_id: &rid,
                    text: envelope.as_deref(),
                    image: image_url.as_deref(),
                    reply_to: reply_to.as_deref(),
                    created_at: &sayhi_db::now_timestamp(),
                })?;
                db.get_message(&mid)?
                    .ok_or_else(|| anyhow!("Message {} missing right after insert", mid))
            })
            .await?;

        let message = self.to_message(row, Vec::new());

        let delivered = self
            .dispatcher
            .send_to_user(receiver_id, GatewayEvent::NewMessage { message: message.clone() })
            .await;
        debug!("Message {} from {} to {} (pushed: {})", message_id, sender_id, receiver_id, delivered);

        Ok(message)
    }

    /// Open a thread: mark the counterpart's messages as seen, then return
    /// the whole conversation oldest first with text decrypted.
    pub async fn fetch_thread(&self, requester_id: Uuid, counterpart_id: Uuid) -> Result<Vec<Message>> {
        let me = requester_id.to_string();
        let them = counterpart_id.to_string();

        let found = self
            .blocking(move |db| {
                if db.get_user_by_id(&them)?.is_none() {
                    return Ok(None);
                }
                db.mark_seen(&them, &me, &sayhi_db::now_timestamp())?;

                let rows = db.get_thread(&me, &them)?;
                let reactions = db.get_thread_reactions(&me, &them)?;
                Ok(Some((rows, reactions)))
            })
            .await?;

        let Some((rows, reaction_rows)) = found else {
            return Err(ConversationError::NotFound("User"));
        };

        let mut reactions = group_reactions(reaction_rows);
        Ok(rows
            .into_iter()
            .map(|row| {
                let list = reactions.remove(&row.id).unwrap_or_default();
                self.to_message(row, list)
            })
            .collect())
    }

    /// Mark every unseen message from `counterpart_id` to `requester_id` as
    /// seen. Returns how many changed; zero is fine.
    pub async fn mark_seen(&self, requester_id: Uuid, counterpart_id: Uuid) -> Result<usize> {
        let me = requester_id.to_string();
        let them = counterpart_id.to_string();
        self.blocking(move |db| db.mark_seen(&them, &me, &sayhi_db::now_timestamp()))
            .await
    }

    /// Add, switch or toggle off the actor's reaction, then tell the other
    /// participant.
    pub async fn react(&self, actor_id: Uuid, message_id: Uuid, emoji: &str) -> Result<Vec<Reaction>> {
        let emoji = emoji.trim().to_string();
        if emoji.is_empty() {
            return Err(ConversationError::Validation("Emoji is required.".into()));
        }
        if emoji.len() > MAX_EMOJI_BYTES {
            return Err(ConversationError::Validation("Emoji is too long.".into()));
        }

        let mid = message_id.to_string();
        let aid = actor_id.to_string();
        let outcome = self
            .blocking(move |db| {
                let Some(message) = db.get_message(&mid)? else {
                    return Ok(Err(ConversationError::NotFound("Message")));
                };
                if message.sender_id != aid && message.receiver_id != aid {
                    return Ok(Err(ConversationError::Forbidden(
                        "Only conversation participants can react.".into(),
                    )));
                }
                match db.apply_reaction(&mid, &aid, &emoji, &sayhi_db::now_timestamp())? {
                    Some(outcome) => Ok(Ok(outcome)),
                    None => Ok(Err(ConversationError::NotFound("Message"))),
                }
            })
            .await??;

        let reactions: Vec<Reaction> = outcome.reactions.iter().map(reaction_from_row).collect();

        let sender_id = parse_id(&outcome.message.sender_id, "sender_id");
        let receiver_id = parse_id(&outcome.message.receiver_id, "receiver_id");
        let other = if sender_id == actor_id { receiver_id } else { sender_id };

        debug!("{} reaction {:?} on {}", actor_id, outcome.change, message_id);
        self.dispatcher
            .send_to_user(
                other,
                GatewayEvent::MessageReactionUpdate {
                    message_id,
                    reactions: reactions.clone(),
                },
            )
            .await;

        Ok(reactions)
    }

    /// Hard-delete a message. Only its sender may do this.
    pub async fn delete_message(&self, requester_id: Uuid, message_id: Uuid) -> Result<()> {
        let mid = message_id.to_string();
        let rid = requester_id.to_string();
        self.blocking(move |db| {
            let Some(message) = db.get_message(&mid)? else {
                return Ok(Err(ConversationError::NotFound("Message")));
            };
            if message.sender_id != rid {
                return Ok(Err(ConversationError::Forbidden("Unauthorized".into())));
            }
            db.delete_message(&mid)?;
            Ok(Ok(()))
        })
        .await??;

        info!("{} deleted message {}", requester_id, message_id);
        Ok(())
    }

    /// Every other account.
    pub async fn contacts(&self, requester_id: Uuid) -> Result<Vec<User>> {
        let me = requester_id.to_string();
        let rows = self.blocking(move |db| db.list_users_except(&me)).await?;
        Ok(rows.into_iter().map(user_from_row).collect())
    }

    /// Everyone the requester has talked to, with unread counts.
    pub async fn chat_partners(&self, requester_id: Uuid) -> Result<Vec<ChatPartner>> {
        let me = requester_id.to_string();
        let rows = self.blocking(move |db| db.get_chat_partners(&me)).await?;
        Ok(rows.into_iter().map(chat_partner_from_row).collect())
    }

    /// Run blocking DB work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let value = tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;
        Ok(value)
    }

    fn to_message(&self, row: MessageRow, reactions: Vec<Reaction>) -> Message {
        let reply_to = match (row.reply_to.as_deref(), row.reply) {
            (Some(_), Some(reply)) => Some(ReplyPreview::Available {
                id: parse_id(&reply.id, "reply id"),
                sender_id: parse_id(&reply.sender_id, "reply sender_id"),
                text: reply.text.as_deref().map(|t| self.codec.decrypt(t)),
                image: reply.image,
                created_at: parse_time(&reply.created_at, "reply created_at"),
            }),
            (Some(target), None) => Some(ReplyPreview::Deleted {
                id: parse_id(target, "reply_to"),
            }),
            (None, _) => None,
        };

        Message {
            id: parse_id(&row.id, "message id"),
            sender_id: parse_id(&row.sender_id, "sender_id"),
            receiver_id: parse_id(&row.receiver_id, "receiver_id"),
            text: row.text.as_deref().map(|t| self.codec.decrypt(t)),
            image: row.image,
            reply_to,
            is_seen: row.is_seen,
            reactions,
            created_at: parse_time(&row.created_at, "message created_at"),
            updated_at: parse_time(&row.updated_at, "message updated_at"),
        }
    }
}

fn same_pair(message: &MessageRow, a: &str, b: &str) -> bool {
    (message.sender_id == a && message.receiver_id == b)
        || (message.sender_id == b && message.receiver_id == a)
}

fn reaction_from_row(row: &ReactionRow) -> Reaction {
    Reaction {
        user_id: parse_id(&row.user_id, "reaction user_id"),
        emoji: row.emoji.clone(),
    }
}

fn group_reactions(rows: Vec<ReactionRow>) -> HashMap<String, Vec<Reaction>> {
    let mut map: HashMap<String, Vec<Reaction>> = HashMap::new();
    for row in &rows {
        map.entry(row.message_id.clone())
            .or_default()
            .push(reaction_from_row(row));
    }
    map
}
