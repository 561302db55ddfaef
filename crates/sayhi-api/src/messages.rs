use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use anyhow::anyhow;
use uuid::Uuid;

use sayhi_types::api::{DeleteMessageResponse, MarkSeenResponse, ReactRequest, SendMessageRequest};
use sayhi_types::models::User;

use crate::conversation::ConversationError;
use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/messages/contacts
pub async fn get_contacts(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.conversations.contacts(user.id).await?))
}

/// GET /api/messages/chats
pub async fn get_chat_partners(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.conversations.chat_partners(user.id).await?))
}

/// POST /api/messages/send/{receiver_id}
pub async fn send_message(
    State(state): State<AppState>,
    Path(receiver_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = state.conversations.clone();
    let message =
        run_to_completion(async move { service.send_message(user.id, receiver_id, req).await })
            .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/messages/{counterpart_id}. Also marks their messages as seen.
pub async fn get_thread(
    State(state): State<AppState>,
    Path(counterpart_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.conversations.fetch_thread(user.id, counterpart_id).await?))
}

/// POST /api/messages/mark-seen/{counterpart_id}
pub async fn mark_seen(
    State(state): State<AppState>,
    Path(counterpart_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    let service = state.conversations.clone();
    let updated =
        run_to_completion(async move { service.mark_seen(user.id, counterpart_id).await }).await?;
    Ok(Json(MarkSeenResponse {
        success: true,
        updated,
    }))
}

/// POST /api/messages/react/{message_id}
pub async fn react(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(req): Json<ReactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = state.conversations.clone();
    let reactions =
        run_to_completion(async move { service.react(user.id, message_id, &req.emoji).await })
            .await?;
    Ok(Json(reactions))
}

/// DELETE /api/messages/{message_id}
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    let service = state.conversations.clone();
    run_to_completion(async move { service.delete_message(user.id, message_id).await }).await?;
    Ok(Json(DeleteMessageResponse {
        success: true,
        message: "Message deleted".into(),
    }))
}

/// Writes run on their own task so a client hanging up mid-request does
/// not cancel them halfway.
async fn run_to_completion<F, T>(op: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ConversationError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(op)
        .await
        .map_err(|e| anyhow!("conversation task join error: {}", e))?
        .map_err(ApiError::from)
}
