pub mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Query, Request, State, WebSocketUpgrade},
    http::{HeaderMap, HeaderValue, Method, Uri, header},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use sayhi_api::auth;
use sayhi_api::conversation::ConversationService;
use sayhi_api::error::ApiError;
use sayhi_api::media::{LocalMediaStore, MAX_IMAGE_SIZE, MediaStore};
use sayhi_api::messages;
use sayhi_api::middleware::{authenticate, require_auth, token_from_headers};
use sayhi_api::state::{AppState, AppStateInner};
use sayhi_crypto::Codec;
use sayhi_db::Database;
use sayhi_gateway::connection;
use sayhi_gateway::dispatcher::Dispatcher;

use crate::config::Config;

/// Room for a base64 image plus the rest of the JSON body.
const MAX_BODY_SIZE: usize = MAX_IMAGE_SIZE / 3 * 4 + 64 * 1024;

/// Wire the shared state together around an opened database.
pub fn build_state(db: Database, config: &Config) -> AppState {
    let db = Arc::new(db);
    let dispatcher = Dispatcher::new();
    let media: Arc<dyn MediaStore> =
        Arc::new(LocalMediaStore::new(config.upload_dir.clone(), &config.public_url));
    let conversations = ConversationService::new(
        db.clone(),
        Codec::new(&config.encryption_key),
        dispatcher.clone(),
        media.clone(),
    );

    Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        secure_cookies: config.secure_cookies,
        dispatcher,
        conversations,
        media,
    })
}

pub fn build_router(state: AppState, config: &Config) -> Result<Router> {
    let public_routes = Router::new()
        .route("/", get(health))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/check", get(auth::check))
        .route("/api/auth/update-profile", put(auth::update_profile))
        .route("/api/messages/contacts", get(messages::get_contacts))
        .route("/api/messages/chats", get(messages::get_chat_partners))
        .route("/api/messages/send/{receiver_id}", post(messages::send_message))
        .route("/api/messages/mark-seen/{counterpart_id}", post(messages::mark_seen))
        .route("/api/messages/react/{message_id}", post(messages::react))
        .route("/api/messages/{id}", get(messages::get_thread))
        .route("/api/messages/{id}", delete(messages::delete_message))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/uploads", ServeDir::new(&config.upload_dir))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(cors_layer(config)?)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            tracing::debug_span!(
                "request",
                method = %request.method(),
                uri = %redacted_uri(request.uri())
            )
        }));

    Ok(app)
}

fn cors_layer(config: &Config) -> Result<CorsLayer> {
    let Some(origin) = &config.client_origin else {
        return Ok(CorsLayer::permissive());
    };

    let origin: HeaderValue = origin
        .parse()
        .with_context(|| format!("SAYHI_CLIENT_ORIGIN is not a valid origin: {}", origin))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]))
}

/// Request URI for logs, with any session token in the query blanked out.
fn redacted_uri(uri: &Uri) -> String {
    let Some(query) = uri.query() else {
        return uri.path().to_string();
    };

    let pairs: Vec<&str> = query
        .split('&')
        .map(|pair| if pair.starts_with("token=") { "token=[redacted]" } else { pair })
        .collect();
    format!("{}?{}", uri.path(), pairs.join("&"))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "SayHi API is active." }))
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Authenticate before upgrading: a bad handshake never reaches the
/// presence registry.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let token = query
        .token
        .or_else(|| token_from_headers(&headers))
        .ok_or(ApiError::Unauthorized("Unauthorized - No token provided"))?;

    let user = authenticate(&state, &token).await?;

    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, db, user.id, user.full_name)
    }))
}
