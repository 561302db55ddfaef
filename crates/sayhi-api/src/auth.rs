use std::sync::Arc;

use anyhow::anyhow;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use sayhi_db::Database;
use sayhi_types::api::{AuthResponse, Claims, LoginRequest, SignupRequest, UpdateProfileRequest};
use sayhi_types::models::User;

use crate::conversation::ConversationError;
use crate::convert::user_from_row;
use crate::error::ApiError;
use crate::media::MediaStore;
use crate::middleware::{SESSION_COOKIE, check_account};
use crate::state::AppState;

const TOKEN_LIFETIME_DAYS: i64 = 7;
const MIN_PASSWORD_LEN: usize = 6;

pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let full_name = req.full_name.trim();
    let email = req.email.trim().to_lowercase();

    // Validate input
    if full_name.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("All fields are required".into()));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if !looks_like_email(&email) {
        return Err(ApiError::BadRequest("Invalid email format".into()));
    }

    if state.db.get_user_by_email(&email)?.is_some() {
        return Err(ApiError::Conflict("Email already exists".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();

    // Email delivery is not part of this service, so accounts start verified
    state.db.create_user(
        &user_id.to_string(),
        &email,
        full_name,
        &password_hash,
        true,
        &sayhi_db::now_timestamp(),
    )?;

    let row = state
        .db
        .get_user_by_id(&user_id.to_string())?
        .ok_or_else(|| anyhow!("User {} missing right after insert", user_id))?;
    let user = user_from_row(row);

    let token = create_token(&state.jwt_secret, user_id)?;
    info!("New account {} ({})", user.full_name, user.id);

    Ok((
        StatusCode::CREATED,
        jar.add(session_cookie(token.clone(), state.secure_cookies)),
        Json(AuthResponse { user, token }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = || ApiError::BadRequest("Invalid credentials".into());

    let row = state
        .db
        .get_user_by_email(&req.email.trim().to_lowercase())?
        .ok_or_else(invalid)?;

    if row.is_blocked {
        return Err(ApiError::Forbidden(
            "This account has been suspended for suspicious activity. Contact support.".into(),
        ));
    }

    // Verify password
    let parsed_hash =
        PasswordHash::new(&row.password).map_err(|e| anyhow!("Stored hash unreadable: {}", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid())?;

    let user = user_from_row(row);
    check_account(&user)?;

    let token = create_token(&state.jwt_secret, user.id)?;

    Ok((jar.add(session_cookie(token.clone(), state.secure_cookies)), Json(AuthResponse { user, token })))
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Json(serde_json::json!({ "message": "Logged out successfully" })),
    )
}

/// The authenticated user, as resolved by the middleware.
pub async fn check(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}

/// PUT /api/auth/update-profile
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<User>, ApiError> {
    let user = store_profile_pic(state.db.clone(), state.media.as_ref(), user.id, &req.profile_pic).await?;
    info!("{} ({}) updated their profile picture", user.full_name, user.id);
    Ok(Json(user))
}

/// Upload the picture, then point the account at it. Nothing is written
/// when the upload fails.
pub async fn store_profile_pic(
    db: Arc<Database>,
    media: &dyn MediaStore,
    user_id: Uuid,
    data_uri: &str,
) -> Result<User, ApiError> {
    let data_uri = data_uri.trim();
    if data_uri.is_empty() {
        return Err(ApiError::BadRequest("Profile pic is required".into()));
    }

    let url = media.upload(data_uri).await.map_err(|e| {
        error!("Profile picture upload for {} failed: {:#}", user_id, e);
        ApiError::from(ConversationError::Upload)
    })?;

    let uid = user_id.to_string();
    let row = tokio::task::spawn_blocking(move || {
        if !db.set_profile_pic(&uid, &url)? {
            return Ok(None);
        }
        db.get_user_by_id(&uid)
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??
    .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(user_from_row(row))
}

pub fn create_token(secret: &str, user_id: Uuid) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

/// Something@something.tld with no whitespace.
fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !email.chars().any(char::is_whitespace)
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}
