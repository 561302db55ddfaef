use anyhow::anyhow;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use sayhi_types::api::Claims;
use sayhi_types::models::User;

use crate::convert::user_from_row;
use crate::error::ApiError;
use crate::state::{AppState, AppStateInner};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "jwt";

/// Session token from `Authorization: Bearer`, falling back to the cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    bearer.or_else(|| {
        CookieJar::from_headers(headers)
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
    })
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        debug!("Rejected session token: {}", e);
        ApiError::Unauthorized("Unauthorized - Invalid token")
    })
}

/// Resolve a session token to an account that is allowed to use the app:
/// the user must exist, not be blocked and be verified.
pub async fn authenticate(state: &AppStateInner, token: &str) -> Result<User, ApiError> {
    let claims = decode_token(&state.jwt_secret, token)?;

    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let row = tokio::task::spawn_blocking(move || db.get_user_by_id(&uid))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??
        .ok_or(ApiError::Unauthorized("Unauthorized - User not found"))?;

    let user = user_from_row(row);
    check_account(&user)?;
    Ok(user)
}

pub fn check_account(user: &User) -> Result<(), ApiError> {
    if user.is_blocked {
        return Err(ApiError::Forbidden(
            "This account has been suspended for suspicious activity. Contact support.".into(),
        ));
    }
    if !user.is_verified {
        return Err(ApiError::Forbidden("Account not verified. Please check your email.".into()));
    }
    Ok(())
}

/// Authenticate the request and stash the `User` in its extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = token_from_headers(req.headers())
        .ok_or(ApiError::Unauthorized("Unauthorized - No token provided"))?;

    let user = authenticate(&state, &token).await?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
