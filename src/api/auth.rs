//! Authentication: Plex token exchange and JWT verification
//!
//! The frontend completes the Plex OAuth flow itself and hands the
//! resulting account token to `/api/auth/token`, which verifies it
//! against plex.tv, upserts the user row, and issues a service JWT. All
//! other endpoints authenticate with that JWT via the `CurrentUser`
//! extractor.

use axum::extract::{FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::api::ApiError;
use crate::db::users::{UpsertUser, UserRecord};
use crate::db::UserRepository;
use crate::services::plex;

/// JWT claims carried by a service access token
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

/// Issue a signed access token for a user
pub fn issue_token(secret: &str, lifetime_minutes: i64, user: &UserRecord) -> anyhow::Result<String> {
    let now = Utc::now();
    let claims = AccessTokenClaims {
        sub: user.id.to_string(),
        username: user.plex_username.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::minutes(lifetime_minutes)).timestamp(),
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.trim().as_bytes()),
    )?)
}

/// Verify an access token and return its claims
pub fn verify_token(secret: &str, token: &str) -> Result<AccessTokenClaims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    decode::<AccessTokenClaims>(
        token,
        &DecodingKey::from_secret(secret.trim().as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "JWT verification failed");
        ApiError::Unauthorized(format!("Invalid token: {}", e))
    })
}

/// Authenticated user, extracted from the Authorization header
pub struct CurrentUser(pub UserRecord);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::Unauthorized("Expected a bearer token".to_string()))?;

        let claims = verify_token(&state.config.jwt_secret, token)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ApiError::Unauthorized("Malformed token subject".to_string()))?;

        let user = UserRepository::new(state.db.pool().clone())
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;

        Ok(CurrentUser(user))
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenExchangeRequest {
    plex_token: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
}

#[derive(Debug, Serialize)]
struct UserResponse {
    id: Uuid,
    plex_username: String,
    plex_email: Option<String>,
    plex_thumb_url: Option<String>,
    created_at: DateTime<Utc>,
    last_login: DateTime<Utc>,
}

impl From<UserRecord> for UserResponse {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            plex_username: user.plex_username,
            plex_email: user.plex_email,
            plex_thumb_url: user.plex_thumb_url,
            created_at: user.created_at,
            last_login: user.last_login,
        }
    }
}

/// Exchange a verified Plex account token for a service JWT
async fn exchange_token(
    State(state): State<AppState>,
    Json(request): Json<TokenExchangeRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    if request.plex_token.trim().is_empty() {
        return Err(ApiError::BadRequest("plex_token is required".to_string()));
    }

    let account = plex::fetch_account(&state.config.plex_client_identifier, &request.plex_token)
        .await
        .map_err(|e| {
            tracing::info!(error = %e, "Plex token verification failed");
            ApiError::Unauthorized("Plex token could not be verified".to_string())
        })?;

    let user = UserRepository::new(state.db.pool().clone())
        .upsert(UpsertUser {
            plex_user_id: account.id.to_string(),
            plex_username: account.username,
            plex_email: account.email,
            plex_token: request.plex_token,
            plex_thumb_url: account.thumb,
        })
        .await?;

    let access_token = issue_token(
        &state.config.jwt_secret,
        state.config.access_token_minutes,
        &user,
    )?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

/// Current user profile
async fn me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(user.into())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/token", post(exchange_token))
        .route("/me", get(me))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            plex_user_id: "123".to_string(),
            plex_username: "tester".to_string(),
            plex_email: None,
            plex_token: "plex-token".to_string(),
            plex_thumb_url: None,
            created_at: Utc::now(),
            last_login: Utc::now(),
        }
    }

    #[test]
    fn test_token_round_trip() {
        let user = test_user();
        let token = issue_token("secret", 60, &user).unwrap();
        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.username, "tester");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let user = test_user();
        let token = issue_token("secret", 60, &user).unwrap();
        assert!(verify_token("other-secret", &token).is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let user = test_user();
        let token = issue_token("secret", -5, &user).unwrap();
        assert!(verify_token("secret", &token).is_err());
    }
}
