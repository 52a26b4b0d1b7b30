use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use wayfarer_core::{Actor, Role};

use crate::{error::AppError, state::AppState};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

/// The caller, taken from a valid `Authorization: Bearer` token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Actor);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::AuthenticationError("Missing or malformed bearer token".to_string()))?;

        let token_data = decode::<Claims>(
            bearer.token(),
            &DecodingKey::from_secret(state.auth.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| AppError::AuthenticationError("Invalid or expired token".to_string()))?;

        let role: Role = token_data
            .claims
            .role
            .parse()
            .map_err(|_| AppError::AuthenticationError("Unknown role in token".to_string()))?;

        Ok(AuthUser(Actor::new(token_data.claims.sub, role)))
    }
}

/// Signs an HS256 token for `actor`. Tokens are normally minted by the
/// identity service; this is for tooling and tests.
pub fn issue_token(secret: &str, actor: &Actor, ttl: Duration) -> Result<String, AppError> {
    let claims = Claims {
        sub: actor.id.clone(),
        role: actor.role.to_string(),
        exp: (Utc::now() + ttl).timestamp() as usize,
    };

    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))
}
