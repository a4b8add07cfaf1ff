use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::UserProfile;

/// Hex SHA-256 of an API key; only this digest is stored.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// A fresh random key with a recognizable prefix.
pub fn generate_api_key() -> String {
    format!("pe_{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// The authenticated caller, resolved from `Authorization: Bearer <key>`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserProfile);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

        let user = state
            .store
            .find_user_by_api_key(&hash_api_key(token))
            .await?
            .ok_or_else(|| AppError::Unauthorized("Unknown API key".to_string()))?;

        Ok(AuthUser(user))
    }
}
