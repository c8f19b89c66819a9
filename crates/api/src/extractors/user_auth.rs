//! Bearer access token extractor.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use shared::jwt::Claims;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;

/// Authenticated caller, decoded from an access token.
///
/// Only access tokens are accepted here; refresh and reset tokens fail with
/// `invalid_token_kind`. Role checks happen in the services against stored
/// roles, not against the `roles` claim.
#[derive(Debug, Clone)]
pub struct UserAuth {
    pub user_id: Uuid,
    pub claims: Claims,
}

/// Returns the token part of an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for UserAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

        let token = bearer_token(auth_header).ok_or_else(|| {
            ApiError::Unauthorized("Invalid Authorization header format".to_string())
        })?;

        let claims = state.tokens.decode_access_token(token, true)?;

        Ok(Self {
            user_id: claims.own,
            claims,
        })
    }
}
