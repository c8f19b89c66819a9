//! Token refresh and validation.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBody {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ValidateBody {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
}

/// POST /api/v1/token
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<RefreshResponse>, ApiError> {
    body.validate()?;

    let (_, access_token) = state.tokens.refresh_access_token(&body.refresh_token).await?;

    Ok(Json(RefreshResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.tokens.settings().access_ttl.num_seconds(),
    }))
}

/// POST /api/v1/token/validate
///
/// Accepts any token kind; answers `{"valid": false}` rather than an error
/// for expired, forged or unknown tokens.
pub async fn validate(
    State(state): State<AppState>,
    Json(body): Json<ValidateBody>,
) -> Result<Json<ValidateResponse>, ApiError> {
    body.validate()?;

    let valid = state.tokens.validate_token(&body.token).await?;
    Ok(Json(ValidateResponse { valid }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_body_camel_case() {
        let body: RefreshBody = serde_json::from_str(r#"{"refreshToken":"abc"}"#).unwrap();
        assert_eq!(body.refresh_token, "abc");
    }

    #[test]
    fn test_empty_token_rejected() {
        let body = ValidateBody {
            token: String::new(),
        };
        assert!(body.validate().is_err());
    }
}
