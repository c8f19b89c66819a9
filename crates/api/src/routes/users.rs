//! Routes acting on the authenticated user's own account.

use std::collections::BTreeSet;

use axum::{extract::State, http::StatusCode, Json};
use domain::errors::AccountError;
use domain::models::{FoodPreference, User};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerifyBody {
    #[validate(length(min = 1, max = 16, message = "Verification code is required"))]
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendResponse {
    /// `false` when no invitation is available yet; the user stays queued.
    pub verification_sent: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordBody {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

/// An absent or blank token unregisters the device.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PushTokenBody {
    #[validate(length(max = 255, message = "Push token must be at most 255 characters"))]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferencesBody {
    pub preferences: Vec<FoodPreference>,
}

/// GET /api/v1/users/me
pub async fn me(State(state): State<AppState>, auth: UserAuth) -> Result<Json<User>, ApiError> {
    Ok(Json(state.accounts.user(auth.user_id).await?))
}

/// POST /api/v1/users/verify
pub async fn verify(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(body): Json<VerifyBody>,
) -> Result<Json<User>, ApiError> {
    body.validate()?;

    if !state.accounts.verify_user(&body.code, auth.user_id).await? {
        return Err(AccountError::InvalidVerificationCode.into());
    }

    Ok(Json(state.accounts.user(auth.user_id).await?))
}

/// POST /api/v1/users/verify/resend
pub async fn resend_verification(
    State(state): State<AppState>,
    auth: UserAuth,
) -> Result<Json<ResendResponse>, ApiError> {
    let verification_sent = state.accounts.resend_verification(auth.user_id).await?;
    Ok(Json(ResendResponse { verification_sent }))
}

/// POST /api/v1/users/password
///
/// Outstanding refresh and reset tokens stop working once this succeeds.
pub async fn change_password(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(body): Json<ChangePasswordBody>,
) -> Result<StatusCode, ApiError> {
    body.validate()?;

    state
        .accounts
        .change_password(auth.user_id, &body.current_password, &body.new_password)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/users/me/push-token
pub async fn set_push_token(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(body): Json<PushTokenBody>,
) -> Result<StatusCode, ApiError> {
    body.validate()?;

    let registered = body.token.as_deref().is_some_and(|t| !t.trim().is_empty());
    state
        .accounts
        .set_push_token(auth.user_id, body.token)
        .await?;

    info!(user_id = %auth.user_id, registered, "Push token updated");
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/users/me/preferences
pub async fn set_preferences(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(body): Json<PreferencesBody>,
) -> Result<Json<User>, ApiError> {
    let preferences: BTreeSet<FoodPreference> = body.preferences.into_iter().collect();
    let user = state
        .accounts
        .set_food_preferences(auth.user_id, preferences)
        .await?;
    Ok(Json(user))
}
