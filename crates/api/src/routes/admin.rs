//! Admin-only routes. Each handler's service call checks the stored
//! `Admin` role of the caller.

use axum::{
    extract::{Path, State},
    Json,
};
use domain::models::{HostRequest, User};
use domain::services::BroadcastReport;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdBody {
    pub threshold: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdResponse {
    pub threshold: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteResponse {
    pub invited: Vec<Uuid>,
    pub remaining_threshold: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GrantAdminBody {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastBody {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// GET /api/v1/admin/threshold
pub async fn get_threshold(
    State(state): State<AppState>,
    auth: UserAuth,
) -> Result<Json<ThresholdResponse>, ApiError> {
    let threshold = state.admin.threshold(auth.user_id).await?;
    Ok(Json(ThresholdResponse { threshold }))
}

/// PUT /api/v1/admin/threshold
pub async fn set_threshold(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(body): Json<ThresholdBody>,
) -> Result<Json<ThresholdResponse>, ApiError> {
    state.admin.set_threshold(auth.user_id, body.threshold).await?;
    Ok(Json(ThresholdResponse {
        threshold: i64::from(body.threshold),
    }))
}

/// POST /api/v1/admin/invite
///
/// Sends codes to the oldest waiting users, consuming the threshold.
pub async fn invite(
    State(state): State<AppState>,
    auth: UserAuth,
) -> Result<Json<InviteResponse>, ApiError> {
    let invited = state.admin.invite_next_users(auth.user_id).await?;
    let remaining_threshold = state.admission.threshold().await?;
    Ok(Json(InviteResponse {
        invited,
        remaining_threshold,
    }))
}

/// GET /api/v1/admin/host-requests
pub async fn host_requests(
    State(state): State<AppState>,
    auth: UserAuth,
) -> Result<Json<Vec<HostRequest>>, ApiError> {
    Ok(Json(state.admin.pending_host_requests(auth.user_id).await?))
}

/// POST /api/v1/admin/host-requests/:user_id/approve
pub async fn approve_host_request(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(user_id): Path<Uuid>,
) -> Result<Json<HostRequest>, ApiError> {
    let request = state
        .admin
        .approve_host_request(auth.user_id, user_id)
        .await?;
    Ok(Json(request))
}

/// POST /api/v1/admin/admins
pub async fn grant_admin(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(body): Json<GrantAdminBody>,
) -> Result<Json<User>, ApiError> {
    body.validate()?;
    Ok(Json(state.admin.grant_admin(auth.user_id, &body.email).await?))
}

/// POST /api/v1/admin/notifications
///
/// Pushes a message to every user with a registered device.
pub async fn broadcast(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(body): Json<BroadcastBody>,
) -> Result<Json<BroadcastReport>, ApiError> {
    let report = state
        .admin
        .broadcast(auth.user_id, &body.title, &body.body, body.data)
        .await?;
    Ok(Json(report))
}
