//! Referral decisions by the referring user.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use domain::models::{Referral, ReferralStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferralQuery {
    pub status: Option<ReferralStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveReferralBody {
    pub approve: bool,
}

/// GET /api/v1/referrals?status=pending
pub async fn list(
    State(state): State<AppState>,
    auth: UserAuth,
    Query(query): Query<ReferralQuery>,
) -> Result<Json<Vec<Referral>>, ApiError> {
    let referrals = state
        .admin
        .referrals_for(auth.user_id, query.status)
        .await?;
    Ok(Json(referrals))
}

/// POST /api/v1/referrals/:requester_id
pub async fn resolve(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(requester_id): Path<Uuid>,
    Json(body): Json<ResolveReferralBody>,
) -> Result<Json<Referral>, ApiError> {
    let referral = state
        .admin
        .resolve_referral(auth.user_id, requester_id, body.approve)
        .await?;
    Ok(Json(referral))
}
