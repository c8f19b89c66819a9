//! Food event routes.

use std::collections::BTreeSet;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use domain::models::{Event, FoodPreference, NewEvent};
use domain::services::{RecommendOptions, RecommendationReport};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventBody {
    #[validate(length(min = 1, max = 255, message = "Title must be 1-255 characters"))]
    pub title: String,

    #[validate(length(max = 2000, message = "Details must be at most 2000 characters"))]
    pub details: Option<String>,

    #[validate(length(min = 1, max = 255, message = "Location must be 1-255 characters"))]
    pub location: String,

    #[validate(range(min = 0, message = "Servings cannot be negative"))]
    pub servings: i32,

    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,

    #[serde(default)]
    pub food_preferences: Vec<FoodPreference>,

    /// Enables capacity-aware recommendation for this event.
    #[validate(range(exclusive_min = 0.0, max = 1.0, message = "Must be in (0, 1]"))]
    pub avg_acceptance: Option<f64>,

    /// Fixes the shuffle order in capacity mode.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateEventResponse {
    pub event: Event,
    pub recommendation: RecommendationReport,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventListQuery {
    /// Caps the listing to the newest `limit` events.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptResponse {
    /// `false` when the event had already been accepted.
    pub accepted: bool,
}

/// POST /api/v1/events
///
/// Requires the Host role. Recommends the event to matching users and
/// queues their pushes.
pub async fn create_event(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(body): Json<CreateEventBody>,
) -> Result<(StatusCode, Json<CreateEventResponse>), ApiError> {
    body.validate()?;

    let options = RecommendOptions {
        avg_acceptance: body.avg_acceptance,
        seed: body.seed,
    };
    let new_event = NewEvent {
        title: body.title,
        details: body.details,
        location: body.location,
        servings: body.servings,
        start_date: body.start_date,
        end_date: body.end_date,
        food_preferences: body.food_preferences.into_iter().collect::<BTreeSet<_>>(),
    };

    let (event, recommendation) = state
        .recommendations
        .create_event(auth.user_id, new_event, options)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateEventResponse {
            event,
            recommendation,
        }),
    ))
}

/// GET /api/v1/events
///
/// Newest first.
pub async fn list_events(
    State(state): State<AppState>,
    _auth: UserAuth,
    Query(query): Query<EventListQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    Ok(Json(state.recommendations.events(query.limit).await?))
}

/// GET /api/v1/events/:event_id
pub async fn get_event(
    State(state): State<AppState>,
    _auth: UserAuth,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Event>, ApiError> {
    Ok(Json(state.recommendations.event(event_id).await?))
}

/// GET /api/v1/events/recommended
pub async fn recommended(
    State(state): State<AppState>,
    auth: UserAuth,
) -> Result<Json<Vec<Event>>, ApiError> {
    let events = state
        .recommendations
        .valid_recommendations(auth.user_id, Utc::now())
        .await?;
    Ok(Json(events))
}

/// POST /api/v1/events/:event_id/accept
pub async fn accept(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(event_id): Path<Uuid>,
) -> Result<Json<AcceptResponse>, ApiError> {
    let accepted = state
        .recommendations
        .accept_event(auth.user_id, event_id)
        .await?;
    Ok(Json(AcceptResponse { accepted }))
}
