//! Event entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::errors::StoreError;
use domain::models::{Event, FoodPreference};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the events table with its food preference ids.
#[derive(Debug, Clone, FromRow)]
pub struct EventEntity {
    pub id: Uuid,
    pub host_id: Uuid,
    pub title: String,
    pub details: Option<String>,
    pub location: String,
    pub servings: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub food_preferences: Vec<i32>,
}

impl TryFrom<EventEntity> for Event {
    type Error = StoreError;

    fn try_from(entity: EventEntity) -> Result<Self, Self::Error> {
        let food_preferences = entity
            .food_preferences
            .iter()
            .map(|id| {
                FoodPreference::from_id(*id)
                    .ok_or_else(|| StoreError::Backend(format!("Unknown food preference id {}", id)))
            })
            .collect::<Result<_, _>>()?;

        Ok(Event {
            id: entity.id,
            host_id: entity.host_id,
            title: entity.title,
            details: entity.details,
            location: entity.location,
            servings: entity.servings,
            start_date: entity.start_date,
            end_date: entity.end_date,
            food_preferences,
            created_at: entity.created_at,
        })
    }
}
