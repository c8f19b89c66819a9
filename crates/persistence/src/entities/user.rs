//! User entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::errors::StoreError;
use domain::models::{FoodPreference, Role, User, UserStatus};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the users table joined with its roles and
/// food preferences.
#[derive(Debug, Clone, FromRow)]
pub struct UserEntity {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub status: String,
    pub active: bool,
    pub disabled: bool,
    pub login_count: i32,
    pub expo_push_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub roles: Vec<String>,
    pub food_preferences: Vec<i32>,
}

impl TryFrom<UserEntity> for User {
    type Error = StoreError;

    fn try_from(entity: UserEntity) -> Result<Self, Self::Error> {
        let status = entity
            .status
            .parse::<UserStatus>()
            .map_err(StoreError::Backend)?;
        let roles = entity
            .roles
            .iter()
            .map(|r| r.parse::<Role>())
            .collect::<Result<_, _>>()
            .map_err(StoreError::Backend)?;
        let food_preferences = entity
            .food_preferences
            .iter()
            .map(|id| {
                FoodPreference::from_id(*id)
                    .ok_or_else(|| StoreError::Backend(format!("Unknown food preference id {}", id)))
            })
            .collect::<Result<_, _>>()?;

        Ok(User {
            id: entity.id,
            email: entity.email,
            password_hash: entity.password_hash,
            name: entity.name,
            status,
            active: entity.active,
            disabled: entity.disabled,
            roles,
            food_preferences,
            login_count: entity.login_count,
            expo_push_token: entity.expo_push_token,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }
}
