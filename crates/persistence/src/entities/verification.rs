//! Verification code entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::VerificationCode;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct VerificationCodeEntity {
    pub code: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<VerificationCodeEntity> for VerificationCode {
    fn from(entity: VerificationCodeEntity) -> Self {
        Self {
            code: entity.code,
            user_id: entity.user_id,
            created_at: entity.created_at,
        }
    }
}
