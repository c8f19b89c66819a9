//! Referral entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::errors::StoreError;
use domain::models::{Referral, ReferralStatus};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct ReferralEntity {
    pub requester_id: Uuid,
    pub reference_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ReferralEntity> for Referral {
    type Error = StoreError;

    fn try_from(entity: ReferralEntity) -> Result<Self, Self::Error> {
        Ok(Referral {
            requester_id: entity.requester_id,
            reference_id: entity.reference_id,
            status: entity
                .status
                .parse::<ReferralStatus>()
                .map_err(StoreError::Backend)?,
            created_at: entity.created_at,
        })
    }
}
