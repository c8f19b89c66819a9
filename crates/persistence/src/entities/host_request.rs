//! Host request entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::HostRequest;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct HostRequestEntity {
    pub user_id: Uuid,
    pub primary_affiliation: i32,
    pub directory: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
}

impl From<HostRequestEntity> for HostRequest {
    fn from(entity: HostRequestEntity) -> Self {
        Self {
            user_id: entity.user_id,
            primary_affiliation: entity.primary_affiliation,
            directory: entity.directory,
            reason: entity.reason,
            created_at: entity.created_at,
            approved_at: entity.approved_at,
            approved_by: entity.approved_by,
        }
    }
}
