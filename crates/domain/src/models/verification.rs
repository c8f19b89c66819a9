//! Email verification code model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One-time code proving ownership of a user's email address.
///
/// `code` is unique across all users and each user holds at most one live code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationCode {
    pub code: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl VerificationCode {
    pub fn new(code: String, user_id: Uuid) -> Self {
        Self {
            code,
            user_id,
            created_at: Utc::now(),
        }
    }
}
