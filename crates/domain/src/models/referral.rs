//! Referral model: a new user vouched for by an existing one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Approved,
    Denied,
}

impl ReferralStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralStatus::Pending => "pending",
            ReferralStatus::Approved => "approved",
            ReferralStatus::Denied => "denied",
        }
    }
}

impl FromStr for ReferralStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ReferralStatus::Pending),
            "approved" => Ok(ReferralStatus::Approved),
            "denied" => Ok(ReferralStatus::Denied),
            _ => Err(format!("Invalid referral status: {}", s)),
        }
    }
}

impl fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Referral of `requester_id` by `reference_id`. One per requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub requester_id: Uuid,
    pub reference_id: Uuid,
    pub status: ReferralStatus,
    pub created_at: DateTime<Utc>,
}

impl Referral {
    pub fn pending(requester_id: Uuid, reference_id: Uuid) -> Self {
        Self {
            requester_id,
            reference_id,
            status: ReferralStatus::Pending,
            created_at: Utc::now(),
        }
    }
}
