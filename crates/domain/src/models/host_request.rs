//! Host request and affiliation models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Organization a prospective host belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrimaryAffiliation {
    pub id: i32,
    pub name: &'static str,
}

/// Fixed reference list of accepted affiliations.
pub const PRIMARY_AFFILIATIONS: [PrimaryAffiliation; 4] = [
    PrimaryAffiliation {
        id: 1,
        name: "Kenneth P. Dietrich School of Arts and Sciences",
    },
    PrimaryAffiliation {
        id: 2,
        name: "School of Computing and Information",
    },
    PrimaryAffiliation {
        id: 3,
        name: "Swanson School of Engineering",
    },
    PrimaryAffiliation {
        id: 4,
        name: "Sodexo Dining Services",
    },
];

impl PrimaryAffiliation {
    pub fn by_id(id: i32) -> Option<PrimaryAffiliation> {
        PRIMARY_AFFILIATIONS.into_iter().find(|a| a.id == id)
    }
}

/// Pending or approved request for the `Host` role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRequest {
    pub user_id: Uuid,
    pub primary_affiliation: i32,
    pub directory: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
}

impl HostRequest {
    pub fn new(
        user_id: Uuid,
        primary_affiliation: i32,
        directory: String,
        reason: Option<String>,
    ) -> Self {
        Self {
            user_id,
            primary_affiliation,
            directory,
            reason,
            created_at: Utc::now(),
            approved_at: None,
            approved_by: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.approved_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affiliation_lookup() {
        assert_eq!(
            PrimaryAffiliation::by_id(2).map(|a| a.name),
            Some("School of Computing and Information")
        );
        assert!(PrimaryAffiliation::by_id(0).is_none());
        assert!(PrimaryAffiliation::by_id(5).is_none());
    }

    #[test]
    fn test_new_host_request_is_pending() {
        let request = HostRequest::new(Uuid::new_v4(), 3, "abc12".into(), None);
        assert!(request.is_pending());
    }
}
