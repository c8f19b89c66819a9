//! User account domain models.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::FoodPreference;

/// Represents a user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)] // Never serialize password hash to API responses
    pub password_hash: String,
    pub name: Option<String>,
    pub status: UserStatus,
    pub active: bool,
    pub disabled: bool,
    pub roles: BTreeSet<Role>,
    pub food_preferences: BTreeSet<FoodPreference>,
    pub login_count: i32,
    #[serde(skip_serializing)]
    pub expo_push_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Comma-joined role names, as embedded in access and refresh tokens.
    pub fn role_claim(&self) -> String {
        self.roles
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Active and not administratively disabled.
    pub fn is_enabled(&self) -> bool {
        self.active && !self.disabled
    }
}

/// Fields required to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub status: UserStatus,
}

/// Account lifecycle status.
///
/// Moves forward only: `Referral`/`Requested` → `Verified` → `Accepted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Referral,
    Requested,
    Verified,
    Accepted,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Referral => "REFERRAL",
            UserStatus::Requested => "REQUESTED",
            UserStatus::Verified => "VERIFIED",
            UserStatus::Accepted => "ACCEPTED",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            UserStatus::Referral | UserStatus::Requested => 0,
            UserStatus::Verified => 1,
            UserStatus::Accepted => 2,
        }
    }

    /// Returns the status after moving to `next`, refusing regressions.
    ///
    /// Moving sideways between the two entry states is also refused.
    pub fn advance_to(self, next: UserStatus) -> UserStatus {
        if next.rank() > self.rank() {
            next
        } else {
            self
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "REFERRAL" => Ok(UserStatus::Referral),
            "REQUESTED" => Ok(UserStatus::Requested),
            "VERIFIED" => Ok(UserStatus::Verified),
            "ACCEPTED" => Ok(UserStatus::Accepted),
            _ => Err(format!("Invalid user status: {}", s)),
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named role. `User` is granted to every account at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    User,
    Host,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Host => "Host",
            Role::Admin => "Admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "host" => Ok(Role::Host),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_roles(roles: &[Role]) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "abc1@pitt.edu".to_string(),
            password_hash: "hash".to_string(),
            name: None,
            status: UserStatus::Requested,
            active: true,
            disabled: false,
            roles: roles.iter().copied().collect(),
            food_preferences: BTreeSet::new(),
            login_count: 0,
            expo_push_token: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_moves_forward() {
        assert_eq!(
            UserStatus::Requested.advance_to(UserStatus::Accepted),
            UserStatus::Accepted
        );
        assert_eq!(
            UserStatus::Referral.advance_to(UserStatus::Verified),
            UserStatus::Verified
        );
        assert_eq!(
            UserStatus::Verified.advance_to(UserStatus::Accepted),
            UserStatus::Accepted
        );
    }

    #[test]
    fn test_status_never_regresses() {
        assert_eq!(
            UserStatus::Accepted.advance_to(UserStatus::Requested),
            UserStatus::Accepted
        );
        assert_eq!(
            UserStatus::Accepted.advance_to(UserStatus::Verified),
            UserStatus::Accepted
        );
        assert_eq!(
            UserStatus::Referral.advance_to(UserStatus::Requested),
            UserStatus::Referral
        );
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!(
            UserStatus::from_str("accepted").unwrap(),
            UserStatus::Accepted
        );
        assert!(UserStatus::from_str("pending").is_err());
    }

    #[test]
    fn test_role_claim_is_sorted_and_joined() {
        let user = user_with_roles(&[Role::Admin, Role::User]);
        assert_eq!(user.role_claim(), "User,Admin");
        assert!(user.has_role(Role::Admin));
        assert!(!user.has_role(Role::Host));
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!(Role::from_str("Host").unwrap(), Role::Host);
        assert_eq!(Role::from_str("ADMIN").unwrap(), Role::Admin);
        assert!(Role::from_str("root").is_err());
    }

    #[test]
    fn test_disabled_overrides_active() {
        let mut user = user_with_roles(&[Role::User]);
        assert!(user.is_enabled());
        user.disabled = true;
        assert!(!user.is_enabled());
    }
}
