//! Domain error types.

use shared::jwt::JwtError;
use shared::password::PasswordError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Role;

/// Failure reported by a [`crate::store::Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection, query or serialization failure in the backing store.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Token issuance and verification failures.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Jwt(#[from] JwtError),

    #[error("User {0} does not exist")]
    MissingUser(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TokenError {
    /// Expected verification failures that `validate_token` reports as `false`.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TokenError::Jwt(JwtError::ExpiredSignature) | TokenError::Jwt(JwtError::Decode(_))
        )
    }
}

/// Account lifecycle failures.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("An account already exists for {0}")]
    DuplicateEmail(String),

    #[error("Incorrect email or password")]
    InvalidCredentials,

    #[error("Account is already active")]
    AlreadyActive,

    #[error("Invalid verification code")]
    InvalidVerificationCode,

    #[error("Unknown primary affiliation: {0}")]
    InvalidAffiliation(i32),

    #[error("Admin role required")]
    AdminPermission,

    #[error("Host role required")]
    HostPermission,

    #[error("User {0} does not exist")]
    MissingUser(Uuid),

    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("Password does not meet requirements: {0}")]
    WeakPassword(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid notification: {0}")]
    InvalidNotification(String),

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Account activation required")]
    ActivationRequired,

    #[error("Referral not found")]
    ReferralNotFound,

    #[error("Host request not found")]
    HostRequestNotFound,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AccountError {
    pub fn permission_for(role: Role) -> Self {
        match role {
            Role::Host => AccountError::HostPermission,
            _ => AccountError::AdminPermission,
        }
    }
}

/// Recommendation engine failures.
#[derive(Debug, Error)]
pub enum RecommendationError {
    #[error("Event {0} does not exist")]
    MissingEvent(Uuid),

    #[error("Average acceptance probability must be in (0, 1], got {0}")]
    InvalidAcceptanceProbability(f64),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
