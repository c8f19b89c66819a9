//! Database entity definitions.
//!
//! Entities are row mappings; they convert into domain models and fail with
//! [`domain::errors::StoreError::Backend`] when a stored value is not one the
//! domain recognises.

pub mod event;
pub mod host_request;
pub mod referral;
pub mod user;
pub mod verification;

pub use event::EventEntity;
pub use host_request::HostRequestEntity;
pub use referral::ReferralEntity;
pub use user::UserEntity;
pub use verification::VerificationCodeEntity;
