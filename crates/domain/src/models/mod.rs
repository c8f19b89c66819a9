//! Domain models for the food-sharing backend.

pub mod event;
pub mod host_request;
pub mod referral;
pub mod user;
pub mod verification;

pub use event::{Event, FoodPreference, NewEvent};
pub use host_request::{HostRequest, PrimaryAffiliation, PRIMARY_AFFILIATIONS};
pub use referral::{Referral, ReferralStatus};
pub use user::{NewUser, Role, User, UserStatus};
pub use verification::VerificationCode;
