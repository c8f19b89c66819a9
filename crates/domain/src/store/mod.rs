//! Transactional storage ports.
//!
//! Every logical operation runs inside one [`StoreTx`]: begin, run the body,
//! commit. Dropping a transaction without committing rolls it back, so an
//! early `?` return leaves no partial writes behind.

mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{
    Event, FoodPreference, HostRequest, NewEvent, NewUser, Referral, ReferralStatus, Role, User,
    VerificationCode,
};

pub use memory::MemoryStore;

/// Entry point to a transactional store.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Opens a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// Unit of work against the store.
#[async_trait]
pub trait StoreTx: Send {
    /// Makes every write in this transaction durable.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    // Users

    async fn get_user(&mut self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Exact, case-sensitive match.
    async fn get_user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError>;

    /// Creates a user holding only the `User` role.
    ///
    /// Fails with [`StoreError::Conflict`] if the email is taken.
    async fn insert_user(&mut self, user: NewUser) -> Result<User, StoreError>;

    /// Persists scalar fields of a mutated user (everything except roles
    /// and food preferences).
    async fn update_user(&mut self, user: &User) -> Result<(), StoreError>;

    async fn set_user_roles(
        &mut self,
        user_id: Uuid,
        roles: &BTreeSet<Role>,
    ) -> Result<(), StoreError>;

    async fn set_user_food_preferences(
        &mut self,
        user_id: Uuid,
        preferences: &BTreeSet<FoodPreference>,
    ) -> Result<(), StoreError>;

    /// Every user, in creation order.
    async fn list_users(&mut self) -> Result<Vec<User>, StoreError>;

    /// Oldest inactive, non-disabled users that hold no live verification code
    /// and are not waiting on a referral decision.
    async fn list_pending_users(&mut self, limit: usize) -> Result<Vec<User>, StoreError>;

    // Verification codes

    async fn get_verification_for_user(
        &mut self,
        user_id: Uuid,
    ) -> Result<Option<VerificationCode>, StoreError>;

    /// Returns `false` without writing if the code or the user already has a row.
    async fn insert_verification(&mut self, code: &VerificationCode) -> Result<bool, StoreError>;

    /// Deletes the code if it belongs to `user_id`. Returns whether a row went away.
    async fn take_verification(&mut self, code: &str, user_id: Uuid) -> Result<bool, StoreError>;

    /// Withdraws the user's live code, if any.
    async fn delete_verification_for_user(&mut self, user_id: Uuid) -> Result<(), StoreError>;

    // Properties

    async fn get_property(&mut self, name: &str) -> Result<Option<String>, StoreError>;

    async fn set_property(&mut self, name: &str, value: &str) -> Result<(), StoreError>;

    /// Atomically decrements a numeric property if it is above zero.
    ///
    /// Returns the new value, or `None` when the property is missing,
    /// non-numeric or already at zero (nothing is written in that case).
    async fn decrement_property_if_positive(&mut self, name: &str)
        -> Result<Option<i64>, StoreError>;

    /// Atomically adds `by` to a numeric property and returns the new value.
    ///
    /// A missing or non-numeric property counts as zero.
    async fn increment_property(&mut self, name: &str, by: i64) -> Result<i64, StoreError>;

    // Host requests

    async fn insert_host_request(&mut self, request: &HostRequest) -> Result<(), StoreError>;

    async fn get_host_request(&mut self, user_id: Uuid)
        -> Result<Option<HostRequest>, StoreError>;

    async fn update_host_request(&mut self, request: &HostRequest) -> Result<(), StoreError>;

    async fn list_pending_host_requests(&mut self) -> Result<Vec<HostRequest>, StoreError>;

    // Referrals

    async fn insert_referral(&mut self, referral: &Referral) -> Result<(), StoreError>;

    async fn get_referral(&mut self, requester_id: Uuid) -> Result<Option<Referral>, StoreError>;

    async fn update_referral(&mut self, referral: &Referral) -> Result<(), StoreError>;

    async fn list_referrals(
        &mut self,
        reference_id: Uuid,
        status: Option<ReferralStatus>,
    ) -> Result<Vec<Referral>, StoreError>;

    // Events

    async fn insert_event(&mut self, host_id: Uuid, event: NewEvent) -> Result<Event, StoreError>;

    async fn get_event(&mut self, id: Uuid) -> Result<Option<Event>, StoreError>;

    /// Events newest first, at most `limit` of them when given.
    async fn list_events(&mut self, limit: Option<usize>) -> Result<Vec<Event>, StoreError>;

    /// Idempotent. Returns `true` only when a new row was added.
    async fn insert_recommendation(
        &mut self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, StoreError>;

    async fn list_recommended_user_ids(&mut self, event_id: Uuid)
        -> Result<Vec<Uuid>, StoreError>;

    async fn list_recommended_events(&mut self, user_id: Uuid) -> Result<Vec<Event>, StoreError>;

    /// Idempotent. Returns `true` only when a new row was added.
    async fn insert_acceptance(&mut self, event_id: Uuid, user_id: Uuid)
        -> Result<bool, StoreError>;

    async fn list_accepted_event_ids(&mut self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError>;
}
