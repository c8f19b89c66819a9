//! In-process [`Store`] used by tests and the `memory` storage backend.
//!
//! A transaction holds the store's owned mutex guard for its whole lifetime
//! and works on a private copy of the state, written back only on commit.
//! Transactions are therefore fully serialized.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, StoreTx};
use crate::errors::StoreError;
use crate::models::{
    Event, FoodPreference, HostRequest, NewEvent, NewUser, Referral, ReferralStatus, Role, User,
    UserStatus, VerificationCode,
};

#[derive(Debug, Clone, Default)]
struct State {
    users: HashMap<Uuid, User>,
    user_order: Vec<Uuid>,
    verifications: HashMap<String, VerificationCode>,
    properties: HashMap<String, String>,
    host_requests: HashMap<Uuid, HostRequest>,
    referrals: HashMap<Uuid, Referral>,
    events: HashMap<Uuid, Event>,
    event_order: Vec<Uuid>,
    // (event_id, user_id)
    recommendations: BTreeSet<(Uuid, Uuid)>,
    acceptances: BTreeSet<(Uuid, Uuid)>,
}

/// Memory-backed store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with properties.
    pub fn with_properties<'a>(properties: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let state = State {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
}

impl MemoryTx {
    fn user_mut(&mut self, id: Uuid) -> Result<&mut User, StoreError> {
        self.working
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn get_user(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn get_user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn insert_user(&mut self, new_user: NewUser) -> Result<User, StoreError> {
        if self.working.users.values().any(|u| u.email == new_user.email) {
            return Err(StoreError::Conflict(format!("email {}", new_user.email)));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            password_hash: new_user.password_hash,
            name: new_user.name,
            status: new_user.status,
            active: false,
            disabled: false,
            roles: BTreeSet::from([Role::User]),
            food_preferences: BTreeSet::new(),
            login_count: 0,
            expo_push_token: None,
            created_at: now,
            updated_at: now,
        };

        self.working.user_order.push(user.id);
        self.working.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
        let stored = self.user_mut(user.id)?;
        let roles = std::mem::take(&mut stored.roles);
        let food_preferences = std::mem::take(&mut stored.food_preferences);

        *stored = User {
            roles,
            food_preferences,
            updated_at: Utc::now(),
            ..user.clone()
        };
        Ok(())
    }

    async fn set_user_roles(
        &mut self,
        user_id: Uuid,
        roles: &BTreeSet<Role>,
    ) -> Result<(), StoreError> {
        self.user_mut(user_id)?.roles = roles.clone();
        Ok(())
    }

    async fn set_user_food_preferences(
        &mut self,
        user_id: Uuid,
        preferences: &BTreeSet<FoodPreference>,
    ) -> Result<(), StoreError> {
        self.user_mut(user_id)?.food_preferences = preferences.clone();
        Ok(())
    }

    async fn list_users(&mut self) -> Result<Vec<User>, StoreError> {
        Ok(self
            .working
            .user_order
            .iter()
            .filter_map(|id| self.working.users.get(id).cloned())
            .collect())
    }

    async fn list_pending_users(&mut self, limit: usize) -> Result<Vec<User>, StoreError> {
        let holders: BTreeSet<Uuid> = self
            .working
            .verifications
            .values()
            .map(|v| v.user_id)
            .collect();

        Ok(self
            .working
            .user_order
            .iter()
            .filter_map(|id| self.working.users.get(id))
            .filter(|u| !u.active && !u.disabled && u.status != UserStatus::Referral)
            .filter(|u| !holders.contains(&u.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_verification_for_user(
        &mut self,
        user_id: Uuid,
    ) -> Result<Option<VerificationCode>, StoreError> {
        Ok(self
            .working
            .verifications
            .values()
            .find(|v| v.user_id == user_id)
            .cloned())
    }

    async fn insert_verification(&mut self, code: &VerificationCode) -> Result<bool, StoreError> {
        let taken = self.working.verifications.contains_key(&code.code)
            || self
                .working
                .verifications
                .values()
                .any(|v| v.user_id == code.user_id);
        if taken {
            return Ok(false);
        }
        self.working
            .verifications
            .insert(code.code.clone(), code.clone());
        Ok(true)
    }

    async fn take_verification(&mut self, code: &str, user_id: Uuid) -> Result<bool, StoreError> {
        match self.working.verifications.get(code) {
            Some(v) if v.user_id == user_id => {
                self.working.verifications.remove(code);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_verification_for_user(&mut self, user_id: Uuid) -> Result<(), StoreError> {
        self.working
            .verifications
            .retain(|_, v| v.user_id != user_id);
        Ok(())
    }

    async fn get_property(&mut self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.working.properties.get(name).cloned())
    }

    async fn set_property(&mut self, name: &str, value: &str) -> Result<(), StoreError> {
        self.working
            .properties
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn decrement_property_if_positive(
        &mut self,
        name: &str,
    ) -> Result<Option<i64>, StoreError> {
        let Some(value) = self.working.properties.get_mut(name) else {
            return Ok(None);
        };
        match value.trim().parse::<i64>() {
            Ok(current) if current > 0 => {
                *value = (current - 1).to_string();
                Ok(Some(current - 1))
            }
            _ => Ok(None),
        }
    }

    async fn increment_property(&mut self, name: &str, by: i64) -> Result<i64, StoreError> {
        let value = self
            .working
            .properties
            .entry(name.to_string())
            .or_default();
        let next = value.trim().parse::<i64>().unwrap_or(0) + by;
        *value = next.to_string();
        Ok(next)
    }

    async fn insert_host_request(&mut self, request: &HostRequest) -> Result<(), StoreError> {
        if self.working.host_requests.contains_key(&request.user_id) {
            return Err(StoreError::Conflict(format!(
                "host request for {}",
                request.user_id
            )));
        }
        self.working
            .host_requests
            .insert(request.user_id, request.clone());
        Ok(())
    }

    async fn get_host_request(
        &mut self,
        user_id: Uuid,
    ) -> Result<Option<HostRequest>, StoreError> {
        Ok(self.working.host_requests.get(&user_id).cloned())
    }

    async fn update_host_request(&mut self, request: &HostRequest) -> Result<(), StoreError> {
        match self.working.host_requests.get_mut(&request.user_id) {
            Some(stored) => {
                *stored = request.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "host request for {}",
                request.user_id
            ))),
        }
    }

    async fn list_pending_host_requests(&mut self) -> Result<Vec<HostRequest>, StoreError> {
        let mut pending: Vec<HostRequest> = self
            .working
            .host_requests
            .values()
            .filter(|r| r.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }

    async fn insert_referral(&mut self, referral: &Referral) -> Result<(), StoreError> {
        if self.working.referrals.contains_key(&referral.requester_id) {
            return Err(StoreError::Conflict(format!(
                "referral for {}",
                referral.requester_id
            )));
        }
        self.working
            .referrals
            .insert(referral.requester_id, referral.clone());
        Ok(())
    }

    async fn get_referral(&mut self, requester_id: Uuid) -> Result<Option<Referral>, StoreError> {
        Ok(self.working.referrals.get(&requester_id).cloned())
    }

    async fn update_referral(&mut self, referral: &Referral) -> Result<(), StoreError> {
        match self.working.referrals.get_mut(&referral.requester_id) {
            Some(stored) => {
                *stored = referral.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "referral for {}",
                referral.requester_id
            ))),
        }
    }

    async fn list_referrals(
        &mut self,
        reference_id: Uuid,
        status: Option<ReferralStatus>,
    ) -> Result<Vec<Referral>, StoreError> {
        let mut referrals: Vec<Referral> = self
            .working
            .referrals
            .values()
            .filter(|r| r.reference_id == reference_id)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        referrals.sort_by_key(|r| r.created_at);
        Ok(referrals)
    }

    async fn insert_event(&mut self, host_id: Uuid, event: NewEvent) -> Result<Event, StoreError> {
        let event = Event {
            id: Uuid::new_v4(),
            host_id,
            title: event.title,
            details: event.details,
            location: event.location,
            servings: event.servings,
            start_date: event.start_date,
            end_date: event.end_date,
            food_preferences: event.food_preferences,
            created_at: Utc::now(),
        };
        self.working.event_order.push(event.id);
        self.working.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn get_event(&mut self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.working.events.get(&id).cloned())
    }

    async fn list_events(&mut self, limit: Option<usize>) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .working
            .event_order
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .filter_map(|id| self.working.events.get(id).cloned())
            .collect())
    }

    async fn insert_recommendation(
        &mut self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, StoreError> {
        Ok(self.working.recommendations.insert((event_id, user_id)))
    }

    async fn list_recommended_user_ids(
        &mut self,
        event_id: Uuid,
    ) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .working
            .recommendations
            .iter()
            .filter(|(e, _)| *e == event_id)
            .map(|(_, u)| *u)
            .collect())
    }

    async fn list_recommended_events(&mut self, user_id: Uuid) -> Result<Vec<Event>, StoreError> {
        let mut events: Vec<Event> = self
            .working
            .recommendations
            .iter()
            .filter(|(_, u)| *u == user_id)
            .filter_map(|(e, _)| self.working.events.get(e).cloned())
            .collect();
        events.sort_by_key(|e| e.start_date);
        Ok(events)
    }

    async fn insert_acceptance(
        &mut self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, StoreError> {
        Ok(self.working.acceptances.insert((event_id, user_id)))
    }

    async fn list_accepted_event_ids(&mut self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .working
            .acceptances
            .iter()
            .filter(|(_, u)| *u == user_id)
            .map(|(e, _)| *e)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            name: None,
            status: UserStatus::Requested,
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(new_user("a@pitt.edu")).await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_user_by_email("a@pitt.edu").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_committed_writes_are_visible() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        let user = tx.insert_user(new_user("a@pitt.edu")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let loaded = tx.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(loaded.email, "a@pitt.edu");
        assert!(loaded.has_role(Role::User));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_user(new_user("a@pitt.edu")).await.unwrap();

        let result = tx.insert_user(new_user("a@pitt.edu")).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        // Exact match only.
        assert!(tx.insert_user(new_user("A@pitt.edu")).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_user_keeps_roles() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut user = tx.insert_user(new_user("a@pitt.edu")).await.unwrap();
        tx.set_user_roles(user.id, &BTreeSet::from([Role::User, Role::Admin]))
            .await
            .unwrap();

        user.login_count = 3;
        user.roles.clear();
        tx.update_user(&user).await.unwrap();

        let loaded = tx.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(loaded.login_count, 3);
        assert!(loaded.has_role(Role::Admin));
    }

    #[tokio::test]
    async fn test_decrement_property_if_positive() {
        let store = MemoryStore::with_properties([("limit", "1"), ("broken", "abc")]);
        let mut tx = store.begin().await.unwrap();

        assert_eq!(tx.decrement_property_if_positive("limit").await.unwrap(), Some(0));
        assert_eq!(tx.decrement_property_if_positive("limit").await.unwrap(), None);
        assert_eq!(tx.get_property("limit").await.unwrap().as_deref(), Some("0"));
        assert_eq!(tx.decrement_property_if_positive("broken").await.unwrap(), None);
        assert_eq!(tx.decrement_property_if_positive("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_property() {
        let store = MemoryStore::with_properties([("limit", "0"), ("broken", "abc")]);
        let mut tx = store.begin().await.unwrap();

        assert_eq!(tx.increment_property("limit", 2).await.unwrap(), 2);
        assert_eq!(tx.increment_property("broken", 1).await.unwrap(), 1);
        assert_eq!(tx.increment_property("missing", 1).await.unwrap(), 1);
        assert_eq!(tx.get_property("missing").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_verification_rows_are_unique() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let a = tx.insert_user(new_user("a@pitt.edu")).await.unwrap();
        let b = tx.insert_user(new_user("b@pitt.edu")).await.unwrap();

        assert!(tx
            .insert_verification(&VerificationCode::new("AAAAAA".into(), a.id))
            .await
            .unwrap());
        // Same code for someone else.
        assert!(!tx
            .insert_verification(&VerificationCode::new("AAAAAA".into(), b.id))
            .await
            .unwrap());
        // Second code for the same user.
        assert!(!tx
            .insert_verification(&VerificationCode::new("BBBBBB".into(), a.id))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_take_verification_requires_owner() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let a = tx.insert_user(new_user("a@pitt.edu")).await.unwrap();
        let b = tx.insert_user(new_user("b@pitt.edu")).await.unwrap();
        tx.insert_verification(&VerificationCode::new("AAAAAA".into(), a.id))
            .await
            .unwrap();

        assert!(!tx.take_verification("AAAAAA", b.id).await.unwrap());
        assert!(tx.take_verification("AAAAAA", a.id).await.unwrap());
        assert!(!tx.take_verification("AAAAAA", a.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_pending_users_is_fifo_and_skips_code_holders() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let a = tx.insert_user(new_user("a@pitt.edu")).await.unwrap();
        let b = tx.insert_user(new_user("b@pitt.edu")).await.unwrap();
        let c = tx.insert_user(new_user("c@pitt.edu")).await.unwrap();
        let d = tx.insert_user(new_user("d@pitt.edu")).await.unwrap();

        tx.insert_verification(&VerificationCode::new("AAAAAA".into(), a.id))
            .await
            .unwrap();
        let mut active = c.clone();
        active.active = true;
        tx.update_user(&active).await.unwrap();

        let pending: Vec<Uuid> = tx
            .list_pending_users(10)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(pending, vec![b.id, d.id]);
        assert_eq!(tx.list_pending_users(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recommendations_are_idempotent() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let (event, user) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(tx.insert_recommendation(event, user).await.unwrap());
        assert!(!tx.insert_recommendation(event, user).await.unwrap());
        assert_eq!(tx.list_recommended_user_ids(event).await.unwrap(), vec![user]);
    }

    #[tokio::test]
    async fn test_list_events_newest_first() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let host = Uuid::new_v4();
        let mut ids = Vec::new();
        for title in ["breakfast", "lunch", "dinner"] {
            let start = Utc::now();
            let event = tx
                .insert_event(
                    host,
                    NewEvent {
                        title: title.to_string(),
                        details: None,
                        location: "Cathedral".to_string(),
                        servings: 10,
                        start_date: start,
                        end_date: start + chrono::Duration::hours(1),
                        food_preferences: BTreeSet::new(),
                    },
                )
                .await
                .unwrap();
            ids.push(event.id);
        }

        let listed: Vec<Uuid> = tx
            .list_events(None)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);

        let newest = tx.list_events(Some(1)).await.unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].title, "dinner");
    }
}
