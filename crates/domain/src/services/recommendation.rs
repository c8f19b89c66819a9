//! Event recommendation engine.
//!
//! Matches newly created events against the user population by food
//! preference, records the recommendation relationship, and queues a push
//! notification for users with a registered device.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::notification::PushMessage;
use super::outbox::{OutboundMessage, Outbox};
use crate::errors::{AccountError, RecommendationError};
use crate::models::{Event, NewEvent, Role, User};
use crate::store::{Store, StoreTx};

/// True when the user is active, enabled, and every one of their food
/// preferences is offered by the event.
///
/// A user with no declared preferences matches every event.
pub fn should_recommend(user: &User, event: &Event) -> bool {
    user.is_enabled() && user.food_preferences.is_subset(&event.food_preferences)
}

/// Tuning for a recommendation run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecommendOptions {
    /// Average probability that a notified user accepts. When set, the run
    /// stops after `floor(servings / avg_acceptance)` users with a push token.
    pub avg_acceptance: Option<f64>,
    /// Shuffle seed for capacity mode. Without one the order comes from entropy.
    pub seed: Option<u64>,
}

impl RecommendOptions {
    /// Fills unset fields from `defaults`.
    pub fn or(self, defaults: RecommendOptions) -> Self {
        Self {
            avg_acceptance: self.avg_acceptance.or(defaults.avg_acceptance),
            seed: self.seed.or(defaults.seed),
        }
    }
}

/// What a recommendation run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationReport {
    pub event_id: Uuid,
    /// Users holding a recommendation for the event after this run, in visit order.
    pub recommended: Vec<Uuid>,
    pub newly_added: usize,
    pub pushes: usize,
}

/// Users to notify for an event given an average acceptance probability.
pub fn capacity_for(servings: i32, avg_acceptance: f64) -> Result<usize, RecommendationError> {
    if !(avg_acceptance > 0.0 && avg_acceptance <= 1.0) {
        return Err(RecommendationError::InvalidAcceptanceProbability(avg_acceptance));
    }
    Ok((f64::from(servings.max(0)) / avg_acceptance).floor() as usize)
}

fn validate_event(event: &NewEvent) -> Result<(), RecommendationError> {
    if event.title.trim().is_empty() {
        return Err(RecommendationError::InvalidEvent("title is required".into()));
    }
    if event.location.trim().is_empty() {
        return Err(RecommendationError::InvalidEvent("location is required".into()));
    }
    if event.servings < 0 {
        return Err(RecommendationError::InvalidEvent(
            "servings must not be negative".into(),
        ));
    }
    if event.end_date < event.start_date {
        return Err(RecommendationError::InvalidEvent(
            "end date precedes start date".into(),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct RecommendationService {
    store: Arc<dyn Store>,
    outbox: Outbox,
    defaults: RecommendOptions,
}

impl RecommendationService {
    pub fn new(store: Arc<dyn Store>, outbox: Outbox, defaults: RecommendOptions) -> Self {
        Self {
            store,
            outbox,
            defaults,
        }
    }

    /// Creates an event for a host and recommends it in the same transaction.
    pub async fn create_event(
        &self,
        host_id: Uuid,
        new_event: NewEvent,
        options: RecommendOptions,
    ) -> Result<(Event, RecommendationReport), RecommendationError> {
        validate_event(&new_event)?;

        let mut tx = self.store.begin().await?;
        match tx.get_user(host_id).await? {
            Some(host) if host.has_role(Role::Host) => {}
            Some(_) => return Err(AccountError::HostPermission.into()),
            None => return Err(AccountError::MissingUser(host_id).into()),
        }

        let event = tx.insert_event(host_id, new_event).await?;
        let (report, pushes) = self.recommend_in(tx.as_mut(), &event, options).await?;
        tx.commit().await?;

        info!(
            event_id = %event.id,
            host_id = %host_id,
            recommended = report.recommended.len(),
            "Event created"
        );
        self.dispatch(pushes);
        Ok((event, report))
    }

    /// Recommends an existing event. Safe to repeat: existing rows are kept
    /// and their users are not notified again.
    pub async fn recommend(
        &self,
        event_id: Uuid,
        options: RecommendOptions,
    ) -> Result<RecommendationReport, RecommendationError> {
        let mut tx = self.store.begin().await?;
        let event = tx
            .get_event(event_id)
            .await?
            .ok_or(RecommendationError::MissingEvent(event_id))?;

        let (report, pushes) = self.recommend_in(tx.as_mut(), &event, options).await?;
        tx.commit().await?;

        self.dispatch(pushes);
        Ok(report)
    }

    async fn recommend_in(
        &self,
        tx: &mut dyn StoreTx,
        event: &Event,
        options: RecommendOptions,
    ) -> Result<(RecommendationReport, Vec<PushMessage>), RecommendationError> {
        let options = options.or(self.defaults);
        let capacity = options
            .avg_acceptance
            .map(|p| capacity_for(event.servings, p))
            .transpose()?;

        let mut eligible: Vec<User> = tx
            .list_users()
            .await?
            .into_iter()
            .filter(|user| should_recommend(user, event))
            .collect();

        if capacity.is_some() {
            let mut rng = match options.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            eligible.shuffle(&mut rng);
        }

        let mut report = RecommendationReport {
            event_id: event.id,
            recommended: Vec::new(),
            newly_added: 0,
            pushes: 0,
        };
        let mut pushes = Vec::new();
        let mut reachable = 0usize;

        for user in eligible {
            if capacity.is_some_and(|cap| reachable >= cap) {
                break;
            }

            let added = tx.insert_recommendation(event.id, user.id).await?;
            report.recommended.push(user.id);
            if added {
                report.newly_added += 1;
            }

            if let Some(token) = user.expo_push_token {
                reachable += 1;
                if added {
                    pushes.push(PushMessage::event_recommended(token, event.id, &event.title));
                }
            }
        }

        report.pushes = pushes.len();
        counter!("recommendations_created_total").increment(report.newly_added as u64);
        debug!(
            event_id = %event.id,
            capacity = ?capacity,
            recommended = report.recommended.len(),
            newly_added = report.newly_added,
            "Recommendation run finished"
        );
        Ok((report, pushes))
    }

    fn dispatch(&self, pushes: Vec<PushMessage>) {
        for push in pushes {
            self.outbox.enqueue(OutboundMessage::Push(push));
        }
    }

    /// Records that the user accepted the event. Returns `false` if already accepted.
    pub async fn accept_event(
        &self,
        user_id: Uuid,
        event_id: Uuid,
    ) -> Result<bool, RecommendationError> {
        let mut tx = self.store.begin().await?;
        if tx.get_user(user_id).await?.is_none() {
            return Err(AccountError::MissingUser(user_id).into());
        }
        if tx.get_event(event_id).await?.is_none() {
            return Err(RecommendationError::MissingEvent(event_id));
        }

        let added = tx.insert_acceptance(event_id, user_id).await?;
        tx.commit().await?;
        Ok(added)
    }

    pub async fn event(&self, event_id: Uuid) -> Result<Event, RecommendationError> {
        let mut tx = self.store.begin().await?;
        tx.get_event(event_id)
            .await?
            .ok_or(RecommendationError::MissingEvent(event_id))
    }

    /// Every event, newest first.
    pub async fn events(&self, limit: Option<usize>) -> Result<Vec<Event>, RecommendationError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_events(limit).await?)
    }

    /// Recommended events the user has neither accepted nor outlived, by start date.
    pub async fn valid_recommendations(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, RecommendationError> {
        let mut tx = self.store.begin().await?;
        let accepted: HashSet<Uuid> = tx
            .list_accepted_event_ids(user_id)
            .await?
            .into_iter()
            .collect();

        let mut events: Vec<Event> = tx
            .list_recommended_events(user_id)
            .await?
            .into_iter()
            .filter(|event| !accepted.contains(&event.id) && !event.has_ended(now))
            .collect();
        events.sort_by_key(|event| event.start_date);
        Ok(events)
    }
}
