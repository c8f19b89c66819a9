//! Threshold admission controller.
//!
//! A persisted integer property caps how many pending users may be sent a
//! verification email. Each email actually sent consumes one unit; the
//! decrement is a single conditional update so the value never drops below
//! zero, whatever the concurrency.

use std::sync::Arc;

use metrics::counter;
use shared::crypto::generate_verification_code;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::outbox::{OutboundMessage, Outbox};
use crate::errors::StoreError;
use crate::models::{User, VerificationCode};
use crate::store::{Store, StoreTx};

/// Property holding the threshold unless configured otherwise.
pub const DEFAULT_THRESHOLD_PROPERTY: &str = "invite_threshold";

const CODE_ATTEMPTS: usize = 8;

/// A verification code handed out by [`AdmissionController::admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IssuedCode {
    pub code: String,
    /// Created by this call rather than reused from an earlier email.
    pub fresh: bool,
}

/// Returns the user's live code, creating one if needed.
pub(crate) async fn get_or_create_code(
    tx: &mut dyn StoreTx,
    user_id: Uuid,
) -> Result<IssuedCode, StoreError> {
    if let Some(existing) = tx.get_verification_for_user(user_id).await? {
        return Ok(IssuedCode {
            code: existing.code,
            fresh: false,
        });
    }

    for _ in 0..CODE_ATTEMPTS {
        let code = VerificationCode::new(generate_verification_code(), user_id);
        if tx.insert_verification(&code).await? {
            return Ok(IssuedCode {
                code: code.code,
                fresh: true,
            });
        }
    }

    Err(StoreError::Conflict(format!(
        "could not allocate a verification code for {}",
        user_id
    )))
}

/// Gates verification emails behind the shared threshold.
#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn Store>,
    outbox: Outbox,
    property: String,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn Store>, outbox: Outbox, property: impl Into<String>) -> Self {
        Self {
            store,
            outbox,
            property: property.into(),
        }
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    /// Current threshold. Missing or non-numeric values read as zero.
    pub async fn threshold(&self) -> Result<i64, StoreError> {
        let mut tx = self.store.begin().await?;
        let value = tx.get_property(&self.property).await?;
        Ok(value
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
            .max(0))
    }

    pub async fn set_threshold(&self, value: u32) -> Result<(), StoreError> {
        let mut tx = self.store.begin().await?;
        tx.set_property(&self.property, &value.to_string()).await?;
        tx.commit().await?;
        info!(threshold = value, "Admission threshold set");
        Ok(())
    }

    /// Takes one unit of threshold inside the caller's transaction.
    ///
    /// Returns `false` without writing when the threshold is exhausted.
    pub async fn try_consume_one(&self, tx: &mut dyn StoreTx) -> Result<bool, StoreError> {
        match tx.decrement_property_if_positive(&self.property).await? {
            Some(remaining) => {
                counter!("admission_consumed_total").increment(1);
                tracing::debug!(remaining = remaining, "Admission threshold consumed");
                Ok(true)
            }
            None => {
                counter!("admission_exhausted_total").increment(1);
                Ok(false)
            }
        }
    }

    /// [`Self::try_consume_one`] in its own transaction.
    pub async fn consume_one(&self) -> Result<bool, StoreError> {
        let mut tx = self.store.begin().await?;
        let granted = self.try_consume_one(tx.as_mut()).await?;
        tx.commit().await?;
        Ok(granted)
    }

    /// Issues a verification code to `user` if the threshold allows one more email.
    ///
    /// Returns the code to email, or `None` when the threshold is exhausted.
    pub(crate) async fn admit(
        &self,
        tx: &mut dyn StoreTx,
        user: &User,
    ) -> Result<Option<IssuedCode>, StoreError> {
        if !self.try_consume_one(tx).await? {
            return Ok(None);
        }
        get_or_create_code(tx, user.id).await.map(Some)
    }

    /// Queues the verification email for a committed code.
    ///
    /// Returns the code only if the email was queued. When the outbox refuses
    /// it, the threshold unit goes back. A code created for this email is
    /// withdrawn too, so the user rejoins the pending queue; a code that an
    /// earlier email already carried stays valid.
    pub(crate) async fn deliver(&self, user: &User, issued: Option<IssuedCode>) -> Option<String> {
        let IssuedCode { code, fresh } = issued?;
        let message = OutboundMessage::VerificationEmail {
            to: user.email.clone(),
            code: code.clone(),
        };
        if self.outbox.enqueue(message) {
            return Some(code);
        }

        counter!("admission_refunded_total").increment(1);
        if let Err(e) = self.refund(user.id, fresh).await {
            error!(user_id = %user.id, error = %e, "Failed to return admission unit");
        }
        None
    }

    async fn refund(&self, user_id: Uuid, withdraw_code: bool) -> Result<(), StoreError> {
        let mut tx = self.store.begin().await?;
        if withdraw_code {
            tx.delete_verification_for_user(user_id).await?;
        }
        let remaining = tx.increment_property(&self.property, 1).await?;
        tx.commit().await?;
        warn!(user_id = %user_id, remaining, "Verification email dropped, unit returned");
        Ok(())
    }

    /// Invites the oldest pending users, one threshold unit each.
    ///
    /// Stops as soon as the threshold is exhausted. Returns the ids whose
    /// email was queued.
    pub async fn invite_next_users(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut tx = self.store.begin().await?;

        let budget = tx
            .get_property(&self.property)
            .await?
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0);
        if budget <= 0 {
            return Ok(Vec::new());
        }

        let candidates = tx.list_pending_users(budget as usize).await?;
        let mut invited = Vec::with_capacity(candidates.len());

        for user in candidates {
            match self.admit(tx.as_mut(), &user).await? {
                Some(code) => invited.push((user, code)),
                None => {
                    warn!("Admission threshold exhausted mid-batch");
                    break;
                }
            }
        }

        tx.commit().await?;

        let mut ids = Vec::with_capacity(invited.len());
        for (user, code) in invited {
            if self.deliver(&user, Some(code)).await.is_some() {
                ids.push(user.id);
            }
        }
        info!(invited = ids.len(), "Invited pending users");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewUser, UserStatus};
    use crate::services::outbox::OutboundMessage;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    const PROPERTY: &str = DEFAULT_THRESHOLD_PROPERTY;

    fn controller(threshold: &str) -> (AdmissionController, Arc<MemoryStore>, mpsc::Receiver<OutboundMessage>) {
        let store = Arc::new(MemoryStore::with_properties([(PROPERTY, threshold)]));
        let (outbox, rx) = Outbox::channel(64);
        (
            AdmissionController::new(store.clone(), outbox, PROPERTY),
            store,
            rx,
        )
    }

    async fn add_users(store: &MemoryStore, count: usize) -> Vec<User> {
        let mut tx = store.begin().await.unwrap();
        let mut users = Vec::new();
        for i in 0..count {
            users.push(
                tx.insert_user(NewUser {
                    email: format!("user{}@pitt.edu", i),
                    password_hash: "hash".into(),
                    name: None,
                    status: UserStatus::Requested,
                })
                .await
                .unwrap(),
            );
        }
        tx.commit().await.unwrap();
        users
    }

    #[tokio::test]
    async fn test_consume_until_exhausted() {
        let (admission, _, _rx) = controller("3");

        let mut granted = 0;
        for _ in 0..10 {
            if admission.consume_one().await.unwrap() {
                granted += 1;
            }
            assert!(admission.threshold().await.unwrap() >= 0);
        }
        assert_eq!(granted, 3);
        assert_eq!(admission.threshold().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_consumers_never_overdraw() {
        let (admission, _, _rx) = controller("5");

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let admission = admission.clone();
                tokio::spawn(async move { admission.consume_one().await.unwrap() })
            })
            .collect();

        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
        assert_eq!(admission.threshold().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_or_garbage_threshold_reads_zero() {
        let (admission, _, _rx) = controller("not-a-number");
        assert_eq!(admission.threshold().await.unwrap(), 0);
        assert!(!admission.consume_one().await.unwrap());

        let store = Arc::new(MemoryStore::new());
        let (outbox, _rx) = Outbox::channel(4);
        let admission = AdmissionController::new(store, outbox, PROPERTY);
        assert_eq!(admission.threshold().await.unwrap(), 0);
        assert!(!admission.consume_one().await.unwrap());
    }

    #[tokio::test]
    async fn test_set_threshold() {
        let (admission, _, _rx) = controller("0");
        admission.set_threshold(7).await.unwrap();
        assert_eq!(admission.threshold().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_invite_next_users_fifo_and_bounded() {
        let (admission, store, mut rx) = controller("2");
        let users = add_users(&store, 3).await;

        let invited = admission.invite_next_users().await.unwrap();
        assert_eq!(invited, vec![users[0].id, users[1].id]);
        assert_eq!(admission.threshold().await.unwrap(), 0);

        let mut emailed = Vec::new();
        while let Ok(OutboundMessage::VerificationEmail { to, .. }) = rx.try_recv() {
            emailed.push(to);
        }
        assert_eq!(emailed, vec!["user0@pitt.edu", "user1@pitt.edu"]);

        // Nothing left to spend.
        assert!(admission.invite_next_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invite_next_users_skips_invited() {
        let (admission, store, _rx) = controller("1");
        let users = add_users(&store, 2).await;

        assert_eq!(admission.invite_next_users().await.unwrap(), vec![users[0].id]);

        admission.set_threshold(5).await.unwrap();
        assert_eq!(admission.invite_next_users().await.unwrap(), vec![users[1].id]);
        assert_eq!(admission.threshold().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_invite_skips_users_whose_email_was_dropped() {
        let store = Arc::new(MemoryStore::with_properties([(PROPERTY, "3")]));
        let (outbox, mut rx) = Outbox::channel(1);
        let admission = AdmissionController::new(store.clone(), outbox, PROPERTY);
        let users = add_users(&store, 3).await;

        let invited = admission.invite_next_users().await.unwrap();
        assert_eq!(invited, vec![users[0].id]);
        assert_eq!(admission.threshold().await.unwrap(), 2);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_verification_for_user(users[0].id).await.unwrap().is_some());
        assert!(tx.get_verification_for_user(users[1].id).await.unwrap().is_none());
        assert!(tx.get_verification_for_user(users[2].id).await.unwrap().is_none());
        drop(tx);

        assert!(rx.try_recv().is_ok());
        let invited = admission.invite_next_users().await.unwrap();
        assert_eq!(invited, vec![users[1].id]);
    }

    #[tokio::test]
    async fn test_get_or_create_code_reuses_live_code() {
        let (_, store, _rx) = controller("0");
        let users = add_users(&store, 1).await;

        let mut tx = store.begin().await.unwrap();
        let first = get_or_create_code(tx.as_mut(), users[0].id).await.unwrap();
        let second = get_or_create_code(tx.as_mut(), users[0].id).await.unwrap();
        assert_eq!(first.code, second.code);
        assert!(first.fresh);
        assert!(!second.fresh);
        assert!(shared::crypto::is_verification_code(&first.code));
    }
}
