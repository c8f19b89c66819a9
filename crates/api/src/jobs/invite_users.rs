//! Periodic invitation batch.

use domain::services::AdmissionController;

use super::scheduler::{Job, JobFrequency};

/// Sends verification codes to waiting users while the threshold allows.
pub struct InviteUsersJob {
    admission: AdmissionController,
    interval_minutes: u64,
}

impl InviteUsersJob {
    pub fn new(admission: AdmissionController, interval_minutes: u64) -> Self {
        Self {
            admission,
            interval_minutes,
        }
    }
}

#[async_trait::async_trait]
impl Job for InviteUsersJob {
    fn name(&self) -> &'static str {
        "invite_users"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(self.interval_minutes)
    }

    async fn execute(&self) -> Result<(), String> {
        let invited = self
            .admission
            .invite_next_users()
            .await
            .map_err(|e| e.to_string())?;

        if !invited.is_empty() {
            tracing::info!(invited = invited.len(), "Invitation batch sent");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::{NewUser, UserStatus};
    use domain::services::{OutboundMessage, Outbox, DEFAULT_THRESHOLD_PROPERTY};
    use domain::store::{MemoryStore, Store};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_invites_waiting_users_within_threshold() {
        let store = Arc::new(MemoryStore::new());
        let (outbox, mut rx) = Outbox::channel(16);

        {
            let mut tx = store.begin().await.unwrap();
            tx.set_property(DEFAULT_THRESHOLD_PROPERTY, "1").await.unwrap();
            for email in ["first@pitt.edu", "second@pitt.edu"] {
                tx.insert_user(NewUser {
                    email: email.to_string(),
                    password_hash: "hash".to_string(),
                    name: None,
                    status: UserStatus::Requested,
                })
                .await
                .unwrap();
            }
            tx.commit().await.unwrap();
        }

        let admission = AdmissionController::new(store, outbox, DEFAULT_THRESHOLD_PROPERTY);
        let job = InviteUsersJob::new(admission.clone(), 60);
        assert_eq!(job.frequency(), JobFrequency::Minutes(60));

        job.execute().await.unwrap();

        assert_eq!(admission.threshold().await.unwrap(), 0);
        match rx.try_recv().unwrap() {
            OutboundMessage::VerificationEmail { to, .. } => assert_eq!(to, "first@pitt.edu"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
