//! Administrative operations: host approvals, referrals, broadcasts and the
//! threshold.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::admission::AdmissionController;
use super::notification::{PushMessage, MAX_PUSH_PAYLOAD_BYTES};
use super::outbox::{OutboundMessage, Outbox};
use crate::errors::AccountError;
use crate::models::{HostRequest, Referral, ReferralStatus, Role, User, UserStatus};
use crate::store::{Store, StoreTx};

#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn Store>,
    admission: AdmissionController,
    outbox: Outbox,
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Users holding a push token.
    pub recipients: usize,
    /// Pushes the outbox accepted.
    pub queued: usize,
}

async fn require_role(
    tx: &mut dyn StoreTx,
    user_id: Uuid,
    role: Role,
) -> Result<User, AccountError> {
    match tx.get_user(user_id).await? {
        Some(user) if user.has_role(role) => Ok(user),
        Some(_) => Err(AccountError::permission_for(role)),
        None => {
            error!(user_id = %user_id, "Role check for a user that does not exist");
            Err(AccountError::MissingUser(user_id))
        }
    }
}

impl AdminService {
    pub fn new(store: Arc<dyn Store>, admission: AdmissionController, outbox: Outbox) -> Self {
        Self {
            store,
            admission,
            outbox,
        }
    }

    /// Fails with `AdminPermission` unless the user holds the `Admin` role.
    pub async fn require_admin(&self, user_id: Uuid) -> Result<User, AccountError> {
        let mut tx = self.store.begin().await?;
        require_role(tx.as_mut(), user_id, Role::Admin).await
    }

    pub async fn is_admin(&self, user_id: Uuid) -> Result<bool, AccountError> {
        match self.require_admin(user_id).await {
            Ok(_) => Ok(true),
            Err(AccountError::AdminPermission) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn threshold(&self, admin_id: Uuid) -> Result<i64, AccountError> {
        self.require_admin(admin_id).await?;
        Ok(self.admission.threshold().await?)
    }

    pub async fn set_threshold(&self, admin_id: Uuid, value: u32) -> Result<(), AccountError> {
        self.require_admin(admin_id).await?;
        Ok(self.admission.set_threshold(value).await?)
    }

    /// Runs a threshold-bounded invitation batch.
    pub async fn invite_next_users(&self, admin_id: Uuid) -> Result<Vec<Uuid>, AccountError> {
        self.require_admin(admin_id).await?;
        Ok(self.admission.invite_next_users().await?)
    }

    pub async fn pending_host_requests(
        &self,
        admin_id: Uuid,
    ) -> Result<Vec<HostRequest>, AccountError> {
        let mut tx = self.store.begin().await?;
        require_role(tx.as_mut(), admin_id, Role::Admin).await?;
        Ok(tx.list_pending_host_requests().await?)
    }

    /// Approves a host request and grants the `Host` role. Idempotent.
    pub async fn approve_host_request(
        &self,
        admin_id: Uuid,
        user_id: Uuid,
    ) -> Result<HostRequest, AccountError> {
        let mut tx = self.store.begin().await?;
        require_role(tx.as_mut(), admin_id, Role::Admin).await?;

        let mut request = tx
            .get_host_request(user_id)
            .await?
            .ok_or(AccountError::HostRequestNotFound)?;
        if !request.is_pending() {
            return Ok(request);
        }

        let Some(mut user) = tx.get_user(user_id).await? else {
            error!(user_id = %user_id, "Host request references a missing user");
            return Err(AccountError::MissingUser(user_id));
        };

        request.approved_at = Some(Utc::now());
        request.approved_by = Some(admin_id);
        tx.update_host_request(&request).await?;

        user.roles.insert(Role::Host);
        tx.set_user_roles(user_id, &user.roles).await?;
        tx.commit().await?;

        info!(user_id = %user_id, admin_id = %admin_id, "Host request approved");
        Ok(request)
    }

    /// Grants the `Admin` role to the account registered under `email`.
    pub async fn grant_admin(&self, admin_id: Uuid, email: &str) -> Result<User, AccountError> {
        let mut tx = self.store.begin().await?;
        require_role(tx.as_mut(), admin_id, Role::Admin).await?;

        let mut user = tx
            .get_user_by_email(email)
            .await?
            .ok_or_else(|| AccountError::InvalidEmail(format!("no account for {}", email)))?;
        if user.roles.insert(Role::Admin) {
            tx.set_user_roles(user.id, &user.roles).await?;
            tx.commit().await?;
            info!(user_id = %user.id, admin_id = %admin_id, "Admin role granted");
        }
        Ok(user)
    }

    /// Queues one push per user with a registered device.
    pub async fn broadcast(
        &self,
        admin_id: Uuid,
        title: &str,
        body: &str,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Result<BroadcastReport, AccountError> {
        if title.trim().is_empty() || body.trim().is_empty() {
            return Err(AccountError::InvalidNotification(
                "title and body are required".into(),
            ));
        }

        let mut tx = self.store.begin().await?;
        require_role(tx.as_mut(), admin_id, Role::Admin).await?;
        let tokens: Vec<String> = tx
            .list_users()
            .await?
            .into_iter()
            .filter_map(|user| user.expo_push_token)
            .collect();
        drop(tx);

        let template = PushMessage::message(String::new(), title, body, data);
        let size = serde_json::to_vec(&template)
            .map(|bytes| bytes.len())
            .unwrap_or(usize::MAX);
        if size > MAX_PUSH_PAYLOAD_BYTES {
            return Err(AccountError::InvalidNotification(format!(
                "payload exceeds {} bytes",
                MAX_PUSH_PAYLOAD_BYTES
            )));
        }

        let mut report = BroadcastReport {
            recipients: tokens.len(),
            queued: 0,
        };
        for to in tokens {
            let push = PushMessage { to, ..template.clone() };
            if self.outbox.enqueue(OutboundMessage::Push(push)) {
                report.queued += 1;
            }
        }

        counter!("broadcast_pushes_total").increment(report.queued as u64);
        if report.queued < report.recipients {
            warn!(
                admin_id = %admin_id,
                recipients = report.recipients,
                queued = report.queued,
                "Broadcast partially dropped by a full outbox"
            );
        } else {
            info!(admin_id = %admin_id, recipients = report.recipients, "Broadcast queued");
        }
        Ok(report)
    }

    /// Referrals naming `reference_id` as the referrer.
    pub async fn referrals_for(
        &self,
        reference_id: Uuid,
        status: Option<ReferralStatus>,
    ) -> Result<Vec<Referral>, AccountError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_referrals(reference_id, status).await?)
    }

    /// Approves or denies a pending referral. Only the named referrer may decide.
    ///
    /// Approval advances the requester to `VERIFIED` and, threshold
    /// permitting, sends a verification code. Denial disables the requester.
    pub async fn resolve_referral(
        &self,
        reference_id: Uuid,
        requester_id: Uuid,
        approve: bool,
    ) -> Result<Referral, AccountError> {
        let mut tx = self.store.begin().await?;

        let mut referral = match tx.get_referral(requester_id).await? {
            Some(r) if r.reference_id == reference_id && r.status == ReferralStatus::Pending => r,
            _ => return Err(AccountError::ReferralNotFound),
        };

        let Some(mut requester) = tx.get_user(requester_id).await? else {
            error!(user_id = %requester_id, "Referral references a missing user");
            return Err(AccountError::MissingUser(requester_id));
        };

        let code = if approve {
            referral.status = ReferralStatus::Approved;
            requester.status = requester.status.advance_to(UserStatus::Verified);
            tx.update_user(&requester).await?;
            self.admission.admit(tx.as_mut(), &requester).await?
        } else {
            referral.status = ReferralStatus::Denied;
            requester.disabled = true;
            tx.update_user(&requester).await?;
            tx.delete_verification_for_user(requester_id).await?;
            None
        };

        tx.update_referral(&referral).await?;
        tx.commit().await?;

        info!(
            requester_id = %requester_id,
            reference_id = %reference_id,
            status = %referral.status,
            "Referral resolved"
        );

        self.admission.deliver(&requester, code).await;
        Ok(referral)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewUser, VerificationCode};
    use crate::services::admission::DEFAULT_THRESHOLD_PROPERTY;
    use crate::services::outbox::{OutboundMessage, Outbox};
    use crate::store::MemoryStore;
    use std::collections::BTreeSet;
    use tokio::sync::mpsc;

    struct Harness {
        admin: AdminService,
        store: Arc<MemoryStore>,
        rx: mpsc::Receiver<OutboundMessage>,
    }

    fn harness(threshold: &str) -> Harness {
        let store = Arc::new(MemoryStore::with_properties([(
            DEFAULT_THRESHOLD_PROPERTY,
            threshold,
        )]));
        let (outbox, rx) = Outbox::channel(16);
        let admission =
            AdmissionController::new(store.clone(), outbox.clone(), DEFAULT_THRESHOLD_PROPERTY);
        Harness {
            admin: AdminService::new(store.clone(), admission, outbox),
            store,
            rx,
        }
    }

    async fn add_user(store: &MemoryStore, email: &str, status: UserStatus, roles: &[Role]) -> User {
        let mut tx = store.begin().await.unwrap();
        let mut user = tx
            .insert_user(NewUser {
                email: email.into(),
                password_hash: "hash".into(),
                name: None,
                status,
            })
            .await
            .unwrap();
        if status == UserStatus::Accepted {
            user.active = true;
            tx.update_user(&user).await.unwrap();
        }
        if !roles.is_empty() {
            user.roles.extend(roles.iter().copied());
            tx.set_user_roles(user.id, &user.roles).await.unwrap();
        }
        tx.commit().await.unwrap();
        user
    }

    #[tokio::test]
    async fn test_require_admin() {
        let h = harness("0");
        let admin = add_user(&h.store, "admin@pitt.edu", UserStatus::Accepted, &[Role::Admin]).await;
        let user = add_user(&h.store, "user@pitt.edu", UserStatus::Accepted, &[]).await;

        assert!(h.admin.is_admin(admin.id).await.unwrap());
        assert!(!h.admin.is_admin(user.id).await.unwrap());
        assert!(matches!(
            h.admin.set_threshold(user.id, 10).await,
            Err(AccountError::AdminPermission)
        ));
        assert!(matches!(
            h.admin.require_admin(Uuid::new_v4()).await,
            Err(AccountError::MissingUser(_))
        ));
    }

    #[tokio::test]
    async fn test_threshold_management() {
        let h = harness("0");
        let admin = add_user(&h.store, "admin@pitt.edu", UserStatus::Accepted, &[Role::Admin]).await;
        add_user(&h.store, "wait@pitt.edu", UserStatus::Requested, &[]).await;

        h.admin.set_threshold(admin.id, 3).await.unwrap();
        assert_eq!(h.admin.threshold(admin.id).await.unwrap(), 3);

        let invited = h.admin.invite_next_users(admin.id).await.unwrap();
        assert_eq!(invited.len(), 1);
        assert_eq!(h.admin.threshold(admin.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_approve_host_request() {
        let h = harness("0");
        let admin = add_user(&h.store, "admin@pitt.edu", UserStatus::Accepted, &[Role::Admin]).await;
        let host = add_user(&h.store, "host@pitt.edu", UserStatus::Accepted, &[]).await;
        {
            let mut tx = h.store.begin().await.unwrap();
            tx.insert_host_request(&HostRequest::new(host.id, 2, "host1".into(), None))
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }

        assert_eq!(h.admin.pending_host_requests(admin.id).await.unwrap().len(), 1);
        assert!(matches!(
            h.admin.approve_host_request(host.id, host.id).await,
            Err(AccountError::AdminPermission)
        ));

        let request = h.admin.approve_host_request(admin.id, host.id).await.unwrap();
        assert_eq!(request.approved_by, Some(admin.id));
        assert!(h.admin.pending_host_requests(admin.id).await.unwrap().is_empty());

        let mut tx = h.store.begin().await.unwrap();
        let host = tx.get_user(host.id).await.unwrap().unwrap();
        assert_eq!(host.roles, BTreeSet::from([Role::User, Role::Host]));
    }

    #[tokio::test]
    async fn test_approve_missing_host_request() {
        let h = harness("0");
        let admin = add_user(&h.store, "admin@pitt.edu", UserStatus::Accepted, &[Role::Admin]).await;
        assert!(matches!(
            h.admin.approve_host_request(admin.id, Uuid::new_v4()).await,
            Err(AccountError::HostRequestNotFound)
        ));
    }

    #[tokio::test]
    async fn test_grant_admin() {
        let h = harness("0");
        let admin = add_user(&h.store, "admin@pitt.edu", UserStatus::Accepted, &[Role::Admin]).await;
        let user = add_user(&h.store, "next@pitt.edu", UserStatus::Accepted, &[]).await;

        assert!(matches!(
            h.admin.grant_admin(user.id, "next@pitt.edu").await,
            Err(AccountError::AdminPermission)
        ));
        let granted = h.admin.grant_admin(admin.id, "next@pitt.edu").await.unwrap();
        assert!(granted.has_role(Role::Admin));
        assert!(h.admin.is_admin(user.id).await.unwrap());
        assert!(matches!(
            h.admin.grant_admin(admin.id, "nobody@pitt.edu").await,
            Err(AccountError::InvalidEmail(_))
        ));
    }

    async fn referred(h: &Harness) -> (User, User) {
        let referrer = add_user(&h.store, "ref@pitt.edu", UserStatus::Accepted, &[]).await;
        let requester = add_user(&h.store, "new@pitt.edu", UserStatus::Referral, &[]).await;
        let mut tx = h.store.begin().await.unwrap();
        tx.insert_referral(&Referral::pending(requester.id, referrer.id))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        (referrer, requester)
    }

    #[tokio::test]
    async fn test_approve_referral() {
        let mut h = harness("1");
        let (referrer, requester) = referred(&h).await;

        assert_eq!(
            h.admin
                .referrals_for(referrer.id, Some(ReferralStatus::Pending))
                .await
                .unwrap()
                .len(),
            1
        );

        let referral = h
            .admin
            .resolve_referral(referrer.id, requester.id, true)
            .await
            .unwrap();
        assert_eq!(referral.status, ReferralStatus::Approved);

        let mut tx = h.store.begin().await.unwrap();
        let user = tx.get_user(requester.id).await.unwrap().unwrap();
        assert_eq!(user.status, UserStatus::Verified);
        assert!(!user.active);
        drop(tx);

        assert!(matches!(
            h.rx.try_recv(),
            Ok(OutboundMessage::VerificationEmail { to, .. }) if to == "new@pitt.edu"
        ));
    }

    #[tokio::test]
    async fn test_deny_referral_disables_requester() {
        let h = harness("1");
        let (referrer, requester) = referred(&h).await;
        {
            let mut tx = h.store.begin().await.unwrap();
            tx.insert_verification(&VerificationCode::new("QWERTY".into(), requester.id))
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }

        h.admin
            .resolve_referral(referrer.id, requester.id, false)
            .await
            .unwrap();

        let mut tx = h.store.begin().await.unwrap();
        assert!(tx.get_user(requester.id).await.unwrap().unwrap().disabled);
        assert!(tx
            .get_verification_for_user(requester.id)
            .await
            .unwrap()
            .is_none());
        drop(tx);

        // Already resolved.
        assert!(matches!(
            h.admin.resolve_referral(referrer.id, requester.id, true).await,
            Err(AccountError::ReferralNotFound)
        ));
    }

    #[tokio::test]
    async fn test_only_referrer_may_resolve() {
        let h = harness("1");
        let (_, requester) = referred(&h).await;
        let stranger = add_user(&h.store, "x@pitt.edu", UserStatus::Accepted, &[]).await;

        assert!(matches!(
            h.admin.resolve_referral(stranger.id, requester.id, true).await,
            Err(AccountError::ReferralNotFound)
        ));
    }

    async fn with_token(store: &MemoryStore, user: &User, token: &str) {
        let mut tx = store.begin().await.unwrap();
        let mut user = user.clone();
        user.expo_push_token = Some(token.to_string());
        tx.update_user(&user).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_device() {
        let mut h = harness("0");
        let admin = add_user(&h.store, "admin@pitt.edu", UserStatus::Accepted, &[Role::Admin]).await;
        let a = add_user(&h.store, "a@pitt.edu", UserStatus::Accepted, &[]).await;
        let b = add_user(&h.store, "b@pitt.edu", UserStatus::Requested, &[]).await;
        add_user(&h.store, "silent@pitt.edu", UserStatus::Accepted, &[]).await;
        with_token(&h.store, &a, "ExponentPushToken[a]").await;
        with_token(&h.store, &b, "ExponentPushToken[b]").await;

        let mut data = serde_json::Map::new();
        data.insert("link".into(), "https://pittgrub.com".into());
        let report = h
            .admin
            .broadcast(admin.id, "Welcome", "Free pizza today", data)
            .await
            .unwrap();
        assert_eq!(report, BroadcastReport { recipients: 2, queued: 2 });

        let mut sent = Vec::new();
        while let Ok(OutboundMessage::Push(push)) = h.rx.try_recv() {
            assert_eq!(push.title, "Welcome");
            assert_eq!(push.data["type"], "message");
            assert_eq!(push.data["link"], "https://pittgrub.com");
            sent.push(push.to);
        }
        sent.sort();
        assert_eq!(sent, vec!["ExponentPushToken[a]", "ExponentPushToken[b]"]);
    }

    #[tokio::test]
    async fn test_broadcast_requires_admin_and_content() {
        let mut h = harness("0");
        let admin = add_user(&h.store, "admin@pitt.edu", UserStatus::Accepted, &[Role::Admin]).await;
        let user = add_user(&h.store, "user@pitt.edu", UserStatus::Accepted, &[]).await;
        with_token(&h.store, &user, "ExponentPushToken[u]").await;

        assert!(matches!(
            h.admin
                .broadcast(user.id, "Hi", "there", serde_json::Map::new())
                .await,
            Err(AccountError::AdminPermission)
        ));
        assert!(matches!(
            h.admin
                .broadcast(admin.id, " ", "there", serde_json::Map::new())
                .await,
            Err(AccountError::InvalidNotification(_))
        ));

        let mut data = serde_json::Map::new();
        data.insert("blob".into(), "x".repeat(MAX_PUSH_PAYLOAD_BYTES).into());
        assert!(matches!(
            h.admin.broadcast(admin.id, "Hi", "there", data).await,
            Err(AccountError::InvalidNotification(_))
        ));
        assert!(h.rx.try_recv().is_err());
    }
}
