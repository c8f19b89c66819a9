//! Token service: issues and verifies access, refresh and reset tokens.
//!
//! Key derivation and the kind-tag check live in [`shared::jwt`]; this layer
//! adds the credential lookups. Refresh and reset tokens are verified against
//! the owner's *current* password hash, so a password change revokes them.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use shared::jwt::{Claims, JwtError, TokenCodec, TokenKind};
use tracing::error;
use uuid::Uuid;

use crate::errors::{AccountError, TokenError};
use crate::models::User;
use crate::store::Store;

/// Token lifetimes.
#[derive(Debug, Clone, Copy)]
pub struct TokenSettings {
    pub access_ttl: Duration,
    pub reset_ttl: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            access_ttl: Duration::hours(2),
            reset_ttl: Duration::hours(24),
        }
    }
}

/// Issues and verifies kind-tagged tokens.
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn Store>,
    codec: TokenCodec,
    settings: TokenSettings,
}

impl TokenService {
    pub fn new(store: Arc<dyn Store>, codec: TokenCodec, settings: TokenSettings) -> Self {
        Self {
            store,
            codec,
            settings,
        }
    }

    pub fn settings(&self) -> TokenSettings {
        self.settings
    }

    fn claims_for(&self, user: &User, exp: Option<i64>) -> Claims {
        Claims {
            own: user.id,
            roles: user.role_claim(),
            iss: self.codec.issuer().to_string(),
            iat: Utc::now().timestamp(),
            exp,
        }
    }

    fn expiry(requested: Option<DateTime<Utc>>, ttl: Duration) -> Result<i64, TokenError> {
        let now = Utc::now();
        match requested {
            Some(at) if at < now => Err(JwtError::InvalidExpiry.into()),
            Some(at) => Ok(at.timestamp()),
            None => Ok((now + ttl).timestamp()),
        }
    }

    fn issue(
        &self,
        kind: TokenKind,
        claims: &Claims,
        credential: Option<&str>,
    ) -> Result<String, TokenError> {
        let token = self.codec.encode(kind, claims, credential)?;
        counter!("tokens_issued_total", "kind" => kind.as_str()).increment(1);
        Ok(token)
    }

    /// Access token for an already loaded user, signed with the service secret.
    pub fn access_token_for_user(
        &self,
        user: &User,
        expires: Option<DateTime<Utc>>,
    ) -> Result<String, TokenError> {
        let exp = Self::expiry(expires, self.settings.access_ttl)?;
        self.issue(TokenKind::Access, &self.claims_for(user, Some(exp)), None)
    }

    /// Refresh token for an already loaded user. Carries no expiry.
    pub fn refresh_token_for_user(&self, user: &User) -> Result<String, TokenError> {
        self.issue(
            TokenKind::Refresh,
            &self.claims_for(user, None),
            Some(&user.password_hash),
        )
    }

    /// Password reset token for an already loaded user, keyed by its password hash.
    pub fn password_reset_token_for_user(
        &self,
        user: &User,
        expires: Option<DateTime<Utc>>,
    ) -> Result<String, TokenError> {
        let exp = Self::expiry(expires, self.settings.reset_ttl)?;
        self.issue(
            TokenKind::Reset,
            &self.claims_for(user, Some(exp)),
            Some(&user.password_hash),
        )
    }

    pub async fn create_access_token(
        &self,
        owner: Uuid,
        expires: Option<DateTime<Utc>>,
    ) -> Result<String, TokenError> {
        let user = self.owner(owner).await?;
        self.access_token_for_user(&user, expires)
    }

    pub async fn create_refresh_token(&self, owner: Uuid) -> Result<String, TokenError> {
        let user = self.owner(owner).await?;
        self.refresh_token_for_user(&user)
    }

    pub async fn create_password_reset_token(
        &self,
        owner: Uuid,
        expires: Option<DateTime<Utc>>,
    ) -> Result<String, TokenError> {
        let user = self.owner(owner).await?;
        self.password_reset_token_for_user(&user, expires)
    }

    /// Verifies an access token. Needs no store access.
    pub fn decode_access_token(&self, token: &str, verify_exp: bool) -> Result<Claims, TokenError> {
        Ok(self
            .codec
            .decode(TokenKind::Access, token, None, verify_exp)?)
    }

    /// Verifies a refresh token against the owner's current password hash.
    pub async fn decode_refresh_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.decode_with_credential(TokenKind::Refresh, token, false)
            .await
    }

    /// Verifies a reset token against the owner's current password hash.
    pub async fn decode_password_reset_token(
        &self,
        token: &str,
        verify_exp: bool,
    ) -> Result<Claims, TokenError> {
        self.decode_with_credential(TokenKind::Reset, token, verify_exp)
            .await
    }

    async fn decode_with_credential(
        &self,
        expected: TokenKind,
        token: &str,
        verify_exp: bool,
    ) -> Result<Claims, TokenError> {
        let found = self.codec.peek_kind(token)?;
        if found != Some(expected) {
            return Err(JwtError::InvalidTokenKind { expected, found }.into());
        }

        let owner = self.codec.peek_owner(token)?;
        let mut tx = self.store.begin().await?;
        let Some(user) = tx.get_user(owner).await? else {
            return Err(JwtError::Decode(format!("unknown token owner {}", owner)).into());
        };

        Ok(self
            .codec
            .decode(expected, token, Some(&user.password_hash), verify_exp)?)
    }

    /// Whether `token` is currently valid, dispatching on its kind tag.
    ///
    /// Expired or undecodable tokens yield `Ok(false)`; store failures
    /// propagate.
    pub async fn validate_token(&self, token: &str) -> Result<bool, TokenError> {
        let kind = match self.codec.peek_kind(token) {
            Ok(Some(kind)) => kind,
            Ok(None) | Err(_) => return Ok(false),
        };

        let result = match kind {
            TokenKind::Access => self.decode_access_token(token, true),
            TokenKind::Refresh => self.decode_refresh_token(token).await,
            TokenKind::Reset => self.decode_password_reset_token(token, true).await,
        };

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.is_rejection() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// Disabled and not yet activated accounts are refused.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<(User, String), AccountError> {
        let claims = self.decode_refresh_token(refresh_token).await?;
        let user = self.owner(claims.own).await?;

        if user.disabled {
            return Err(AccountError::AccountDisabled);
        }
        if !user.active {
            return Err(AccountError::ActivationRequired);
        }

        let access = self.access_token_for_user(&user, None)?;
        Ok((user, access))
    }

    async fn owner(&self, owner: Uuid) -> Result<User, TokenError> {
        let mut tx = self.store.begin().await?;
        match tx.get_user(owner).await? {
            Some(user) => Ok(user),
            None => {
                error!(user_id = %owner, "Token requested for a user that does not exist");
                Err(TokenError::MissingUser(owner))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewUser, UserStatus};
    use crate::store::MemoryStore;
    use shared::password::hash_password;

    const SECRET: &str = "unit-test-service-secret";

    async fn setup() -> (TokenService, Arc<MemoryStore>, User) {
        let store = Arc::new(MemoryStore::new());
        let mut tx = store.begin().await.unwrap();
        let mut user = tx
            .insert_user(NewUser {
                email: "owner@pitt.edu".into(),
                password_hash: hash_password("original-password").unwrap(),
                name: None,
                status: UserStatus::Requested,
            })
            .await
            .unwrap();
        user.active = true;
        tx.update_user(&user).await.unwrap();
        tx.commit().await.unwrap();

        let service = TokenService::new(
            store.clone(),
            TokenCodec::new_for_testing(SECRET),
            TokenSettings::default(),
        );
        (service, store, user)
    }

    async fn change_password(store: &MemoryStore, user: &User, password: &str) {
        let mut tx = store.begin().await.unwrap();
        let mut updated = tx.get_user(user.id).await.unwrap().unwrap();
        updated.password_hash = hash_password(password).unwrap();
        tx.update_user(&updated).await.unwrap();
        tx.commit().await.unwrap();
    }

    fn is_kind_error(result: Result<Claims, TokenError>) -> bool {
        matches!(
            result,
            Err(TokenError::Jwt(JwtError::InvalidTokenKind { .. }))
        )
    }

    #[tokio::test]
    async fn test_each_kind_decodes_as_itself() {
        let (service, _, user) = setup().await;

        let access = service.create_access_token(user.id, None).await.unwrap();
        let refresh = service.create_refresh_token(user.id).await.unwrap();
        let reset = service
            .create_password_reset_token(user.id, None)
            .await
            .unwrap();

        let claims = service.decode_access_token(&access, true).unwrap();
        assert_eq!(claims.own, user.id);
        assert_eq!(claims.roles, "User");
        assert_eq!(claims.iss, "PittGrub");

        let claims = service.decode_refresh_token(&refresh).await.unwrap();
        assert!(claims.exp.is_none());

        service
            .decode_password_reset_token(&reset, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_access_token_rejected_as_refresh_and_reset() {
        let (service, _, user) = setup().await;
        let access = service.create_access_token(user.id, None).await.unwrap();

        assert!(is_kind_error(service.decode_refresh_token(&access).await));
        assert!(is_kind_error(
            service.decode_password_reset_token(&access, true).await
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_rejected_as_access_and_reset() {
        let (service, _, user) = setup().await;
        let refresh = service.create_refresh_token(user.id).await.unwrap();

        assert!(is_kind_error(service.decode_access_token(&refresh, true)));
        assert!(is_kind_error(
            service.decode_password_reset_token(&refresh, true).await
        ));
    }

    #[tokio::test]
    async fn test_reset_token_rejected_as_access_and_refresh() {
        let (service, _, user) = setup().await;
        let reset = service
            .create_password_reset_token(user.id, None)
            .await
            .unwrap();

        assert!(is_kind_error(service.decode_access_token(&reset, true)));
        assert!(is_kind_error(service.decode_refresh_token(&reset).await));
    }

    #[tokio::test]
    async fn test_password_change_revokes_refresh_token() {
        let (service, store, user) = setup().await;
        let refresh = service.create_refresh_token(user.id).await.unwrap();
        assert!(service.decode_refresh_token(&refresh).await.is_ok());

        change_password(&store, &user, "a-brand-new-password").await;

        assert!(matches!(
            service.decode_refresh_token(&refresh).await,
            Err(TokenError::Jwt(JwtError::Decode(_)))
        ));
        assert!(!service.validate_token(&refresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_password_change_revokes_reset_token() {
        let (service, store, user) = setup().await;
        let reset = service
            .create_password_reset_token(user.id, None)
            .await
            .unwrap();

        change_password(&store, &user, "a-brand-new-password").await;

        assert!(service
            .decode_password_reset_token(&reset, true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_missing_owner() {
        let (service, _, _) = setup().await;
        let result = service.create_access_token(Uuid::new_v4(), None).await;
        assert!(matches!(result, Err(TokenError::MissingUser(_))));
    }

    #[tokio::test]
    async fn test_past_expiry_rejected() {
        let (service, _, user) = setup().await;
        let result = service
            .create_access_token(user.id, Some(Utc::now() - Duration::minutes(1)))
            .await;
        assert!(matches!(
            result,
            Err(TokenError::Jwt(JwtError::InvalidExpiry))
        ));
    }

    #[tokio::test]
    async fn test_validate_token() {
        let (service, _, user) = setup().await;
        let access = service.create_access_token(user.id, None).await.unwrap();
        let refresh = service.create_refresh_token(user.id).await.unwrap();

        assert!(service.validate_token(&access).await.unwrap());
        assert!(service.validate_token(&refresh).await.unwrap());
        assert!(!service.validate_token("definitely.not.valid").await.unwrap());
        assert!(!service.validate_token("").await.unwrap());
    }

    #[tokio::test]
    async fn test_validate_expired_access_token() {
        let (service, _, user) = setup().await;
        let codec = TokenCodec::new_for_testing(SECRET);
        let claims = Claims {
            own: user.id,
            roles: "User".into(),
            iss: "PittGrub".into(),
            iat: Utc::now().timestamp() - 7200,
            exp: Some(Utc::now().timestamp() - 3600),
        };
        let expired = codec.encode(TokenKind::Access, &claims, None).unwrap();

        assert!(!service.validate_token(&expired).await.unwrap());
        assert!(matches!(
            service.decode_access_token(&expired, true),
            Err(TokenError::Jwt(JwtError::ExpiredSignature))
        ));
        assert!(service.decode_access_token(&expired, false).is_ok());
    }

    #[tokio::test]
    async fn test_refresh_access_token_requires_active_user() {
        let (service, store, user) = setup().await;
        let refresh = service.create_refresh_token(user.id).await.unwrap();

        let (_, access) = service.refresh_access_token(&refresh).await.unwrap();
        assert!(service.decode_access_token(&access, true).is_ok());

        let mut tx = store.begin().await.unwrap();
        let mut stored = tx.get_user(user.id).await.unwrap().unwrap();
        stored.active = false;
        tx.update_user(&stored).await.unwrap();
        tx.commit().await.unwrap();
        assert!(matches!(
            service.refresh_access_token(&refresh).await,
            Err(AccountError::ActivationRequired)
        ));

        let mut tx = store.begin().await.unwrap();
        let mut stored = tx.get_user(user.id).await.unwrap().unwrap();
        stored.disabled = true;
        tx.update_user(&stored).await.unwrap();
        tx.commit().await.unwrap();
        assert!(matches!(
            service.refresh_access_token(&refresh).await,
            Err(AccountError::AccountDisabled)
        ));
    }
}
