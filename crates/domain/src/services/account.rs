//! Signup, verification and login flows.
//!
//! Every operation runs in one store transaction. Verification and reset
//! emails are queued on the outbox only after the transaction commits, so a
//! rolled back signup never produces an email.

use std::collections::BTreeSet;
use std::sync::Arc;

use shared::password::{hash_password, verify_against_dummy, verify_password};
use shared::validation::{
    validate_display_name, validate_institutional_email, validate_password_strength,
    DEFAULT_EMAIL_DOMAIN,
};
use tracing::{error, info};
use uuid::Uuid;
use validator::ValidationError;

use super::admission::AdmissionController;
use super::outbox::{OutboundMessage, Outbox};
use super::token::TokenService;
use crate::errors::{AccountError, StoreError};
use crate::models::{
    FoodPreference, HostRequest, NewUser, PrimaryAffiliation, Referral, User, UserStatus,
};
use crate::store::{Store, StoreTx};

/// Account rules that vary per deployment.
#[derive(Debug, Clone)]
pub struct AccountPolicy {
    pub email_domain: String,
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self {
            email_domain: DEFAULT_EMAIL_DOMAIN.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    /// Email of an existing user vouching for this account.
    pub referrer_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HostSignupRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub primary_affiliation: i32,
    pub directory: String,
    pub reason: Option<String>,
}

/// Result of a signup.
///
/// `verification_code` is `None` when no email was queued: the admission
/// threshold was exhausted, the outbox was full, or the account awaits
/// referral approval.
#[derive(Debug, Clone)]
pub struct SignupOutcome {
    pub user: User,
    pub verification_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    /// Whether a verification email was queued by this login.
    pub verification_sent: bool,
}

fn message_of(err: ValidationError) -> String {
    err.message
        .map(|m| m.to_string())
        .unwrap_or_else(|| err.code.to_string())
}

/// Account lifecycle operations.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
    admission: AdmissionController,
    tokens: TokenService,
    outbox: Outbox,
    policy: AccountPolicy,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn Store>,
        admission: AdmissionController,
        tokens: TokenService,
        outbox: Outbox,
        policy: AccountPolicy,
    ) -> Self {
        Self {
            store,
            admission,
            tokens,
            outbox,
            policy,
        }
    }

    fn check_email(&self, email: &str) -> Result<(), AccountError> {
        validate_institutional_email(email, &self.policy.email_domain)
            .map_err(|e| AccountError::InvalidEmail(message_of(e)))
    }

    fn check_password(password: &str) -> Result<(), AccountError> {
        validate_password_strength(password).map_err(|e| AccountError::WeakPassword(message_of(e)))
    }

    fn check_name(name: Option<&str>) -> Result<(), AccountError> {
        match name {
            Some(name) => validate_display_name(name)
                .map_err(|e| AccountError::InvalidName(message_of(e))),
            None => Ok(()),
        }
    }

    async fn insert_user(tx: &mut dyn StoreTx, new_user: NewUser) -> Result<User, AccountError> {
        let email = new_user.email.clone();
        tx.insert_user(new_user).await.map_err(|e| match e {
            StoreError::Conflict(_) => AccountError::DuplicateEmail(email),
            other => other.into(),
        })
    }

    async fn load_user(tx: &mut dyn StoreTx, user_id: Uuid) -> Result<User, AccountError> {
        match tx.get_user(user_id).await? {
            Some(user) => Ok(user),
            None => {
                error!(user_id = %user_id, "Referenced user does not exist");
                Err(AccountError::MissingUser(user_id))
            }
        }
    }

    /// Loads a user by id.
    pub async fn user(&self, user_id: Uuid) -> Result<User, AccountError> {
        let mut tx = self.store.begin().await?;
        Self::load_user(tx.as_mut(), user_id).await
    }

    /// Creates an account.
    ///
    /// With a referrer the account starts in `REFERRAL` status and gets no
    /// code until the referrer approves it. Otherwise it starts `REQUESTED`
    /// and receives a code if the admission threshold allows.
    pub async fn signup(&self, request: SignupRequest) -> Result<SignupOutcome, AccountError> {
        self.check_email(&request.email)?;
        Self::check_password(&request.password)?;
        Self::check_name(request.name.as_deref())?;
        let password_hash = hash_password(&request.password)?;

        let mut tx = self.store.begin().await?;

        let referrer = match request.referrer_email.as_deref() {
            Some(email) => match tx.get_user_by_email(email).await? {
                Some(referrer) => Some(referrer),
                None => return Err(AccountError::ReferralNotFound),
            },
            None => None,
        };

        let status = if referrer.is_some() {
            UserStatus::Referral
        } else {
            UserStatus::Requested
        };

        let user = Self::insert_user(
            tx.as_mut(),
            NewUser {
                email: request.email,
                password_hash,
                name: request.name,
                status,
            },
        )
        .await?;

        let code = match &referrer {
            Some(referrer) => {
                tx.insert_referral(&Referral::pending(user.id, referrer.id))
                    .await?;
                None
            }
            None => self.admission.admit(tx.as_mut(), &user).await?,
        };

        tx.commit().await?;

        let code = self.admission.deliver(&user, code).await;
        info!(
            user_id = %user.id,
            status = %user.status,
            verification_sent = code.is_some(),
            "User signed up"
        );

        Ok(SignupOutcome {
            user,
            verification_code: code,
        })
    }

    /// Creates an account and a pending host request for it.
    pub async fn host_signup(
        &self,
        request: HostSignupRequest,
    ) -> Result<SignupOutcome, AccountError> {
        let affiliation = PrimaryAffiliation::by_id(request.primary_affiliation)
            .ok_or(AccountError::InvalidAffiliation(request.primary_affiliation))?;
        self.check_email(&request.email)?;
        Self::check_password(&request.password)?;
        Self::check_name(Some(&request.name))?;
        let password_hash = hash_password(&request.password)?;

        let mut tx = self.store.begin().await?;

        let user = Self::insert_user(
            tx.as_mut(),
            NewUser {
                email: request.email,
                password_hash,
                name: Some(request.name),
                status: UserStatus::Requested,
            },
        )
        .await?;

        tx.insert_host_request(&HostRequest::new(
            user.id,
            affiliation.id,
            request.directory,
            request.reason,
        ))
        .await?;

        let code = self.admission.admit(tx.as_mut(), &user).await?;
        tx.commit().await?;

        let code = self.admission.deliver(&user, code).await;
        info!(
            user_id = %user.id,
            affiliation = affiliation.name,
            verification_sent = code.is_some(),
            "Host signed up"
        );

        Ok(SignupOutcome {
            user,
            verification_code: code,
        })
    }

    /// Authenticates by email and password.
    ///
    /// Inactive accounts may log in; each such login retries sending a
    /// verification code, subject to the threshold.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AccountError> {
        let mut tx = self.store.begin().await?;

        let Some(mut user) = tx.get_user_by_email(email).await? else {
            verify_against_dummy(password);
            return Err(AccountError::InvalidCredentials);
        };

        if !verify_password(password, &user.password_hash)? {
            return Err(AccountError::InvalidCredentials);
        }
        if user.disabled {
            return Err(AccountError::AccountDisabled);
        }

        let code = if !user.active && user.status != UserStatus::Referral {
            self.admission.admit(tx.as_mut(), &user).await?
        } else {
            None
        };

        user.login_count += 1;
        tx.update_user(&user).await?;
        tx.commit().await?;

        info!(user_id = %user.id, active = user.active, "User logged in");

        let verification_sent = self.admission.deliver(&user, code).await.is_some();

        Ok(LoginOutcome {
            user,
            verification_sent,
        })
    }

    /// Redeems a verification code.
    ///
    /// Returns `false` unless `code` exists and belongs to `user_id`. On
    /// success the account becomes active and `ACCEPTED`, and the code is gone.
    pub async fn verify_user(&self, code: &str, user_id: Uuid) -> Result<bool, AccountError> {
        let code = code.trim().to_uppercase();
        let mut tx = self.store.begin().await?;

        if !tx.take_verification(&code, user_id).await? {
            info!(user_id = %user_id, "Verification code rejected");
            return Ok(false);
        }

        let mut user = Self::load_user(tx.as_mut(), user_id).await?;
        user.active = true;
        user.status = user.status.advance_to(UserStatus::Accepted);
        tx.update_user(&user).await?;
        tx.commit().await?;

        info!(user_id = %user_id, "User verified");
        Ok(true)
    }

    /// Re-sends the user's verification code, creating one if needed.
    ///
    /// Returns whether an email was queued; `false` means the threshold is
    /// exhausted, the outbox is full, or the account still awaits referral
    /// approval.
    pub async fn resend_verification(&self, user_id: Uuid) -> Result<bool, AccountError> {
        let mut tx = self.store.begin().await?;
        let user = Self::load_user(tx.as_mut(), user_id).await?;

        if user.active {
            return Err(AccountError::AlreadyActive);
        }
        if user.disabled {
            return Err(AccountError::AccountDisabled);
        }
        if user.status == UserStatus::Referral {
            return Ok(false);
        }

        let code = self.admission.admit(tx.as_mut(), &user).await?;
        tx.commit().await?;

        Ok(self.admission.deliver(&user, code).await.is_some())
    }

    /// Changes the password, revoking every outstanding refresh and reset token.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AccountError> {
        Self::check_password(new_password)?;

        let mut tx = self.store.begin().await?;
        let mut user = Self::load_user(tx.as_mut(), user_id).await?;

        if !verify_password(current_password, &user.password_hash)? {
            return Err(AccountError::InvalidCredentials);
        }

        user.password_hash = hash_password(new_password)?;
        tx.update_user(&user).await?;
        tx.commit().await?;

        info!(user_id = %user_id, "Password changed");
        Ok(())
    }

    /// Emails a password reset token. Unknown emails succeed silently.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AccountError> {
        let user = {
            let mut tx = self.store.begin().await?;
            tx.get_user_by_email(email).await?
        };

        let Some(user) = user else {
            info!("Password reset requested for unknown email");
            return Ok(());
        };
        if user.disabled {
            info!(user_id = %user.id, "Password reset requested for disabled account");
            return Ok(());
        }

        let token = self.tokens.password_reset_token_for_user(&user, None)?;
        self.outbox.enqueue(OutboundMessage::PasswordResetEmail {
            to: user.email,
            token,
        });
        Ok(())
    }

    /// Sets a new password using a reset token.
    ///
    /// The new hash re-keys reset tokens, so the token cannot be replayed.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AccountError> {
        Self::check_password(new_password)?;
        let claims = self.tokens.decode_password_reset_token(token, true).await?;
        let password_hash = hash_password(new_password)?;

        let mut tx = self.store.begin().await?;
        let mut user = Self::load_user(tx.as_mut(), claims.own).await?;
        user.password_hash = password_hash;
        tx.update_user(&user).await?;
        tx.commit().await?;

        info!(user_id = %user.id, "Password reset");
        Ok(())
    }

    /// Registers (or clears) the user's push token.
    pub async fn set_push_token(
        &self,
        user_id: Uuid,
        token: Option<String>,
    ) -> Result<(), AccountError> {
        let mut tx = self.store.begin().await?;
        let mut user = Self::load_user(tx.as_mut(), user_id).await?;
        user.expo_push_token = token.filter(|t| !t.trim().is_empty());
        tx.update_user(&user).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replaces the user's declared food preferences.
    pub async fn set_food_preferences(
        &self,
        user_id: Uuid,
        preferences: BTreeSet<FoodPreference>,
    ) -> Result<User, AccountError> {
        let mut tx = self.store.begin().await?;
        let mut user = Self::load_user(tx.as_mut(), user_id).await?;
        tx.set_user_food_preferences(user_id, &preferences).await?;
        tx.commit().await?;

        user.food_preferences = preferences;
        Ok(user)
    }
}
