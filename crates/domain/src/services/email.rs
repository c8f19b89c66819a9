//! Outbound email port.

use std::sync::Mutex;

use thiserror::Error;

/// Failure reported by a mail provider.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Email provider error: {0}")]
    Provider(String),

    #[error("Email configuration error: {0}")]
    Configuration(String),
}

/// Sends account emails.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification_email(&self, to: &str, code: &str) -> Result<(), MailError>;

    async fn send_password_reset_email(&self, to: &str, token: &str) -> Result<(), MailError>;
}

/// Email recorded by [`MockMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMail {
    Verification { to: String, code: String },
    PasswordReset { to: String, token: String },
}

/// Recording mailer for tests.
#[derive(Debug, Default)]
pub struct MockMailer {
    pub simulate_failure: bool,
    sent: Mutex<Vec<SentMail>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            simulate_failure: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn record(&self, mail: SentMail) -> Result<(), MailError> {
        if self.simulate_failure {
            return Err(MailError::Provider("Simulated failure".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(mail);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Mailer for MockMailer {
    async fn send_verification_email(&self, to: &str, code: &str) -> Result<(), MailError> {
        self.record(SentMail::Verification {
            to: to.to_string(),
            code: code.to_string(),
        })
    }

    async fn send_password_reset_email(&self, to: &str, token: &str) -> Result<(), MailError> {
        self.record(SentMail::PasswordReset {
            to: to.to_string(),
            token: token.to_string(),
        })
    }
}
