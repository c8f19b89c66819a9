//! Email delivery for verification codes and password reset links.
//!
//! Supports two providers:
//! - `console`: Logs emails (development)
//! - `sendgrid`: Uses the SendGrid v3 API

use std::time::Duration;

use async_trait::async_trait;
use domain::services::{MailError, Mailer};
use serde_json::json;
use tracing::{error, info};

use crate::config::EmailConfig;

const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Email message to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_text: String,
}

impl EmailMessage {
    pub fn verification(to: &str, code: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "PittGrub Account Verification".to_string(),
            body_text: format!(
                "Welcome to PittGrub!\n\nYour verification code is: {}.\n\n\
                 Enter it in the app to activate your account.",
                code
            ),
        }
    }

    pub fn password_reset(to: &str, token: &str, base_url: &str) -> Self {
        let target = if base_url.is_empty() {
            format!("Reset token: {}", token)
        } else {
            format!(
                "{}/password/reset?token={}",
                base_url.trim_end_matches('/'),
                token
            )
        };

        Self {
            to: to.to_string(),
            subject: "PittGrub Password Reset".to_string(),
            body_text: format!(
                "We received a request to reset your PittGrub password.\n\n{}\n\n\
                 If you didn't request a reset, you can ignore this email.",
                target
            ),
        }
    }
}

/// [`Mailer`] backed by the configured provider.
#[derive(Clone)]
pub struct EmailService {
    config: EmailConfig,
    client: reqwest::Client,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| MailError::Configuration(format!("HTTP client: {}", e)))?;

        match config.provider.as_str() {
            "console" => {}
            "sendgrid" if !config.sendgrid_api_key.is_empty() => {}
            "sendgrid" => {
                return Err(MailError::Configuration(
                    "sendgrid provider requires an API key".to_string(),
                ))
            }
            other => {
                return Err(MailError::Configuration(format!(
                    "unknown email provider: {}",
                    other
                )))
            }
        }

        Ok(Self { config, client })
    }

    pub async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        match self.config.provider.as_str() {
            "sendgrid" => self.send_sendgrid(message).await,
            _ => {
                self.send_console(&message);
                Ok(())
            }
        }
    }

    fn send_console(&self, message: &EmailMessage) {
        info!(
            to = %message.to,
            subject = %message.subject,
            from = %self.config.sender_email,
            from_name = %self.config.sender_name,
            body = %message.body_text,
            "Email (console provider)"
        );
    }

    fn sendgrid_body(&self, message: &EmailMessage) -> serde_json::Value {
        json!({
            "personalizations": [{
                "to": [{ "email": message.to }]
            }],
            "from": {
                "email": self.config.sender_email,
                "name": self.config.sender_name
            },
            "subject": message.subject,
            "content": [{
                "type": "text/plain",
                "value": message.body_text
            }]
        })
    }

    async fn send_sendgrid(&self, message: EmailMessage) -> Result<(), MailError> {
        let response = self
            .client
            .post(SENDGRID_URL)
            .bearer_auth(&self.config.sendgrid_api_key)
            .json(&self.sendgrid_body(&message))
            .send()
            .await
            .map_err(|e| MailError::Provider(format!("SendGrid request failed: {}", e)))?;

        if response.status().is_success() {
            info!(subject = %message.subject, "Email sent via SendGrid");
            Ok(())
        } else {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, error = %error_body, "SendGrid API error");
            Err(MailError::Provider(format!(
                "SendGrid returned {}: {}",
                status, error_body
            )))
        }
    }
}

#[async_trait]
impl Mailer for EmailService {
    async fn send_verification_email(&self, to: &str, code: &str) -> Result<(), MailError> {
        self.send(EmailMessage::verification(to, code)).await
    }

    async fn send_password_reset_email(&self, to: &str, token: &str) -> Result<(), MailError> {
        self.send(EmailMessage::password_reset(to, token, &self.config.base_url))
            .await
    }
}
