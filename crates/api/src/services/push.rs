//! Expo push notification service.
//!
//! Implements [`PushSender`] against the Expo push HTTP API, retrying
//! transient failures with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use domain::services::notification::MAX_PUSH_PAYLOAD_BYTES;
use domain::services::{PushOutcome, PushSender};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PushConfig;

/// Accepted push token prefixes.
const TOKEN_PREFIXES: [&str; 2] = ["ExponentPushToken[", "ExpoPushToken["];

pub fn is_expo_push_token(token: &str) -> bool {
    TOKEN_PREFIXES.iter().any(|p| token.starts_with(p)) && token.ends_with(']')
}

#[derive(Debug, Serialize)]
struct ExpoMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Value,
    sound: &'static str,
}

#[derive(Debug, Deserialize)]
struct ExpoResponse {
    data: Option<ExpoTicket>,
    #[serde(default)]
    errors: Vec<ExpoRequestError>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicket {
    status: String,
    message: Option<String>,
    details: Option<ExpoTicketDetails>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicketDetails {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExpoRequestError {
    code: String,
    message: String,
}

/// Maps a push ticket to an outcome.
fn classify_ticket(ticket: &ExpoTicket) -> PushOutcome {
    if ticket.status == "ok" {
        return PushOutcome::Sent;
    }

    let error = ticket.details.as_ref().and_then(|d| d.error.as_deref());
    match (error, &ticket.message) {
        (Some("DeviceNotRegistered"), _) => PushOutcome::DeviceNotRegistered,
        (_, Some(message)) => PushOutcome::Failed(message.clone()),
        (Some(code), None) => PushOutcome::Failed(code.to_string()),
        (None, None) => PushOutcome::Failed("push ticket reported an error".to_string()),
    }
}

fn classify_response(response: ExpoResponse) -> PushOutcome {
    if let Some(ticket) = response.data {
        return classify_ticket(&ticket);
    }
    match response.errors.first() {
        Some(e) => PushOutcome::Failed(format!("{}: {}", e.code, e.message)),
        None => PushOutcome::Failed("empty push response".to_string()),
    }
}

fn backoff(attempt: u32) -> Duration {
    // 100ms, 200ms, 400ms, ...
    Duration::from_millis(100 * (1u64 << (attempt.saturating_sub(1)).min(10)))
}

/// Expo-backed push sender. When disabled, pushes are only logged.
pub struct ExpoPushService {
    client: Client,
    config: PushConfig,
}

impl ExpoPushService {
    pub fn new(config: PushConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { client, config })
    }

    async fn post_once(&self, message: &ExpoMessage<'_>) -> Result<PushOutcome, String> {
        let mut request = self.client.post(&self.config.expo_url).json(message);
        if !self.config.access_token.is_empty() {
            request = request.bearer_auth(&self.config.access_token);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("Expo returned {}: {}", status, text));
        }

        match response.json::<ExpoResponse>().await {
            Ok(body) => Ok(classify_response(body)),
            Err(e) => Ok(PushOutcome::Failed(format!(
                "Expo returned {} with an unreadable body: {}",
                status, e
            ))),
        }
    }
}

#[async_trait]
impl PushSender for ExpoPushService {
    async fn send(
        &self,
        push_token: &str,
        title: &str,
        body: &str,
        data: &serde_json::Value,
    ) -> PushOutcome {
        if !is_expo_push_token(push_token) {
            return PushOutcome::InvalidToken;
        }

        let message = ExpoMessage {
            to: push_token,
            title,
            body,
            data,
            sound: "default",
        };

        match serde_json::to_vec(&message) {
            Ok(bytes) if bytes.len() > MAX_PUSH_PAYLOAD_BYTES => {
                return PushOutcome::Failed(format!(
                    "payload of {} bytes exceeds {} bytes",
                    bytes.len(),
                    MAX_PUSH_PAYLOAD_BYTES
                ));
            }
            Ok(_) => {}
            Err(e) => return PushOutcome::Failed(e.to_string()),
        }

        if !self.config.enabled {
            info!(push_token = %push_token, title = %title, "Push delivery disabled, not sent");
            return PushOutcome::Sent;
        }

        let mut last_error = String::new();
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff(attempt)).await;
            }

            match self.post_once(&message).await {
                Ok(outcome) => {
                    debug!(attempt, outcome = ?outcome, "Expo push attempt finished");
                    return outcome;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Expo push attempt failed, will retry");
                    last_error = e;
                }
            }
        }

        PushOutcome::Failed(last_error)
    }
}
