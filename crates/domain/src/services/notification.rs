//! Push notification port.
//!
//! Provides the abstraction the recommendation engine pushes through, plus a
//! recording mock for development and tests.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum payload size accepted by the push provider, in bytes.
pub const MAX_PUSH_PAYLOAD_BYTES: usize = 4096;

/// Notification type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Event,
    Message,
}

/// A push notification addressed to one device token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

impl PushMessage {
    /// Push announcing a newly recommended event.
    pub fn event_recommended(to: String, event_id: Uuid, title: &str) -> Self {
        let body = format!("A new food event matches your preferences: {}", title);
        Self {
            to,
            title: "New food event".to_string(),
            data: serde_json::json!({
                "type": NotificationType::Event,
                "event_id": event_id,
                "title": title,
            }),
            body,
        }
    }

    /// Free-form admin message. `title`, `body` and `type` overwrite any
    /// same-named keys in `data`.
    pub fn message(
        to: String,
        title: &str,
        body: &str,
        mut data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        data.insert("title".into(), title.into());
        data.insert("body".into(), body.into());
        data.insert("type".into(), serde_json::json!(NotificationType::Message));
        Self {
            to,
            title: title.to_string(),
            body: body.to_string(),
            data: serde_json::Value::Object(data),
        }
    }
}

/// Result of a push delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Accepted by the provider.
    Sent,
    /// The device unregistered; the token should not be retried.
    DeviceNotRegistered,
    /// The token is not a push token at all; not retryable either.
    InvalidToken,
    /// Transient or unexpected failure, already retried by the sender.
    Failed(String),
}

impl PushOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, PushOutcome::Sent)
    }
}

/// Push delivery port.
#[async_trait::async_trait]
pub trait PushSender: Send + Sync {
    async fn send(
        &self,
        push_token: &str,
        title: &str,
        body: &str,
        data: &serde_json::Value,
    ) -> PushOutcome;
}

/// Mock push sender. Logs and records pushes instead of sending them.
#[derive(Debug, Default)]
pub struct MockPushSender {
    /// Whether to simulate failures for testing.
    pub simulate_failure: bool,
    sent: Mutex<Vec<PushMessage>>,
}

impl MockPushSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock sender that simulates failures.
    pub fn failing() -> Self {
        Self {
            simulate_failure: true,
            ..Self::default()
        }
    }

    /// Pushes recorded so far.
    pub fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl PushSender for MockPushSender {
    async fn send(
        &self,
        push_token: &str,
        title: &str,
        body: &str,
        data: &serde_json::Value,
    ) -> PushOutcome {
        if self.simulate_failure {
            tracing::warn!(push_token = %push_token, "Mock push sender simulating failure");
            return PushOutcome::Failed("Simulated failure".to_string());
        }

        tracing::info!(push_token = %push_token, title = %title, "Mock: Would send push");

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(PushMessage {
                to: push_token.to_string(),
                title: title.to_string(),
                body: body.to_string(),
                data: data.clone(),
            });
        }
        PushOutcome::Sent
    }
}
