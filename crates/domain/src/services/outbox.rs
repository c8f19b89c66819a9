//! Off-path delivery of emails and push notifications.
//!
//! Services enqueue [`OutboundMessage`]s after their transaction commits. A
//! fixed pool of tokio workers drains the queue and calls the [`Mailer`] and
//! [`PushSender`] ports. Delivery is best-effort: a full queue or a provider
//! failure is logged and counted, never reported to the enqueuing operation.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::email::Mailer;
use super::notification::{PushMessage, PushOutcome, PushSender};

/// A side effect waiting for delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    VerificationEmail { to: String, code: String },
    PasswordResetEmail { to: String, token: String },
    Push(PushMessage),
}

impl OutboundMessage {
    fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::VerificationEmail { .. } => "verification_email",
            OutboundMessage::PasswordResetEmail { .. } => "password_reset_email",
            OutboundMessage::Push(_) => "push",
        }
    }
}

/// Sizing for the delivery pool.
#[derive(Debug, Clone, Copy)]
pub struct OutboxConfig {
    /// Queue capacity; enqueues beyond it are dropped.
    pub capacity: usize,
    /// Number of concurrent delivery workers.
    pub workers: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            workers: 4,
        }
    }
}

/// Cloneable producer side of the delivery queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<OutboundMessage>,
}

impl Outbox {
    /// Outbox without workers; the caller owns the receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queues a message without waiting. Returns whether it was accepted.
    pub fn enqueue(&self, message: OutboundMessage) -> bool {
        let kind = message.kind();
        match self.tx.try_send(message) {
            Ok(()) => {
                counter!("outbox_enqueued_total", "kind" => kind).increment(1);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(kind = kind, "Outbox full, dropping message");
                counter!("outbox_dropped_total", "kind" => kind).increment(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(kind = kind, "Outbox closed, dropping message");
                counter!("outbox_dropped_total", "kind" => kind).increment(1);
                false
            }
        }
    }
}

/// Join handle for the worker pool.
pub struct OutboxHandle {
    handles: Vec<JoinHandle<()>>,
}

impl OutboxHandle {
    /// Waits for the workers to drain and exit.
    ///
    /// Workers exit once every [`Outbox`] clone has been dropped and the
    /// queue is empty.
    pub async fn join(self, timeout: Duration) {
        let drained = async {
            for handle in self.handles {
                if let Err(e) = handle.await {
                    warn!("Outbox worker panicked: {}", e);
                }
            }
        };

        match tokio::time::timeout(timeout, drained).await {
            Ok(()) => info!("Outbox drained"),
            Err(_) => warn!("Outbox drain timed out after {:?}", timeout),
        }
    }
}

/// Starts the delivery pool.
pub fn spawn_outbox(
    mailer: Arc<dyn Mailer>,
    push: Arc<dyn PushSender>,
    config: OutboxConfig,
) -> (Outbox, OutboxHandle) {
    let (outbox, rx) = Outbox::channel(config.capacity);
    let rx = Arc::new(Mutex::new(rx));
    let workers = config.workers.max(1);

    info!(
        workers = workers,
        capacity = config.capacity,
        "Starting outbox workers"
    );

    let handles = (0..workers)
        .map(|worker| {
            let rx = Arc::clone(&rx);
            let mailer = Arc::clone(&mailer);
            let push = Arc::clone(&push);

            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    match next {
                        Some(message) => deliver(mailer.as_ref(), push.as_ref(), message).await,
                        None => break,
                    }
                }
                debug!(worker = worker, "Outbox worker stopped");
            })
        })
        .collect();

    (outbox, OutboxHandle { handles })
}

/// Delivers one message, logging instead of propagating failures.
pub async fn deliver(mailer: &dyn Mailer, push: &dyn PushSender, message: OutboundMessage) {
    let kind = message.kind();

    let delivered = match message {
        OutboundMessage::VerificationEmail { to, code } => {
            match mailer.send_verification_email(&to, &code).await {
                Ok(()) => true,
                Err(e) => {
                    error!(to = %to, error = %e, "Failed to send verification email");
                    false
                }
            }
        }
        OutboundMessage::PasswordResetEmail { to, token } => {
            match mailer.send_password_reset_email(&to, &token).await {
                Ok(()) => true,
                Err(e) => {
                    error!(to = %to, error = %e, "Failed to send password reset email");
                    false
                }
            }
        }
        OutboundMessage::Push(msg) => {
            match push.send(&msg.to, &msg.title, &msg.body, &msg.data).await {
                PushOutcome::Sent => true,
                PushOutcome::DeviceNotRegistered => {
                    warn!(push_token = %msg.to, "Device not registered for push");
                    false
                }
                PushOutcome::InvalidToken => {
                    warn!(push_token = %msg.to, "Invalid push token");
                    false
                }
                PushOutcome::Failed(e) => {
                    error!(push_token = %msg.to, error = %e, "Push delivery failed");
                    false
                }
            }
        }
    };

    if delivered {
        counter!("outbox_delivered_total", "kind" => kind).increment(1);
    } else {
        counter!("outbox_failed_total", "kind" => kind).increment(1);
    }
}
