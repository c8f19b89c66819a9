//! Domain services for the food-sharing backend.
//!
//! Each service owns an `Arc<dyn Store>` and runs every logical operation in
//! a single store transaction. Outbound email and push traffic is queued on
//! the [`Outbox`] only after the transaction commits.

pub mod account;
pub mod admin;
pub mod admission;
pub mod email;
pub mod notification;
pub mod outbox;
pub mod recommendation;
pub mod token;

pub use account::{
    AccountPolicy, AccountService, HostSignupRequest, LoginOutcome, SignupOutcome, SignupRequest,
};
pub use admin::{AdminService, BroadcastReport};
pub use admission::{AdmissionController, DEFAULT_THRESHOLD_PROPERTY};
pub use email::{MailError, Mailer, MockMailer, SentMail};
pub use notification::{MockPushSender, NotificationType, PushMessage, PushOutcome, PushSender};
pub use outbox::{spawn_outbox, OutboundMessage, Outbox, OutboxConfig, OutboxHandle};
pub use recommendation::{
    should_recommend, RecommendOptions, RecommendationReport, RecommendationService,
};
pub use token::{TokenService, TokenSettings};
