//! Outbound provider adapters for the domain's mail and push ports.

pub mod email;
pub mod push;

pub use email::{EmailMessage, EmailService};
pub use push::ExpoPushService;
