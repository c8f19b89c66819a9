//! HTTP route handlers.

pub mod admin;
pub mod auth;
pub mod events;
pub mod health;
pub mod referrals;
pub mod tokens;
pub mod users;
