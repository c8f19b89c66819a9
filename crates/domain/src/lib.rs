//! Domain layer for the food-sharing backend.
//!
//! This crate contains:
//! - Domain models (User, Event, VerificationCode, HostRequest, Referral)
//! - The transactional store ports and an in-memory store
//! - Token, admission, account, admin and recommendation services
//! - Domain error types

pub mod errors;
pub mod models;
pub mod services;
pub mod store;
