//! Shared primitives for the food-sharing backend.
//!
//! Everything here is free of I/O:
//! - Kind-tagged JWT encoding and per-kind key derivation
//! - Password hashing with Argon2id
//! - Verification code generation
//! - Field validation helpers

pub mod crypto;
pub mod jwt;
pub mod password;
pub mod validation;
