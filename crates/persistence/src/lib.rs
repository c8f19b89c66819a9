//! Persistence layer for the food-sharing backend.
//!
//! This crate contains:
//! - Database connection management and migrations
//! - Entity definitions (database row mappings)
//! - `PgStore`, the PostgreSQL implementation of the domain store ports

pub mod db;
pub mod entities;
pub mod metrics;
pub mod store;

pub use store::PgStore;
