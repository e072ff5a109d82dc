//! Persistence boundary for users, whitelist entries, and notifications.
//!
//! This crate provides:
//! - `Store` trait consumed by the enforcement engine
//! - `PgStore`, backed by PostgreSQL through `sqlx`
//! - `MemoryStore`, a process-local implementation for tests and dry runs
//!
//! Reads return empty collections when nothing matches; every write is
//! atomic per record.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use traits::{NotificationQuery, Store, WhitelistQuery, WhitelistSelector};
