//! chatvault-core: embedded message store for chat clients
//!
//! This crate persists inbound and outbound chat messages in SQLite, keeps a
//! per-chat latest-message summary and per-message reaction aggregates in
//! memory, and reconciles linked identities (LIDs) with phone-number
//! identities as mappings become known.
//!
//! All mutations go through a single [`write_queue::WriteQueue`] worker so
//! writes are strictly ordered; reads go straight to the connection pool.

pub mod chat_list;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod identity;
pub mod jid;
pub mod messages;
pub mod migrate;
pub mod models;
pub mod query;
pub mod reactions;
pub mod schema;
pub mod store;
pub mod write_queue;

pub use config::Config;
pub use db::Database;
pub use error::Error;
pub use error::Result;
pub use identity::{IdentityResolver, MemoryResolver};
pub use jid::Jid;
pub use store::MessageStore;

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "chatvault";

/// Returns the environment variable prefix for this application.
pub fn env_prefix() -> String {
    "CHATVAULT".to_string()
}
