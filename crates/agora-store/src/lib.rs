//! # agora-store
//!
//! Durable client-side storage for the Agora chat client, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection`. Its only tenant today is the conversation activity
//! history used to rank the roster, stored as three JSON documents in a
//! key/value table so the layout survives reloads unchanged.

pub mod activity;
pub mod database;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
