//! # vex-store
//!
//! Local persistence for the vex client, backed by SQLite.
//!
//! Three logical tables live here: `servers` (the trust store of pinned
//! server keys), `accounts` (our registered identity per server) and
//! `chat_messages` (the history cache). The crate exposes a synchronous
//! `Database` handle that wraps a `rusqlite::Connection` and provides typed
//! helpers for each table.

pub mod accounts;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod servers;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
