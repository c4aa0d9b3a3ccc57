//! # agora-store
//!
//! Durable local journal for a graph replica, backed by SQLite.
//!
//! Every field write accepted by the replica is recorded here before it is
//! propagated, so nothing written while offline is lost on restart. The
//! crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection`.

pub mod database;
pub mod journal;
pub mod migrations;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use journal::JournalRow;
