//! Persistent sync state.
//!
//! SQLite-backed tracking of which builds have had their dSYMs fetched, which
//! debug files were registered, and the history of sync runs. This enables:
//! - Resuming at the first unfetched build on every run
//! - Deduplicating debug files by checksum
//! - Status reporting

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SqliteStateDb, StateDb};
pub use error::StateError;
pub use types::{BuildKey, DebugFileRecord, FetchRecord, NewDebugFile, SyncRunStats, SyncSummary};
