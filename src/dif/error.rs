use thiserror::Error;

use crate::state::StateError;

/// Errors unpacking a dSYM archive into the debug file store.
#[derive(Debug, Error)]
pub enum DifError {
    /// The archive could not be opened at all. Individual bad entries are
    /// skipped instead.
    #[error("Corrupt dSYM archive: {0}")]
    CorruptArchive(String),

    #[error("Debug file store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Archive extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
