use std::path::PathBuf;

use thiserror::Error;

use crate::appconnect::AppConnectError;
use crate::dif::DifError;
use crate::itunes::ITunesError;
use crate::sources::SourceError;
use crate::state::StateError;

/// Everything that can stop a sync or a single build's fetch.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    AppConnect(#[from] AppConnectError),

    #[error(transparent)]
    ITunes(#[from] ITunesError),

    #[error(transparent)]
    Dif(#[from] DifError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Another sync is already running for project {project_id} source '{source_id}' (lock: {path})")]
    AlreadyRunning {
        project_id: u64,
        source_id: String,
        path: PathBuf,
    },

    #[error("Sync I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Errors that will not go away on the next run without someone fixing
    /// the configuration or credentials.
    pub fn is_permanent(&self) -> bool {
        match self {
            SyncError::Source(_) => true,
            SyncError::AppConnect(e) => matches!(
                e,
                AppConnectError::InvalidCredentials { .. } | AppConnectError::InvalidKey(_)
            ),
            SyncError::ITunes(e) => matches!(e, ITunesError::InvalidSession(_)),
            SyncError::Dif(_)
            | SyncError::State(_)
            | SyncError::AlreadyRunning { .. }
            | SyncError::Io(_) => false,
        }
    }

    /// Errors likely to clear up by the next run without intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::AppConnect(e) => e.is_transient(),
            SyncError::ITunes(e) => e.is_transient(),
            SyncError::AlreadyRunning { .. } => true,
            _ => false,
        }
    }

    /// Actionable hint for permanent errors.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            SyncError::Source(SourceError::ProjectNotFound { .. }) => {
                Some("Check the project id against your projects file.")
            }
            SyncError::Source(_) => {
                Some("Fix the App Store Connect symbol source in the project's settings.")
            }
            SyncError::AppConnect(AppConnectError::InvalidCredentials { .. })
            | SyncError::AppConnect(AppConnectError::InvalidKey(_)) => Some(
                "Check the App Store Connect API key, issuer and private key of the symbol source.",
            ),
            SyncError::ITunes(ITunesError::InvalidSession(_)) => {
                Some("Reconnect your App Store Connect session to refresh the iTunes cookie.")
            }
            _ => None,
        }
    }
}
