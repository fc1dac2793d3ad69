use thiserror::Error;

/// Errors from the legacy iTunes Connect session API.
#[derive(Debug, Error)]
pub enum ITunesError {
    /// The `myacinfo` cookie is expired or was rejected. Only a user can fix
    /// this by refreshing the session.
    #[error("iTunes Connect session is invalid: {0}")]
    InvalidSession(String),

    /// The build exists but Apple has no dSYM archive for it (bitcode not
    /// recompiled yet, or the build never had one).
    #[error("No dSYM archive available for build {build}")]
    NoArtifact { build: String },

    #[error("Failed to download dSYMs for build {build} (status={status:?}): {message}")]
    DownloadFailed {
        build: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Request to iTunes Connect failed: {0}")]
    Network(#[from] reqwest::Error),
}

impl ITunesError {
    pub fn is_transient(&self) -> bool {
        match self {
            ITunesError::DownloadFailed { status: None, .. } => true,
            ITunesError::DownloadFailed {
                status: Some(status),
                ..
            } => *status == 429 || *status >= 500,
            ITunesError::Network(_) => true,
            ITunesError::InvalidSession(_) | ITunesError::NoArtifact { .. } => false,
        }
    }
}
