use thiserror::Error;

/// Errors resolving an `appStoreConnect` symbol source for a project.
///
/// Both variants are configuration problems: retrying will not help until an
/// operator fixes the project's symbol source settings.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Project {project_id} not found")]
    ProjectNotFound { project_id: u64 },

    #[error("appStoreConnect symbol source '{id}' not found in project's symbol sources")]
    NotFound { id: String },

    #[error("Invalid appStoreConnect symbol source config: {0}")]
    InvalidConfig(String),
}

impl SourceError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
