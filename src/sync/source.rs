//! Seams between the orchestrator and the two Apple clients.

use std::path::Path;

use async_trait::async_trait;

use crate::appconnect::{AppConnectClient, AppConnectError, BuildInfo};
use crate::itunes::{ITunesClient, ITunesError};
use crate::types::BuildKind;

/// Something that can enumerate an app's builds.
#[async_trait]
pub trait BuildSource: Send + Sync {
    async fn list_builds(&self, kind: BuildKind) -> Result<Vec<BuildInfo>, AppConnectError>;
}

/// Something that can download a build's dSYM archive to a path.
#[async_trait]
pub trait DsymSource: Send + Sync {
    async fn download_dsyms(&self, build: &BuildInfo, path: &Path) -> Result<u64, ITunesError>;
}

#[async_trait]
impl BuildSource for AppConnectClient {
    async fn list_builds(&self, kind: BuildKind) -> Result<Vec<BuildInfo>, AppConnectError> {
        AppConnectClient::list_builds(self, kind).await
    }
}

#[async_trait]
impl DsymSource for ITunesClient {
    async fn download_dsyms(&self, build: &BuildInfo, path: &Path) -> Result<u64, ITunesError> {
        ITunesClient::download_dsyms(self, build, path).await
    }
}
