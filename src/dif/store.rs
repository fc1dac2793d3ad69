//! Where extracted debug files end up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempPath;

use super::classify::DifKind;
use super::error::DifError;
use crate::state::{DebugFileRecord, NewDebugFile, StateDb};

/// A classified debug file extracted to a temporary path in the store's
/// staging directory. The file is removed when this is dropped.
#[derive(Debug)]
pub struct StagedFile {
    /// Entry path inside the archive.
    pub object_name: String,
    pub kind: DifKind,
    pub debug_ids: Vec<String>,
    /// Hex-encoded SHA-256.
    pub checksum: String,
    pub size: u64,
    pub path: TempPath,
}

/// A project's debug file store.
#[async_trait]
pub trait DebugFileStore: Send + Sync {
    /// Directory for staged files. Must be on the same filesystem as the
    /// store so blobs can be moved in cheaply.
    fn staging_dir(&self) -> &Path;

    /// Persist a staged file under each of its debug ids.
    ///
    /// Returns the records that were newly created; files already known by
    /// (project, debug id, checksum) are not created again.
    async fn register(
        &self,
        project_id: u64,
        file: StagedFile,
    ) -> Result<Vec<DebugFileRecord>, DifError>;
}

/// Filesystem store keeping blobs at `<root>/<project>/<debug id>/<checksum>`
/// and their metadata in the state database.
pub struct FsDebugFileStore {
    root: PathBuf,
    staging: PathBuf,
    db: Arc<dyn StateDb>,
}

impl std::fmt::Debug for FsDebugFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsDebugFileStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl FsDebugFileStore {
    pub async fn open(root: &Path, db: Arc<dyn StateDb>) -> Result<Self, DifError> {
        let staging = root.join(".staging");
        tokio::fs::create_dir_all(&staging).await?;
        Ok(Self {
            root: root.to_path_buf(),
            staging,
            db,
        })
    }

    fn blob_path(&self, project_id: u64, debug_id: &str, checksum: &str) -> PathBuf {
        self.root
            .join(project_id.to_string())
            .join(debug_id)
            .join(checksum)
    }
}

#[async_trait]
impl DebugFileStore for FsDebugFileStore {
    fn staging_dir(&self) -> &Path {
        &self.staging
    }

    async fn register(
        &self,
        project_id: u64,
        file: StagedFile,
    ) -> Result<Vec<DebugFileRecord>, DifError> {
        let mut created = Vec::new();

        for debug_id in &file.debug_ids {
            let target = self.blob_path(project_id, debug_id, &file.checksum);

            // Same checksum means same bytes, so an existing blob is reused.
            if !tokio::fs::try_exists(&target).await? {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let partial = target.with_extension("part");
                tokio::fs::copy(&file.path, &partial).await?;
                tokio::fs::rename(&partial, &target).await?;
            }

            let record = self
                .db
                .insert_debug_file(&NewDebugFile {
                    project_id,
                    debug_id: debug_id.clone(),
                    checksum: file.checksum.clone(),
                    kind: file.kind,
                    object_name: file.object_name.clone(),
                    file_size: file.size,
                    stored_path: target.clone(),
                })
                .await?;

            match record {
                Some(record) => {
                    tracing::debug!(
                        project_id,
                        debug_id = %debug_id,
                        kind = %file.kind,
                        object = %file.object_name,
                        "Registered debug file"
                    );
                    created.push(record);
                }
                None => tracing::debug!(
                    project_id,
                    debug_id = %debug_id,
                    "Debug file already registered, skipping"
                ),
            }
        }

        Ok(created)
    }
}
