//! Ingestion of dSYM archives into a project's debug file store.
//!
//! Extraction and classification are blocking and run on the blocking pool;
//! registration with the store is async.

pub mod classify;
pub mod error;
pub mod store;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

pub use self::classify::DifKind;
pub use self::error::DifError;
pub use self::store::{DebugFileStore, FsDebugFileStore, StagedFile};
use crate::state::DebugFileRecord;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Unpack a zip of debug files and register every recognized file.
///
/// Fails with [`DifError::CorruptArchive`] only when the archive itself
/// cannot be opened; unreadable or unrecognized entries are skipped.
pub async fn create_files_from_dif_zip(
    store: &dyn DebugFileStore,
    project_id: u64,
    archive: &Path,
) -> Result<Vec<DebugFileRecord>, DifError> {
    let archive = archive.to_path_buf();
    let staging = store.staging_dir().to_path_buf();
    let staged = tokio::task::spawn_blocking(move || stage_archive(&archive, &staging)).await??;

    let mut created = Vec::new();
    for file in staged {
        created.extend(store.register(project_id, file).await?);
    }
    Ok(created)
}

/// Extract and classify every entry of the archive into `staging`.
fn stage_archive(archive: &Path, staging: &Path) -> Result<Vec<StagedFile>, DifError> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| DifError::CorruptArchive(format!("{}: {}", archive.display(), e)))?;

    let mut staged = Vec::new();
    for index in 0..zip.len() {
        let mut entry = match zip.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(index, error = %e, "Skipping unreadable archive entry");
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();

        match stage_entry(&name, &mut entry, staging) {
            Ok(Some(file)) => staged.push(file),
            Ok(None) => tracing::debug!(entry = %name, "Not a debug file, skipping"),
            Err(e) => tracing::debug!(entry = %name, error = %e, "Malformed archive entry, skipping"),
        }
    }

    tracing::debug!(
        archive = %archive.display(),
        entries = zip.len(),
        debug_files = staged.len(),
        "Staged dSYM archive"
    );
    Ok(staged)
}

fn stage_entry<R: Read>(
    name: &str,
    entry: &mut R,
    staging: &Path,
) -> std::io::Result<Option<StagedFile>> {
    let mut temp = tempfile::Builder::new()
        .prefix("dif-")
        .tempfile_in(staging)?;

    let mut hasher = Sha256::new();
    let mut size: u64 = 0;
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = entry.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        temp.write_all(&buf[..n])?;
        size += n as u64;
    }
    temp.flush()?;

    let file = temp.as_file_mut();
    file.seek(SeekFrom::Start(0))?;
    let Some(classified) = classify::classify(name, file)? else {
        return Ok(None);
    };

    Ok(Some(StagedFile {
        object_name: name.to_string(),
        kind: classified.kind,
        debug_ids: classified.debug_ids,
        checksum: hex(&hasher.finalize()),
        size,
        path: temp.into_temp_path(),
    }))
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}
