//! Types for the state tracking module.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::appconnect::BuildInfo;
use crate::dif::DifKind;
use crate::types::BuildKind;

/// Unique identity of a build within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildKey {
    pub project_id: u64,
    pub app_id: String,
    pub bundle_id: String,
    pub platform: String,
    /// Human-readable version, e.g. "7.2.0".
    pub bundle_short_version: String,
    /// Build number.
    pub bundle_version: String,
}

impl BuildKey {
    pub fn for_build(project_id: u64, bundle_id: &str, build: &BuildInfo) -> Self {
        Self {
            project_id,
            app_id: build.app_id.clone(),
            bundle_id: bundle_id.to_string(),
            platform: build.platform.clone(),
            bundle_short_version: build.version.clone(),
            bundle_version: build.build_number.clone(),
        }
    }
}

/// Whether a build's dSYMs have been fetched, plus bookkeeping.
///
/// `fetched` only ever goes from false to true.
#[derive(Debug, Clone)]
pub struct FetchRecord {
    pub key: BuildKey,
    pub kind: BuildKind,
    pub fetched: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Failed fetch attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// A debug file about to be registered.
#[derive(Debug, Clone)]
pub struct NewDebugFile {
    pub project_id: u64,
    pub debug_id: String,
    /// Hex-encoded SHA-256 of the file contents.
    pub checksum: String,
    pub kind: DifKind,
    /// Entry path inside the archive it came from.
    pub object_name: String,
    pub file_size: u64,
    pub stored_path: PathBuf,
}

/// A registered debug file.
#[derive(Debug, Clone)]
pub struct DebugFileRecord {
    pub id: i64,
    pub project_id: u64,
    pub debug_id: String,
    pub checksum: String,
    pub kind: DifKind,
    pub object_name: String,
    pub file_size: u64,
    pub stored_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Counters for a single sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRunStats {
    pub builds_seen: u64,
    pub builds_fetched: u64,
    pub builds_failed: u64,
    pub builds_no_artifact: u64,
    pub debug_files_created: u64,
    /// The per-run cap stopped the loop before the listing was exhausted.
    pub cap_reached: bool,
    /// Set when the run aborted.
    pub error: Option<String>,
}

/// Summary of the state database.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub total_builds: u64,
    pub fetched_builds: u64,
    pub pending_builds: u64,
    /// Unfetched builds whose last attempt failed.
    pub failing_builds: u64,
    pub debug_files: u64,
    pub last_sync_started: Option<DateTime<Utc>>,
    pub last_sync_completed: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
}
