//! State database trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{
    BuildKey, DebugFileRecord, FetchRecord, NewDebugFile, SyncRunStats, SyncSummary,
};
use crate::dif::DifKind;
use crate::types::BuildKind;

/// Trait for state database operations.
///
/// This trait is object-safe and can be used with `Arc<dyn StateDb>` for
/// shared access across async tasks.
#[async_trait]
pub trait StateDb: Send + Sync {
    /// Return the build's record, creating it unfetched on first sight.
    ///
    /// Bumps `last_seen_at` and never touches the fetched flag of an existing
    /// row.
    async fn get_or_create_build(
        &self,
        key: &BuildKey,
        kind: BuildKind,
    ) -> Result<FetchRecord, StateError>;

    /// Flip the build to fetched.
    ///
    /// Returns false if it was already fetched (or unknown), so a concurrent
    /// run can tell it lost the race.
    async fn mark_fetched(&self, key: &BuildKey) -> Result<bool, StateError>;

    /// Record a failed fetch attempt on an unfetched build.
    async fn record_failure(&self, key: &BuildKey, error: &str) -> Result<(), StateError>;

    /// All builds of a project, in the order they were first seen.
    async fn list_builds(&self, project_id: u64) -> Result<Vec<FetchRecord>, StateError>;

    /// Register a debug file.
    ///
    /// Returns `None` if the (project, debug id, checksum) row already exists.
    async fn insert_debug_file(
        &self,
        file: &NewDebugFile,
    ) -> Result<Option<DebugFileRecord>, StateError>;

    async fn list_debug_files(&self, project_id: u64) -> Result<Vec<DebugFileRecord>, StateError>;

    /// Start a new sync run and return its ID.
    async fn start_sync_run(&self, project_id: u64, source_id: &str) -> Result<i64, StateError>;

    /// Complete a sync run with statistics.
    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats) -> Result<(), StateError>;

    /// Get a summary of the database state, optionally for one project.
    async fn get_summary(&self, project_id: Option<u64>) -> Result<SyncSummary, StateError>;
}

/// SQLite implementation of the state database.
pub struct SqliteStateDb {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync; shared
    /// with the blocking pool for each call.
    conn: Arc<Mutex<Connection>>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

const BUILD_COLUMNS: &str = "project_id, app_id, bundle_id, platform, bundle_short_version, bundle_version, kind, fetched, first_seen_at, last_seen_at, fetched_at, attempts, last_error";

const DEBUG_FILE_COLUMNS: &str =
    "id, project_id, debug_id, checksum, kind, object_name, file_size, stored_path, created_at";

impl SqliteStateDb {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;
            // Another invocation may hold the write lock briefly.
            conn.busy_timeout(std::time::Duration::from_secs(5))
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StateError>
    where
        F: FnOnce(&Connection) -> Result<T, StateError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| StateError::Query(e.to_string()))?;
            f(&guard)
        })
        .await?
    }
}

fn select_build(conn: &Connection, key: &BuildKey) -> Result<Option<FetchRecord>, StateError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM appconnect_builds WHERE project_id = ?1 AND app_id = ?2 AND bundle_id = ?3 AND platform = ?4 AND bundle_short_version = ?5 AND bundle_version = ?6",
            BUILD_COLUMNS
        ),
        rusqlite::params![
            key.project_id as i64,
            key.app_id,
            key.bundle_id,
            key.platform,
            key.bundle_short_version,
            key.bundle_version,
        ],
        row_to_fetch_record,
    )
    .optional()
    .map_err(StateError::query)
}

#[async_trait]
impl StateDb for SqliteStateDb {
    async fn get_or_create_build(
        &self,
        key: &BuildKey,
        kind: BuildKind,
    ) -> Result<FetchRecord, StateError> {
        let now = Utc::now().timestamp();
        let key = key.clone();

        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO appconnect_builds (project_id, app_id, bundle_id, platform, bundle_short_version, bundle_version, kind, fetched, first_seen_at, last_seen_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)
                ON CONFLICT(project_id, app_id, bundle_id, platform, bundle_short_version, bundle_version) DO UPDATE SET
                    last_seen_at = excluded.last_seen_at
                "#,
                rusqlite::params![
                    key.project_id as i64,
                    key.app_id,
                    key.bundle_id,
                    key.platform,
                    key.bundle_short_version,
                    key.bundle_version,
                    kind.as_str(),
                    now,
                ],
            )
            .map_err(StateError::query)?;

            select_build(conn, &key)?
                .ok_or_else(|| StateError::Query("build row missing after upsert".to_string()))
        })
        .await
    }

    async fn mark_fetched(&self, key: &BuildKey) -> Result<bool, StateError> {
        let fetched_at = Utc::now().timestamp();
        let key = key.clone();

        self.with_conn(move |conn| {
            let rows = conn
                .execute(
                    "UPDATE appconnect_builds SET fetched = 1, fetched_at = ?1, last_error = NULL
                     WHERE project_id = ?2 AND app_id = ?3 AND bundle_id = ?4 AND platform = ?5 AND bundle_short_version = ?6 AND bundle_version = ?7 AND fetched = 0",
                    rusqlite::params![
                        fetched_at,
                        key.project_id as i64,
                        key.app_id,
                        key.bundle_id,
                        key.platform,
                        key.bundle_short_version,
                        key.bundle_version,
                    ],
                )
                .map_err(StateError::query)?;
            Ok(rows == 1)
        })
        .await
    }

    async fn record_failure(&self, key: &BuildKey, error: &str) -> Result<(), StateError> {
        let key = key.clone();
        let error = error.to_string();

        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE appconnect_builds SET attempts = attempts + 1, last_error = ?1
                 WHERE project_id = ?2 AND app_id = ?3 AND bundle_id = ?4 AND platform = ?5 AND bundle_short_version = ?6 AND bundle_version = ?7 AND fetched = 0",
                rusqlite::params![
                    error,
                    key.project_id as i64,
                    key.app_id,
                    key.bundle_id,
                    key.platform,
                    key.bundle_short_version,
                    key.bundle_version,
                ],
            )
            .map_err(StateError::query)?;
            Ok(())
        })
        .await
    }

    async fn list_builds(&self, project_id: u64) -> Result<Vec<FetchRecord>, StateError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM appconnect_builds WHERE project_id = ?1 ORDER BY id",
                    BUILD_COLUMNS
                ))
                .map_err(StateError::query)?;

            let records = stmt
                .query_map([project_id as i64], row_to_fetch_record)
                .map_err(StateError::query)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(StateError::query)?;
            Ok(records)
        })
        .await
    }

    async fn insert_debug_file(
        &self,
        file: &NewDebugFile,
    ) -> Result<Option<DebugFileRecord>, StateError> {
        let created_at = Utc::now().timestamp();
        let file = file.clone();

        self.with_conn(move |conn| {
            let rows = conn
                .execute(
                    r#"
                    INSERT OR IGNORE INTO debug_files (project_id, debug_id, checksum, kind, object_name, file_size, stored_path, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    rusqlite::params![
                        file.project_id as i64,
                        file.debug_id,
                        file.checksum,
                        file.kind.as_str(),
                        file.object_name,
                        file.file_size as i64,
                        file.stored_path.to_string_lossy(),
                        created_at,
                    ],
                )
                .map_err(StateError::query)?;

            if rows == 0 {
                return Ok(None);
            }

            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {} FROM debug_files WHERE id = ?1", DEBUG_FILE_COLUMNS),
                [id],
                row_to_debug_file,
            )
            .optional()
            .map_err(StateError::query)
        })
        .await
    }

    async fn list_debug_files(&self, project_id: u64) -> Result<Vec<DebugFileRecord>, StateError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM debug_files WHERE project_id = ?1 ORDER BY id",
                    DEBUG_FILE_COLUMNS
                ))
                .map_err(StateError::query)?;

            let records = stmt
                .query_map([project_id as i64], row_to_debug_file)
                .map_err(StateError::query)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(StateError::query)?;
            Ok(records)
        })
        .await
    }

    async fn start_sync_run(&self, project_id: u64, source_id: &str) -> Result<i64, StateError> {
        let started_at = Utc::now().timestamp();
        let source_id = source_id.to_string();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sync_runs (project_id, source_id, started_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![project_id as i64, source_id, started_at],
            )
            .map_err(StateError::query)?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats) -> Result<(), StateError> {
        let completed_at = Utc::now().timestamp();
        let stats = stats.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE sync_runs SET completed_at = ?1, builds_seen = ?2, builds_fetched = ?3, builds_failed = ?4, builds_no_artifact = ?5, debug_files_created = ?6, cap_reached = ?7, error = ?8 WHERE id = ?9",
                rusqlite::params![
                    completed_at,
                    stats.builds_seen as i64,
                    stats.builds_fetched as i64,
                    stats.builds_failed as i64,
                    stats.builds_no_artifact as i64,
                    stats.debug_files_created as i64,
                    stats.cap_reached,
                    stats.error,
                    run_id,
                ],
            )
            .map_err(StateError::query)?;
            Ok(())
        })
        .await
    }

    async fn get_summary(&self, project_id: Option<u64>) -> Result<SyncSummary, StateError> {
        // NULL matches every project.
        let project = project_id.map(|id| id as i64);

        self.with_conn(move |conn| {
            let count = |sql: &str| -> Result<u64, StateError> {
                conn.query_row(sql, [project], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(StateError::query)
            };

            let total_builds = count(
                "SELECT COUNT(*) FROM appconnect_builds WHERE ?1 IS NULL OR project_id = ?1",
            )?;
            let fetched_builds = count(
                "SELECT COUNT(*) FROM appconnect_builds WHERE (?1 IS NULL OR project_id = ?1) AND fetched = 1",
            )?;
            let failing_builds = count(
                "SELECT COUNT(*) FROM appconnect_builds WHERE (?1 IS NULL OR project_id = ?1) AND fetched = 0 AND last_error IS NOT NULL",
            )?;
            let debug_files =
                count("SELECT COUNT(*) FROM debug_files WHERE ?1 IS NULL OR project_id = ?1")?;

            let last_sync: Option<(i64, Option<i64>, Option<String>)> = conn
                .query_row(
                    "SELECT started_at, completed_at, error FROM sync_runs WHERE ?1 IS NULL OR project_id = ?1 ORDER BY id DESC LIMIT 1",
                    [project],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(StateError::query)?;

            let (last_sync_started, last_sync_completed, last_sync_error) = match last_sync {
                Some((started, completed, error)) => {
                    (timestamp(Some(started)), timestamp(completed), error)
                }
                None => (None, None, None),
            };

            Ok(SyncSummary {
                total_builds,
                fetched_builds,
                pending_builds: total_builds - fetched_builds,
                failing_builds,
                debug_files,
                last_sync_started,
                last_sync_completed,
                last_sync_error,
            })
        })
        .await
    }
}

fn timestamp(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single())
}

fn unknown_kind(column: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unknown kind '{}'", value).into(),
    )
}

fn row_to_fetch_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FetchRecord> {
    let kind: String = row.get(6)?;
    let attempts: i64 = row.get(11)?;
    Ok(FetchRecord {
        key: BuildKey {
            project_id: row.get::<_, i64>(0)? as u64,
            app_id: row.get(1)?,
            bundle_id: row.get(2)?,
            platform: row.get(3)?,
            bundle_short_version: row.get(4)?,
            bundle_version: row.get(5)?,
        },
        kind: BuildKind::from_db_str(&kind).ok_or_else(|| unknown_kind(6, &kind))?,
        fetched: row.get(7)?,
        first_seen_at: timestamp(row.get(8)?).unwrap_or(DateTime::UNIX_EPOCH),
        last_seen_at: timestamp(row.get(9)?).unwrap_or(DateTime::UNIX_EPOCH),
        fetched_at: timestamp(row.get(10)?),
        attempts: attempts as u32,
        last_error: row.get(12)?,
    })
}

fn row_to_debug_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<DebugFileRecord> {
    let kind: String = row.get(4)?;
    let stored_path: String = row.get(7)?;
    Ok(DebugFileRecord {
        id: row.get(0)?,
        project_id: row.get::<_, i64>(1)? as u64,
        debug_id: row.get(2)?,
        checksum: row.get(3)?,
        kind: DifKind::from_db_str(&kind).ok_or_else(|| unknown_kind(4, &kind))?,
        object_name: row.get(5)?,
        file_size: row.get::<_, i64>(6)? as u64,
        stored_path: PathBuf::from(stored_path),
        created_at: timestamp(row.get(8)?).unwrap_or(DateTime::UNIX_EPOCH),
    })
}
