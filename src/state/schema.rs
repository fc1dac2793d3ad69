//! Database schema definitions and migrations.

use rusqlite::Connection;

use super::error::StateError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 2;

/// Schema DDL for version 1.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS appconnect_builds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    app_id TEXT NOT NULL,
    bundle_id TEXT NOT NULL,
    platform TEXT NOT NULL,
    bundle_short_version TEXT NOT NULL,
    bundle_version TEXT NOT NULL,
    kind TEXT NOT NULL,
    fetched INTEGER NOT NULL DEFAULT 0,
    first_seen_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,
    fetched_at INTEGER,
    UNIQUE (project_id, app_id, bundle_id, platform, bundle_short_version, bundle_version)
);

CREATE INDEX IF NOT EXISTS idx_appconnect_builds_fetched ON appconnect_builds(project_id, fetched);

CREATE TABLE IF NOT EXISTS debug_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    debug_id TEXT NOT NULL,
    checksum TEXT NOT NULL,
    kind TEXT NOT NULL,
    object_name TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    stored_path TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (project_id, debug_id, checksum)
);

CREATE INDEX IF NOT EXISTS idx_debug_files_checksum ON debug_files(checksum);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    source_id TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    builds_seen INTEGER DEFAULT 0,
    builds_fetched INTEGER DEFAULT 0,
    builds_failed INTEGER DEFAULT 0,
    builds_no_artifact INTEGER DEFAULT 0,
    debug_files_created INTEGER DEFAULT 0,
    cap_reached INTEGER DEFAULT 0
);
"#;

/// Version 2 adds failure bookkeeping to builds and run-level errors.
const SCHEMA_V2: &str = r#"
ALTER TABLE appconnect_builds ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0;
ALTER TABLE appconnect_builds ADD COLUMN last_error TEXT;
ALTER TABLE sync_runs ADD COLUMN error TEXT;
"#;

/// Get the current schema version from the database.
pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StateError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initialize or migrate the database schema.
///
/// Idempotent: safe to call on both new and existing databases.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StateError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        migrate_to_version(conn, version)?;
    }

    Ok(())
}

fn migrate_to_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    let ddl = match version {
        1 => SCHEMA_V1,
        2 => SCHEMA_V2,
        other => {
            return Err(StateError::UnsupportedSchemaVersion {
                found: other,
                expected: SCHEMA_VERSION,
            })
        }
    };
    conn.execute_batch(ddl)?;
    set_schema_version(conn, version)?;
    tracing::debug!("Migrated database to schema version {}", version);
    Ok(())
}
