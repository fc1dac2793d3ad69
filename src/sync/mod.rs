//! Build sync orchestration.
//!
//! One invocation syncs one App Store Connect source of one project: resolve
//! the source, authenticate against both Apple APIs, list builds, and fetch
//! the dSYMs of builds not fetched yet, at most `max_builds_per_run` per
//! invocation. Re-running resumes at the first unfetched build.

pub mod error;
pub mod source;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs4::fs_std::FileExt;

pub use self::error::SyncError;
pub use self::source::{BuildSource, DsymSource};
use crate::appconnect::{AppConnectClient, BuildInfo};
use crate::dif::{self, DebugFileStore, DifError};
use crate::endpoints::Endpoints;
use crate::itunes::{ITunesClient, ITunesError};
use crate::project::ProjectStore;
use crate::sources::{self, SourceConfig};
use crate::state::{BuildKey, DebugFileRecord, StateDb, SyncRunStats};
use crate::types::BuildKind;

/// Builds fetched per invocation unless configured otherwise.
pub const DEFAULT_MAX_BUILDS_PER_RUN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncLimits {
    /// Download attempts per invocation, counting successes, missing
    /// artifacts and failures alike.
    pub max_builds_per_run: usize,
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            max_builds_per_run: DEFAULT_MAX_BUILDS_PER_RUN,
        }
    }
}

/// Everything a sync needs besides the project and source to sync.
pub struct SyncContext {
    pub db: Arc<dyn StateDb>,
    pub store: Arc<dyn DebugFileStore>,
    pub endpoints: Endpoints,
    pub limits: SyncLimits,
    /// Scratch space for downloaded archives.
    pub work_dir: PathBuf,
    /// Run lock files live here.
    pub lock_dir: PathBuf,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("endpoints", &self.endpoints)
            .field("limits", &self.limits)
            .field("work_dir", &self.work_dir)
            .field("lock_dir", &self.lock_dir)
            .finish_non_exhaustive()
    }
}

/// Outcome of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub builds_seen: u64,
    pub already_fetched: u64,
    pub fetched: u64,
    pub failed: u64,
    pub no_artifact: u64,
    /// The per-run cap stopped the loop with unfetched builds left.
    pub cap_reached: bool,
    pub debug_files_created: u64,
}

impl SyncReport {
    fn to_stats(&self, error: Option<String>) -> SyncRunStats {
        SyncRunStats {
            builds_seen: self.builds_seen,
            builds_fetched: self.fetched,
            builds_failed: self.failed,
            builds_no_artifact: self.no_artifact,
            debug_files_created: self.debug_files_created,
            cap_reached: self.cap_reached,
            error,
        }
    }
}

/// Sync dSYMs for the App Store Connect source `source_id` of a project.
///
/// Fails on unresolvable configuration, rejected credentials, listing
/// failures and database faults. Per-build problems are recorded and
/// skipped.
pub async fn dsym_download(
    ctx: &SyncContext,
    projects: &ProjectStore,
    project_id: u64,
    source_id: &str,
) -> Result<SyncReport, SyncError> {
    let project = projects.get(project_id)?;
    let config = sources::get_app_store_config(project, source_id)?;

    let _lock = acquire_run_lock(&ctx.lock_dir, project_id, source_id).await?;
    let run_id = ctx.db.start_sync_run(project_id, source_id).await?;

    let mut report = SyncReport::default();
    let result = sync_source(ctx, project_id, &config, &mut report).await;

    let error = result.as_ref().err().map(|e| e.to_string());
    if let Err(e) = ctx
        .db
        .complete_sync_run(run_id, &report.to_stats(error))
        .await
    {
        tracing::warn!(run_id, error = %e, "Failed to record sync run");
    }

    result.map(|()| report)
}

async fn sync_source(
    ctx: &SyncContext,
    project_id: u64,
    config: &SourceConfig,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    // Both clients are validated before any listing, so a dead session is
    // reported without touching the REST API.
    let api = AppConnectClient::from_config(config, &ctx.endpoints)?;
    let itunes = ITunesClient::from_config(config, &ctx.endpoints).await?;

    fetch_missing_builds(ctx, project_id, config.bundle_id(), &api, &itunes, report).await
}

/// Fetch dSYMs for unfetched builds, in listing order, up to the per-run cap.
pub async fn fetch_missing_builds(
    ctx: &SyncContext,
    project_id: u64,
    bundle_id: &str,
    builds: &dyn BuildSource,
    dsyms: &dyn DsymSource,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    let listed = builds.list_builds(BuildKind::All).await?;

    // A build promoted to the store shows up as both pre-release and release;
    // the first listing wins.
    let mut seen = HashSet::new();
    let unique: Vec<(BuildKey, &BuildInfo)> = listed
        .iter()
        .filter_map(|build| {
            let key = BuildKey::for_build(project_id, bundle_id, build);
            if seen.insert(key.clone()) {
                Some((key, build))
            } else {
                tracing::debug!(build = %build, "Build listed twice, skipping duplicate");
                None
            }
        })
        .collect();
    report.builds_seen = unique.len() as u64;
    tracing::info!(project_id, builds = unique.len(), "Listed App Store Connect builds");

    let mut processed = 0usize;
    for (key, build) in unique {
        let record = ctx.db.get_or_create_build(&key, build.kind).await?;
        if record.fetched {
            report.already_fetched += 1;
            continue;
        }

        if processed >= ctx.limits.max_builds_per_run {
            tracing::info!(
                project_id,
                limit = ctx.limits.max_builds_per_run,
                "Reached per-run build limit, remaining builds left for the next run"
            );
            report.cap_reached = true;
            break;
        }
        processed += 1;

        match fetch_build(ctx, project_id, build, &key, dsyms).await {
            Ok(created) => {
                tracing::info!(
                    build = %build,
                    debug_files = created.len(),
                    "Fetched dSYMs"
                );
                report.fetched += 1;
                report.debug_files_created += created.len() as u64;
            }
            Err(SyncError::ITunes(ITunesError::NoArtifact { .. })) => {
                tracing::info!(build = %build, "No dSYMs available for build");
                report.no_artifact += 1;
            }
            Err(e) if e.is_permanent() => return Err(e),
            Err(e @ SyncError::State(_)) | Err(e @ SyncError::Dif(DifError::State(_))) => {
                return Err(e)
            }
            Err(e) => {
                tracing::warn!(
                    build = %build,
                    transient = e.is_transient(),
                    error = %e,
                    "Failed to fetch dSYMs"
                );
                ctx.db.record_failure(&key, &e.to_string()).await?;
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        project_id,
        fetched = report.fetched,
        failed = report.failed,
        no_artifact = report.no_artifact,
        already_fetched = report.already_fetched,
        "Sync finished"
    );
    Ok(())
}

/// Download, ingest and mark one build. The archive's temporary file is
/// removed on every exit path.
async fn fetch_build(
    ctx: &SyncContext,
    project_id: u64,
    build: &BuildInfo,
    key: &BuildKey,
    dsyms: &dyn DsymSource,
) -> Result<Vec<DebugFileRecord>, SyncError> {
    let archive = tempfile::Builder::new()
        .prefix("dsyms-")
        .suffix(".zip")
        .tempfile_in(&ctx.work_dir)?
        .into_temp_path();

    dsyms.download_dsyms(build, &archive).await?;
    let created = dif::create_files_from_dif_zip(ctx.store.as_ref(), project_id, &archive).await?;

    if !ctx.db.mark_fetched(key).await? {
        tracing::debug!(build = %build, "Build was already marked fetched by another run");
    }
    Ok(created)
}

/// Keep only characters that are safe in a file name.
fn sanitize_for_path(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Take the exclusive lock for (project, source). Held until the returned
/// file is dropped.
async fn acquire_run_lock(
    lock_dir: &Path,
    project_id: u64,
    source_id: &str,
) -> Result<std::fs::File, SyncError> {
    tokio::fs::create_dir_all(lock_dir).await?;
    let lock_path = lock_dir.join(format!(
        "{}-{}.lock",
        project_id,
        sanitize_for_path(source_id)
    ));
    let source_id = source_id.to_string();

    let file = tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        file.try_lock_exclusive()
            .map_err(|_| SyncError::AlreadyRunning {
                project_id,
                source_id,
                path: lock_path.clone(),
            })?;
        Ok::<std::fs::File, SyncError>(file)
    })
    .await
    .map_err(|e| SyncError::Io(std::io::Error::other(e)))??;

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dif::{FsDebugFileStore, StagedFile};
    use crate::state::{SqliteStateDb, StateError};
    use crate::testutils::{build, macho_with_uuid, source_json, test_private_key_pem, zip_bytes};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::appconnect::AppConnectError;

    const BUNDLE: &str = "io.sentry.sample.iOS-Swift";

    struct FakeBuilds(Vec<BuildInfo>);

    #[async_trait]
    impl BuildSource for FakeBuilds {
        async fn list_builds(&self, _kind: BuildKind) -> Result<Vec<BuildInfo>, AppConnectError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Clone)]
    enum Outcome {
        Archive(Vec<u8>),
        NoArtifact,
        Fail,
        ExpiredSession,
    }

    #[derive(Default)]
    struct FakeDsyms {
        outcomes: HashMap<String, Outcome>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeDsyms {
        fn with(outcomes: &[(&str, Outcome)]) -> Self {
            Self {
                outcomes: outcomes
                    .iter()
                    .map(|(n, o)| (n.to_string(), o.clone()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DsymSource for FakeDsyms {
        async fn download_dsyms(&self, build: &BuildInfo, path: &Path) -> Result<u64, ITunesError> {
            self.calls.lock().unwrap().push(build.build_number.clone());
            assert!(path.exists(), "temporary archive file should exist during download");
            match self.outcomes.get(&build.build_number) {
                Some(Outcome::Archive(bytes)) => {
                    std::fs::write(path, bytes).unwrap();
                    Ok(bytes.len() as u64)
                }
                Some(Outcome::NoArtifact) | None => Err(ITunesError::NoArtifact {
                    build: build.to_string(),
                }),
                Some(Outcome::Fail) => Err(ITunesError::DownloadFailed {
                    build: build.to_string(),
                    status: Some(502),
                    message: "bad gateway".into(),
                }),
                Some(Outcome::ExpiredSession) => {
                    Err(ITunesError::InvalidSession("expired".into()))
                }
            }
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        db: Arc<SqliteStateDb>,
        ctx: SyncContext,
    }

    async fn harness(max_builds_per_run: usize, endpoints: Endpoints) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(SqliteStateDb::open_in_memory().unwrap());
        let store = FsDebugFileStore::open(&dir.path().join("difs"), db.clone())
            .await
            .unwrap();
        let work_dir = dir.path().join("tmp");
        std::fs::create_dir_all(&work_dir).unwrap();
        let ctx = SyncContext {
            db: db.clone(),
            store: Arc::new(store),
            endpoints,
            limits: SyncLimits { max_builds_per_run },
            work_dir,
            lock_dir: dir.path().join("locks"),
        };
        Harness { _dir: dir, db, ctx }
    }

    fn archive(seed: u8) -> Vec<u8> {
        let uuid = Uuid::from_bytes([seed; 16]);
        zip_bytes(&[("App.dSYM/Contents/Resources/DWARF/App", &macho_with_uuid(uuid))])
    }

    fn builds(numbers: &[&str]) -> FakeBuilds {
        FakeBuilds(numbers.iter().map(|n| build(n)).collect())
    }

    async fn fetched_numbers(db: &SqliteStateDb) -> Vec<String> {
        db.list_builds(1)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.fetched)
            .map(|r| r.key.bundle_version)
            .collect()
    }

    fn work_dir_is_empty(ctx: &SyncContext) -> bool {
        std::fs::read_dir(&ctx.work_dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_cap_limits_fetches_per_run() {
        let h = harness(3, Endpoints::default()).await;
        let dsyms = FakeDsyms::with(&[
            ("1", Outcome::Archive(archive(1))),
            ("2", Outcome::Archive(archive(2))),
            ("3", Outcome::Archive(archive(3))),
            ("4", Outcome::Archive(archive(4))),
            ("5", Outcome::Archive(archive(5))),
        ]);
        let listing = builds(&["1", "2", "3", "4", "5"]);

        let mut report = SyncReport::default();
        fetch_missing_builds(&h.ctx, 1, BUNDLE, &listing, &dsyms, &mut report)
            .await
            .unwrap();

        assert_eq!(dsyms.calls(), vec!["1", "2", "3"]);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.builds_seen, 5);
        assert!(report.cap_reached);
        assert_eq!(report.debug_files_created, 3);
        assert_eq!(fetched_numbers(&h.db).await, vec!["1", "2", "3"]);

        // Second run resumes where the first stopped.
        let mut report = SyncReport::default();
        fetch_missing_builds(&h.ctx, 1, BUNDLE, &listing, &dsyms, &mut report)
            .await
            .unwrap();
        assert_eq!(dsyms.calls(), vec!["1", "2", "3", "4", "5"]);
        assert_eq!(report.already_fetched, 3);
        assert_eq!(report.fetched, 2);
        assert!(!report.cap_reached);
        assert!(work_dir_is_empty(&h.ctx));
    }

    #[tokio::test]
    async fn test_zero_cap_does_no_work() {
        let h = harness(0, Endpoints::default()).await;
        let dsyms = FakeDsyms::with(&[("1", Outcome::Archive(archive(1)))]);

        let mut report = SyncReport::default();
        fetch_missing_builds(&h.ctx, 1, BUNDLE, &builds(&["1"]), &dsyms, &mut report)
            .await
            .unwrap();
        assert!(dsyms.calls().is_empty());
        assert!(report.cap_reached);
    }

    #[tokio::test]
    async fn test_build_listed_twice_is_attempted_once() {
        let h = harness(3, Endpoints::default()).await;
        let dsyms = FakeDsyms::with(&[
            ("1", Outcome::NoArtifact),
            ("2", Outcome::Archive(archive(2))),
        ]);
        let mut promoted = build("1");
        promoted.kind = BuildKind::Release;
        let listing = FakeBuilds(vec![build("1"), build("2"), promoted]);

        let mut report = SyncReport::default();
        fetch_missing_builds(&h.ctx, 1, BUNDLE, &listing, &dsyms, &mut report)
            .await
            .unwrap();

        assert_eq!(dsyms.calls(), vec!["1", "2"]);
        assert_eq!(report.builds_seen, 2);
        assert_eq!(report.no_artifact, 1);
        assert_eq!(report.fetched, 1);
        assert!(!report.cap_reached);
    }

    struct BrokenDbStore {
        staging: PathBuf,
    }

    #[async_trait]
    impl DebugFileStore for BrokenDbStore {
        fn staging_dir(&self) -> &Path {
            &self.staging
        }

        async fn register(
            &self,
            _project_id: u64,
            _file: StagedFile,
        ) -> Result<Vec<DebugFileRecord>, DifError> {
            Err(DifError::State(StateError::Query("database is locked".into())))
        }
    }

    #[tokio::test]
    async fn test_database_fault_during_ingest_aborts_run() {
        let mut h = harness(3, Endpoints::default()).await;
        let staging = h._dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        h.ctx.store = Arc::new(BrokenDbStore { staging });
        let dsyms = FakeDsyms::with(&[
            ("1", Outcome::Archive(archive(1))),
            ("2", Outcome::Archive(archive(2))),
        ]);

        let mut report = SyncReport::default();
        let err = fetch_missing_builds(&h.ctx, 1, BUNDLE, &builds(&["1", "2"]), &dsyms, &mut report)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Dif(DifError::State(_))));
        assert_eq!(dsyms.calls(), vec!["1"]);
        assert_eq!(report.failed, 0);
        assert!(fetched_numbers(&h.db).await.is_empty());
        assert!(work_dir_is_empty(&h.ctx));
    }

    #[tokio::test]
    async fn test_fetched_builds_are_skipped() {
        let h = harness(3, Endpoints::default()).await;
        let key = BuildKey::for_build(1, BUNDLE, &build("1"));
        h.db.get_or_create_build(&key, BuildKind::PreRelease)
            .await
            .unwrap();
        h.db.mark_fetched(&key).await.unwrap();

        let dsyms = FakeDsyms::with(&[("2", Outcome::Archive(archive(2)))]);
        let mut report = SyncReport::default();
        fetch_missing_builds(&h.ctx, 1, BUNDLE, &builds(&["1", "2"]), &dsyms, &mut report)
            .await
            .unwrap();

        assert_eq!(dsyms.calls(), vec!["2"]);
        assert_eq!(report.already_fetched, 1);
        assert_eq!(report.fetched, 1);
    }

    #[tokio::test]
    async fn test_corrupt_archive_stays_unfetched_and_run_continues() {
        let h = harness(3, Endpoints::default()).await;
        let dsyms = FakeDsyms::with(&[
            ("1", Outcome::Archive(b"garbage".to_vec())),
            ("2", Outcome::Archive(archive(2))),
        ]);

        let mut report = SyncReport::default();
        fetch_missing_builds(&h.ctx, 1, BUNDLE, &builds(&["1", "2"]), &dsyms, &mut report)
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.fetched, 1);
        assert_eq!(fetched_numbers(&h.db).await, vec!["2"]);
        assert!(work_dir_is_empty(&h.ctx));

        let failed = &h.db.list_builds(1).await.unwrap()[0];
        assert!(!failed.fetched);
        assert_eq!(failed.attempts, 1);
        assert!(failed.last_error.as_deref().unwrap().contains("Corrupt"));
    }

    #[tokio::test]
    async fn test_download_failure_and_missing_artifact_are_counted() {
        let h = harness(3, Endpoints::default()).await;
        let dsyms = FakeDsyms::with(&[
            ("1", Outcome::NoArtifact),
            ("2", Outcome::Fail),
            ("3", Outcome::Archive(archive(3))),
            ("4", Outcome::Archive(archive(4))),
        ]);

        let mut report = SyncReport::default();
        fetch_missing_builds(
            &h.ctx,
            1,
            BUNDLE,
            &builds(&["1", "2", "3", "4"]),
            &dsyms,
            &mut report,
        )
        .await
        .unwrap();

        // Every attempt counts against the cap.
        assert_eq!(dsyms.calls(), vec!["1", "2", "3"]);
        assert_eq!(report.no_artifact, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.fetched, 1);
        assert!(report.cap_reached);
        assert_eq!(fetched_numbers(&h.db).await, vec!["3"]);
    }

    #[tokio::test]
    async fn test_session_expiring_mid_run_aborts() {
        let h = harness(3, Endpoints::default()).await;
        let dsyms = FakeDsyms::with(&[
            ("1", Outcome::ExpiredSession),
            ("2", Outcome::Archive(archive(2))),
        ]);

        let mut report = SyncReport::default();
        let err = fetch_missing_builds(&h.ctx, 1, BUNDLE, &builds(&["1", "2"]), &dsyms, &mut report)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ITunes(ITunesError::InvalidSession(_))));
        assert_eq!(dsyms.calls(), vec!["1"]);
        assert!(work_dir_is_empty(&h.ctx));
    }

    #[tokio::test]
    async fn test_run_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let held = acquire_run_lock(dir.path(), 1, "abc").await.unwrap();
        let err = acquire_run_lock(dir.path(), 1, "abc").await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyRunning { .. }));

        // Other sources are independent.
        acquire_run_lock(dir.path(), 1, "other").await.unwrap();

        drop(held);
        acquire_run_lock(dir.path(), 1, "abc").await.unwrap();
    }

    #[test]
    fn test_sanitize_for_path() {
        assert_eq!(sanitize_for_path("abc-1_2"), "abc-1_2");
        assert_eq!(sanitize_for_path("../etc/passwd"), "___etc_passwd");
    }

    fn projects_with_source(pem: &str) -> ProjectStore {
        let sources = serde_json::to_string(&vec![source_json("abc", pem)]).unwrap();
        let doc = serde_json::json!({
            "projects": [{"id": 1, "options": {"sentry:symbol_sources": sources}}]
        });
        ProjectStore::from_json(&doc.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_expired_session_fails_before_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/olympus/v1/session"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/v1/apps/.*"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let endpoints = Endpoints::new(&server.uri(), &server.uri()).unwrap();
        let h = harness(3, endpoints).await;
        let projects = projects_with_source(&test_private_key_pem());

        let err = dsym_download(&h.ctx, &projects, 1, "abc").await.unwrap_err();
        assert!(matches!(err, SyncError::ITunes(ITunesError::InvalidSession(_))));
        assert!(err.is_permanent());

        let summary = h.db.get_summary(Some(1)).await.unwrap();
        assert!(summary.last_sync_completed.is_some());
        assert!(summary.last_sync_error.unwrap().contains("session"));
    }

    #[tokio::test]
    async fn test_unknown_source_is_not_found() {
        let h = harness(3, Endpoints::default()).await;
        let projects = projects_with_source("PEM");

        let err = dsym_download(&h.ctx, &projects, 1, "missing")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Source(crate::sources::SourceError::NotFound { .. })
        ));

        let err = dsym_download(&h.ctx, &projects, 2, "abc").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Source(crate::sources::SourceError::ProjectNotFound { project_id: 2 })
        ));
    }

    #[tokio::test]
    async fn test_invalid_private_key_is_permanent() {
        let h = harness(3, Endpoints::default()).await;
        let projects = projects_with_source("not a key");

        let err = dsym_download(&h.ctx, &projects, 1, "abc").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::AppConnect(AppConnectError::InvalidKey(_))
        ));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_end_to_end_against_mock_apple() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/olympus/v1/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "provider": {"providerId": 118407}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/apps/1549832463/preReleaseVersions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{
                    "type": "preReleaseVersions",
                    "id": "prv-1",
                    "attributes": {"version": "7.2.0", "platform": "IOS"},
                    "relationships": {"builds": {"data": [{"type": "builds", "id": "b1"}]}}
                }],
                "included": [{"type": "builds", "id": "b1", "attributes": {"version": "42"}}],
                "links": {}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/apps/1549832463/appStoreVersions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(
                "/WebObjects/iTunesConnect.woa/ra/apps/1549832463/platforms/IOS/trains/7.2.0/builds/42/details",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"dsymurl": format!("{}/dsyms/42.zip", server.uri())}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dsyms/42.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive(7)))
            .expect(1)
            .mount(&server)
            .await;

        let endpoints = Endpoints::new(&server.uri(), &server.uri()).unwrap();
        let h = harness(3, endpoints).await;
        let projects = projects_with_source(&test_private_key_pem());

        let report = dsym_download(&h.ctx, &projects, 1, "abc").await.unwrap();
        assert_eq!(report.builds_seen, 1);
        assert_eq!(report.fetched, 1);
        assert_eq!(report.debug_files_created, 1);

        // Nothing left to do on the second run.
        let report = dsym_download(&h.ctx, &projects, 1, "abc").await.unwrap();
        assert_eq!(report.already_fetched, 1);
        assert_eq!(report.fetched, 0);

        let files = h.db.list_debug_files(1).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].debug_id, Uuid::from_bytes([7; 16]).to_string());
    }
}
