//! appconnect-dsyms: pulls dSYM archives for an app's builds from App Store
//! Connect and files the debug symbols into a local store.
//!
//! Builds are listed through the App Store Connect REST API (ES256 JWT auth);
//! archives are downloaded through the iTunes Connect session API (cookie
//! auth). A SQLite database remembers which builds are done so every run
//! only fetches what is new, a few builds at a time.

#![warn(clippy::all)]

mod appconnect;
mod cli;
mod config;
mod dif;
mod endpoints;
mod itunes;
mod project;
mod shutdown;
mod sources;
mod state;
mod sync;
#[cfg(test)]
mod testutils;
mod types;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::Config;
use project::ProjectStore;
use state::StateDb;
use sync::{SyncContext, SyncError, SyncReport};

/// Open the state database and debug file store under the data directory.
async fn build_context(config: &Config, max_builds: usize) -> anyhow::Result<SyncContext> {
    config.ensure_dirs().await?;
    let db: Arc<dyn StateDb> = Arc::new(state::SqliteStateDb::open(&config.state_db_path()).await?);
    let store = dif::FsDebugFileStore::open(&config.difs_dir(), db.clone()).await?;
    Ok(SyncContext {
        db,
        store: Arc::new(store),
        endpoints: config.endpoints.clone(),
        limits: config::sync_limits(max_builds),
        work_dir: config.work_dir(),
        lock_dir: config.lock_dir(),
    })
}

fn log_report(project_id: u64, source_id: &str, report: &SyncReport) {
    tracing::info!(
        project_id,
        source_id,
        builds_seen = report.builds_seen,
        already_fetched = report.already_fetched,
        fetched = report.fetched,
        no_artifact = report.no_artifact,
        failed = report.failed,
        debug_files = report.debug_files_created,
        "dSYM sync complete"
    );
    if report.failed > 0 {
        tracing::warn!(
            failed = report.failed,
            "Some builds failed and will be retried on the next run"
        );
    }
    if report.cap_reached {
        tracing::info!(
            "Per-run build limit reached, remaining builds will be fetched on the next run"
        );
    }
}

fn log_sync_error(err: &SyncError) {
    tracing::error!(error = %err, transient = err.is_transient(), "Sync failed");
    if let Some(hint) = err.user_message() {
        tracing::error!("{}", hint);
    }
}

async fn run_sync(config: &Config, args: cli::SyncArgs) -> anyhow::Result<()> {
    let projects = ProjectStore::load(&config.projects_file).await?;
    let ctx = build_context(config, args.max_builds).await?;
    let source = &args.source;

    match sync::dsym_download(&ctx, &projects, source.project, &source.source).await {
        Ok(report) => {
            log_report(source.project, &source.source, &report);
            Ok(())
        }
        Err(e) => {
            log_sync_error(&e);
            Err(e.into())
        }
    }
}

async fn run_watch(config: &Config, args: cli::WatchArgs) -> anyhow::Result<()> {
    let shutdown_token = shutdown::install_signal_handler()?;
    let ctx = build_context(config, args.sync.max_builds).await?;
    let source = &args.sync.source;
    let interval = Duration::from_secs(args.interval);

    loop {
        // Reloaded every cycle so credential fixes are picked up.
        match ProjectStore::load(&config.projects_file).await {
            Ok(projects) => {
                match sync::dsym_download(&ctx, &projects, source.project, &source.source).await {
                    Ok(report) => log_report(source.project, &source.source, &report),
                    Err(e) if e.is_permanent() => {
                        log_sync_error(&e);
                        return Err(e.into());
                    }
                    Err(e) => log_sync_error(&e),
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to load projects file"),
        }

        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            break;
        }
        tracing::info!("Waiting {} seconds...", args.interval);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_token.cancelled() => {
                tracing::info!("Shutdown during wait, exiting...");
                break;
            }
        }
    }

    Ok(())
}

async fn run_validate(config: &Config, args: cli::ValidateArgs) -> anyhow::Result<()> {
    let projects = ProjectStore::load(&config.projects_file).await?;
    let result = async {
        let project = projects.get(args.source.project)?;
        let source = sources::get_app_store_config(project, &args.source.source)?;
        let api = appconnect::AppConnectClient::from_config(&source, &config.endpoints)?;
        itunes::ITunesClient::from_config(&source, &config.endpoints).await?;
        let builds = api.list_builds(args.kind).await?;
        Ok::<_, SyncError>((project, source, builds))
    }
    .await;

    let (project, source, builds) = match result {
        Ok(ok) => ok,
        Err(e) => {
            log_sync_error(&e);
            return Err(e.into());
        }
    };

    let project_name = project
        .slug
        .clone()
        .unwrap_or_else(|| project.id.to_string());
    println!("Source '{}' of project {} is valid", source.id(), project_name);
    println!("  App:     {} ({})", source.bundle_id(), source.app_id());
    println!("  Builds:  {}", builds.len());
    for build in builds.iter().take(10) {
        println!("    {}", build);
    }
    if builds.len() > 10 {
        println!("    ... and {} more", builds.len() - 10);
    }
    Ok(())
}

async fn run_status(config: &Config, args: cli::StatusArgs) -> anyhow::Result<()> {
    let db_path = config.state_db_path();

    if !db_path.exists() {
        println!("No state database found at {}", db_path.display());
        println!("Run a sync first to create the database.");
        return Ok(());
    }

    let db = state::SqliteStateDb::open(&db_path).await?;
    let summary = db.get_summary(args.project).await?;

    println!("State Database: {}", db_path.display());
    if let Some(project_id) = args.project {
        println!("Project:        {}", project_id);
    }
    println!();
    println!("Builds:");
    println!("  Total:    {}", summary.total_builds);
    println!("  Fetched:  {}", summary.fetched_builds);
    println!("  Pending:  {}", summary.pending_builds);
    println!("  Failing:  {}", summary.failing_builds);
    println!("Debug files: {}", summary.debug_files);
    println!();

    if let Some(started) = &summary.last_sync_started {
        println!(
            "Last sync started:   {}",
            started.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(completed) = &summary.last_sync_completed {
        println!(
            "Last sync completed: {}",
            completed.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(error) = &summary.last_sync_error {
        println!("Last sync error:     {}", error);
    }

    if let (true, Some(project_id)) = (args.builds, args.project) {
        println!();
        println!("Builds of project {}:", project_id);
        for record in db.list_builds(project_id).await? {
            let key = &record.key;
            let state = if record.fetched {
                "fetched".to_string()
            } else if let Some(error) = &record.last_error {
                format!("failing ({} attempts): {}", record.attempts, error)
            } else {
                "pending".to_string()
            };
            println!(
                "  {} {} {} ({}) [{}] - {}",
                key.bundle_id,
                key.platform,
                key.bundle_short_version,
                key.bundle_version,
                record.kind.as_str(),
                state
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config = Config::from_cli(&cli)?;
    tracing::debug!(?config, "Resolved configuration");

    match cli.command {
        Command::Sync(args) => run_sync(&config, args).await,
        Command::Watch(args) => run_watch(&config, args).await,
        Command::Validate(args) => run_validate(&config, args).await,
        Command::Status(args) => run_status(&config, args).await,
    }
}
