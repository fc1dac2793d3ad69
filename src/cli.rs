use clap::{Args, Parser, Subcommand};

use crate::endpoints::{APP_STORE_CONNECT_API, ITUNES_CONNECT};
use crate::sync::DEFAULT_MAX_BUILDS_PER_RUN;
use crate::types::{BuildKind, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "appconnect-dsyms",
    about = "Fetch dSYMs from App Store Connect into a local debug file store"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory for the state database, debug files and lock files
    #[arg(
        long,
        global = true,
        env = "APPCONNECT_DSYMS_DATA_DIR",
        default_value = "~/.appconnect-dsyms"
    )]
    pub data_dir: String,

    /// JSON file with projects and their symbol source options
    #[arg(
        long,
        global = true,
        env = "APPCONNECT_DSYMS_PROJECTS",
        default_value = "~/.appconnect-dsyms/projects.json"
    )]
    pub projects_file: String,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// App Store Connect API base URL
    #[arg(long, global = true, default_value = APP_STORE_CONNECT_API)]
    pub api_url: String,

    /// iTunes Connect base URL
    #[arg(long, global = true, default_value = ITUNES_CONNECT)]
    pub itunes_url: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch dSYMs for unfetched builds once
    Sync(SyncArgs),
    /// Sync repeatedly until interrupted
    Watch(WatchArgs),
    /// Check a symbol source: config, API credentials and iTunes session
    Validate(ValidateArgs),
    /// Show what has been fetched so far
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Project id
    #[arg(short = 'p', long)]
    pub project: u64,

    /// Id of the appStoreConnect symbol source
    #[arg(short = 's', long)]
    pub source: String,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Maximum builds to download per run
    #[arg(long, default_value_t = DEFAULT_MAX_BUILDS_PER_RUN)]
    pub max_builds: usize,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub sync: SyncArgs,

    /// Seconds to wait between runs
    #[arg(long, default_value_t = 3600)]
    pub interval: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Which builds to list
    #[arg(long, value_enum, default_value = "all")]
    pub kind: BuildKind,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Limit to one project
    #[arg(short = 'p', long)]
    pub project: Option<u64>,

    /// List every known build of the project
    #[arg(long, requires = "project")]
    pub builds: bool,
}
