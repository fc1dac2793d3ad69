/// Which builds to enumerate from App Store Connect.
///
/// Listed builds carry `PreRelease` or `Release`; `All` only appears as a
/// query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum BuildKind {
    All,
    PreRelease,
    Release,
}

impl BuildKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildKind::All => "all",
            BuildKind::PreRelease => "pre_release",
            BuildKind::Release => "release",
        }
    }

    /// Parse the string stored in the database.
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "all" => Some(BuildKind::All),
            "pre_release" => Some(BuildKind::PreRelease),
            "release" => Some(BuildKind::Release),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
