use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::endpoints::Endpoints;
use crate::sync::SyncLimits;

/// Application configuration resolved from the command line.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub projects_file: PathBuf,
    pub endpoints: Endpoints,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        Ok(Self {
            data_dir: expand_tilde(&cli.data_dir),
            projects_file: expand_tilde(&cli.projects_file),
            endpoints: Endpoints::new(&cli.api_url, &cli.itunes_url)?,
        })
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }

    /// Root of the debug file store.
    pub fn difs_dir(&self) -> PathBuf {
        self.data_dir.join("difs")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.data_dir.join("work")
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }

    /// Create the data directory and its fixed subdirectories.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [self.data_dir.clone(), self.work_dir(), self.lock_dir()] {
            create_dir(&dir).await?;
        }
        Ok(())
    }
}

async fn create_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!("Failed to create {}: {}", dir.display(), e),
        )
    })
}

pub fn sync_limits(max_builds: usize) -> SyncLimits {
    SyncLimits {
        max_builds_per_run: max_builds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["appconnect-dsyms"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Documents");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Documents"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(
            expand_tilde("/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            expand_tilde("relative/path"),
            PathBuf::from("relative/path")
        );
    }

    #[test]
    fn test_layout_under_data_dir() {
        let cli = parse(&[
            "status",
            "--data-dir",
            "/var/lib/dsyms",
            "--projects-file",
            "/etc/dsyms/projects.json",
        ]);
        let cfg = Config::from_cli(&cli).unwrap();
        assert_eq!(cfg.state_db_path(), PathBuf::from("/var/lib/dsyms/state.db"));
        assert_eq!(cfg.difs_dir(), PathBuf::from("/var/lib/dsyms/difs"));
        assert_eq!(cfg.work_dir(), PathBuf::from("/var/lib/dsyms/work"));
        assert_eq!(cfg.lock_dir(), PathBuf::from("/var/lib/dsyms/locks"));
        assert_eq!(cfg.projects_file, PathBuf::from("/etc/dsyms/projects.json"));
    }

    #[test]
    fn test_custom_endpoints() {
        let cli = parse(&[
            "status",
            "--api-url",
            "http://127.0.0.1:9000/",
            "--itunes-url",
            "http://127.0.0.1:9001",
        ]);
        let cfg = Config::from_cli(&cli).unwrap();
        assert_eq!(cfg.endpoints.api_root, "http://127.0.0.1:9000");
        assert_eq!(cfg.endpoints.itunes_root, "http://127.0.0.1:9001");
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let cli = parse(&["status", "--api-url", "nonsense"]);
        assert!(Config::from_cli(&cli).is_err());
    }

    #[tokio::test]
    async fn test_ensure_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let cli = parse(&["status", "--data-dir", data.to_str().unwrap()]);
        let cfg = Config::from_cli(&cli).unwrap();
        cfg.ensure_dirs().await.unwrap();
        assert!(cfg.work_dir().is_dir());
        assert!(cfg.lock_dir().is_dir());
    }

    #[test]
    fn test_sync_limits() {
        assert_eq!(sync_limits(7).max_builds_per_run, 7);
    }
}
