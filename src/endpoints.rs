//! Base URLs for the two Apple services the sync talks to.
//!
//! Both default to Apple's production hosts; tests and staging setups point
//! them at a local server instead.

use std::time::Duration;

pub const APP_STORE_CONNECT_API: &str = "https://api.appstoreconnect.apple.com";
pub const ITUNES_CONNECT: &str = "https://appstoreconnect.apple.com";

/// Connect timeout shared by every outbound request.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Whole-request timeout for JSON API calls.
pub const API_TIMEOUT: Duration = Duration::from_secs(30);
/// Whole-request timeout for dSYM archive downloads, which can be hundreds of MB.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_root: String,
    pub itunes_root: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_root: APP_STORE_CONNECT_API.to_string(),
            itunes_root: ITUNES_CONNECT.to_string(),
        }
    }
}

impl Endpoints {
    /// Build endpoints from user-supplied roots, rejecting anything that is
    /// not an absolute http(s) URL.
    pub fn new(api_root: &str, itunes_root: &str) -> anyhow::Result<Self> {
        Ok(Self {
            api_root: normalize_root(api_root)?,
            itunes_root: normalize_root(itunes_root)?,
        })
    }
}

fn normalize_root(raw: &str) -> anyhow::Result<String> {
    let parsed = url::Url::parse(raw).map_err(|e| anyhow::anyhow!("Invalid URL '{}': {}", raw, e))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => anyhow::bail!("Unsupported URL scheme '{}' in '{}'", other, raw),
    }
    Ok(raw.trim_end_matches('/').to_string())
}
