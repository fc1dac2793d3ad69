//! Client for the legacy iTunes Connect session API.
//!
//! dSYM archives are not exposed by the App Store Connect REST API, so they
//! are fetched through the web UI's private endpoints, authenticated with the
//! user's `myacinfo` session cookie.

pub mod error;
pub mod responses;

use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

pub use self::error::ITunesError;
use self::responses::{BuildDetailsResponse, SessionResponse};
use crate::appconnect::BuildInfo;
use crate::endpoints::{Endpoints, API_TIMEOUT, CONNECT_TIMEOUT, DOWNLOAD_TIMEOUT};
use crate::sources::SourceConfig;

const SESSION_COOKIE: &str = "myacinfo";

/// An authenticated iTunes Connect session scoped to one organization.
///
/// Construction verifies the session, so holding a client means the cookie
/// was valid at that point.
pub struct ITunesClient {
    http: Client,
    root: url::Url,
    org_id: i64,
}

impl std::fmt::Debug for ITunesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ITunesClient")
            .field("root", &self.root.as_str())
            .field("org_id", &self.org_id)
            .finish_non_exhaustive()
    }
}

impl ITunesClient {
    pub async fn from_config(
        config: &SourceConfig,
        endpoints: &Endpoints,
    ) -> Result<Self, ITunesError> {
        Self::new(config.itunes_session(), config.org_id(), endpoints).await
    }

    /// Load the session cookie, check the session is alive and switch it to
    /// `org_id` if another provider is active.
    pub async fn new(
        session_cookie: &str,
        org_id: i64,
        endpoints: &Endpoints,
    ) -> Result<Self, ITunesError> {
        let root = url::Url::parse(&endpoints.itunes_root).map_err(|e| {
            ITunesError::InvalidSession(format!(
                "invalid iTunes Connect URL '{}': {}",
                endpoints.itunes_root, e
            ))
        })?;

        // The jar also keeps whatever Apple rotates into the session.
        let cookie_jar = Arc::new(reqwest::cookie::Jar::default());
        cookie_jar.add_cookie_str(&format!("{}={}; Path=/", SESSION_COOKIE, session_cookie), &root);

        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .cookie_provider(cookie_jar.clone())
            .default_headers(default_headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(API_TIMEOUT)
            .build()?;

        let client = Self { http, root, org_id };
        client.ensure_session().await?;
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.root.as_str().trim_end_matches('/'), path)
    }

    async fn ensure_session(&self) -> Result<(), ITunesError> {
        let url = self.url("/olympus/v1/session");
        tracing::debug!("GET {}", url);
        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ITunesError::InvalidSession(format!(
                "session check returned HTTP {}",
                status.as_u16()
            )));
        }

        // Expired sessions sometimes come back as a 200 login page.
        let body = response.bytes().await?;
        let session: SessionResponse = serde_json::from_slice(&body).map_err(|e| {
            ITunesError::InvalidSession(format!("unexpected session response: {}", e))
        })?;

        let current = session.provider.as_ref().map(|p| p.provider_id);
        if current == Some(self.org_id) {
            tracing::debug!(org_id = self.org_id, "iTunes session already on provider");
            return Ok(());
        }

        if !session.available_providers.is_empty()
            && !session
                .available_providers
                .iter()
                .any(|p| p.provider_id == self.org_id)
        {
            return Err(ITunesError::InvalidSession(format!(
                "session user is not a member of organization {}",
                self.org_id
            )));
        }

        self.set_provider().await
    }

    async fn set_provider(&self) -> Result<(), ITunesError> {
        let url = self.url("/olympus/v1/session");
        tracing::debug!(org_id = self.org_id, "Switching iTunes session provider");
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "provider": { "providerId": self.org_id } }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ITunesError::InvalidSession(format!(
                "switching to organization {} returned HTTP {}",
                self.org_id,
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    /// Look up the dSYM download URL for a build, `None` if Apple has none.
    pub async fn get_dsym_url(&self, build: &BuildInfo) -> Result<Option<url::Url>, ITunesError> {
        let url = self.url(&format!(
            "/WebObjects/iTunesConnect.woa/ra/apps/{}/platforms/{}/trains/{}/builds/{}/details",
            build.app_id, build.platform, build.version, build.build_number
        ));
        tracing::debug!("GET {}", url);
        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ITunesError::InvalidSession(format!(
                "build details returned HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(ITunesError::DownloadFailed {
                build: build.to_string(),
                status: Some(status.as_u16()),
                message: "build details request failed".to_string(),
            });
        }

        let body = response.bytes().await?;
        let details: BuildDetailsResponse =
            serde_json::from_slice(&body).map_err(|e| ITunesError::DownloadFailed {
                build: build.to_string(),
                status: Some(status.as_u16()),
                message: format!("invalid build details: {}", e),
            })?;

        let Some(dsym_url) = details.data.and_then(|d| d.dsymurl) else {
            return Ok(None);
        };
        let resolved = self
            .root
            .join(&dsym_url)
            .map_err(|e| ITunesError::DownloadFailed {
                build: build.to_string(),
                status: None,
                message: format!("invalid dSYM URL '{}': {}", dsym_url, e),
            })?;
        Ok(Some(resolved))
    }

    /// Download the build's dSYM archive to `path`, streaming to disk.
    ///
    /// Returns the number of bytes written.
    pub async fn download_dsyms(&self, build: &BuildInfo, path: &Path) -> Result<u64, ITunesError> {
        let url = self
            .get_dsym_url(build)
            .await?
            .ok_or_else(|| ITunesError::NoArtifact {
                build: build.to_string(),
            })?;

        let failed = |status: Option<u16>, message: String| ITunesError::DownloadFailed {
            build: build.to_string(),
            status,
            message,
        };

        tracing::debug!(build = %build, "Downloading dSYMs");
        let response = self
            .http
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| failed(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(failed(Some(status), "unexpected HTTP status".to_string()));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|e| failed(None, format!("failed to open {}: {}", path.display(), e)))?;

        let mut bytes_written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                failed(
                    Some(status),
                    format!("body error after {} bytes: {}", bytes_written, e),
                )
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| failed(None, format!("disk error: {}", e)))?;
            bytes_written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| failed(None, format!("disk error: {}", e)))?;

        tracing::debug!(build = %build, bytes = bytes_written, "Downloaded dSYMs");
        Ok(bytes_written)
    }
}
