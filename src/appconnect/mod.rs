//! Client for the App Store Connect REST API.
//!
//! Authenticates with short-lived ES256 tokens derived from the configured
//! API key and enumerates an app's builds: TestFlight builds through
//! `preReleaseVersions`, store builds through `appStoreVersions`.

pub mod error;
pub mod jwt;
pub mod responses;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

pub use self::error::AppConnectError;
use self::jwt::{CachedToken, TokenSigner};
use self::responses::{
    AppStoreVersionAttributes, BuildAttributes, Document, PreReleaseVersionAttributes,
    VersionAttributes,
};
use crate::endpoints::{Endpoints, API_TIMEOUT, CONNECT_TIMEOUT};
use crate::sources::SourceConfig;
use crate::types::BuildKind;

/// Page size requested from collection endpoints (Apple's maximum).
const PAGE_LIMIT: u32 = 200;

/// Builds side-loaded per pre-release version (Apple's maximum). Versions
/// with more builds are listed through their own relationship endpoint.
const INCLUDED_BUILDS_LIMIT: u32 = 50;

/// Stop following `links.next` after this many pages.
const MAX_PAGES: usize = 100;

/// Information about one App Store Connect build.
///
/// A build is identified by (platform, version, bundle id, build number);
/// the bundle id is fixed per source so it is not repeated here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildInfo {
    /// `PreRelease` or `Release`.
    pub kind: BuildKind,

    pub app_id: String,

    /// Opaque platform identifier supplied by Apple, e.g. `IOS` or `TV_OS`.
    pub platform: String,

    /// The human-readable version, e.g. "7.2.0". Apple calls this the
    /// bundle short version.
    pub version: String,

    /// The build number, typically monotonically increasing. Apple calls this
    /// the bundle version.
    pub build_number: String,
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} ({}) [{}]",
            self.platform, self.version, self.build_number, self.app_id
        )
    }
}

/// One version train and the build numbers uploaded for it, in API order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReleaseInfo {
    pub version_id: String,
    pub platform: String,
    pub short_version: String,
    pub build_numbers: Vec<String>,
    /// The side-loaded builds are only the first page of the relationship.
    pub truncated: bool,
}

/// Group one page of version resources with their side-loaded builds.
///
/// Builds referenced by a relationship but missing from `included` are
/// skipped; build order follows the relationship linkage.
pub(crate) fn collect_releases<A: VersionAttributes>(
    doc: &Document<A>,
    relationship: &str,
) -> Vec<ReleaseInfo> {
    let build_numbers: HashMap<&str, &str> = doc
        .included
        .iter()
        .filter(|inc| inc.kind == "builds")
        .filter_map(|inc| {
            inc.attributes
                .version
                .as_deref()
                .map(|version| (inc.id.as_str(), version))
        })
        .collect();

    doc.data
        .iter()
        .map(|version| {
            let rel = version.relationships.get(relationship);
            let linked = rel
                .and_then(|rel| rel.data.as_ref())
                .map(|linkage| linkage.ids())
                .unwrap_or_default();
            let truncated = rel
                .and_then(|rel| rel.total())
                .is_some_and(|total| total > linked.len() as u64);

            let mut numbers = Vec::with_capacity(linked.len());
            for build in linked {
                match build_numbers.get(build.id.as_str()) {
                    Some(number) => numbers.push(number.to_string()),
                    None => tracing::debug!(
                        build_id = %build.id,
                        version_id = %version.id,
                        "Build missing from included resources, skipping"
                    ),
                }
            }

            ReleaseInfo {
                version_id: version.id.clone(),
                platform: version.attributes.platform().to_string(),
                short_version: version.attributes.short_version().to_string(),
                build_numbers: numbers,
                truncated,
            }
        })
        .collect()
}

/// Client for a single app on App Store Connect.
pub struct AppConnectClient {
    http: Client,
    api_root: String,
    signer: TokenSigner,
    token: Mutex<Option<CachedToken>>,
    app_id: String,
}

impl std::fmt::Debug for AppConnectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConnectClient")
            .field("api_root", &self.api_root)
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

impl AppConnectClient {
    /// Create a client from a validated source config.
    ///
    /// Parses the private key up front so a broken key surfaces before any
    /// request is made. No network I/O happens here.
    pub fn from_config(
        config: &SourceConfig,
        endpoints: &Endpoints,
    ) -> Result<Self, AppConnectError> {
        let signer = TokenSigner::new(config.private_key(), config.key_id(), config.issuer_id())?;
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(API_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            api_root: endpoints.api_root.clone(),
            signer,
            token: Mutex::new(None),
            app_id: config.app_id().to_string(),
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Return the cached token, signing a new one if it is about to expire.
    fn bearer_token(&self) -> Result<String, AppConnectError> {
        let now = Utc::now();
        let mut cached = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.token.clone());
        }

        tracing::debug!("Signing new App Store Connect API token");
        let fresh = self.signer.sign(now)?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn get_document<A: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Document<A>, AppConnectError> {
        let token = self.bearer_token()?;

        tracing::debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AppConnectError::InvalidCredentials {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(AppConnectError::Api {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| AppConnectError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Fetch `first_url` and every page reachable through `links.next`.
    async fn get_all_pages<A: DeserializeOwned>(
        &self,
        first_url: String,
    ) -> Result<Vec<Document<A>>, AppConnectError> {
        let mut pages = Vec::new();
        let mut next = Some(first_url);

        while let Some(url) = next.take() {
            let page: Document<A> = self.get_document(&url).await?;
            next = page.links.next.clone().filter(|n| *n != url);
            pages.push(page);

            if pages.len() >= MAX_PAGES && next.is_some() {
                tracing::warn!(
                    app_id = %self.app_id,
                    "Stopped paginating after {} pages",
                    MAX_PAGES
                );
                break;
            }
        }

        Ok(pages)
    }

    async fn pre_release_versions(&self) -> Result<Vec<ReleaseInfo>, AppConnectError> {
        let url = format!(
            "{}/v1/apps/{}/preReleaseVersions?include=builds&limit={}&limit[builds]={}",
            self.api_root, self.app_id, PAGE_LIMIT, INCLUDED_BUILDS_LIMIT
        );
        let pages = self
            .get_all_pages::<PreReleaseVersionAttributes>(url)
            .await?;
        let mut releases: Vec<ReleaseInfo> = pages
            .iter()
            .flat_map(|page| collect_releases(page, "builds"))
            .collect();

        for release in releases.iter_mut() {
            let full_page = release.build_numbers.len() >= INCLUDED_BUILDS_LIMIT as usize;
            if release.truncated || full_page {
                tracing::debug!(
                    version_id = %release.version_id,
                    "Pre-release version has more builds than were included, listing them all"
                );
                release.build_numbers = self.pre_release_builds(&release.version_id).await?;
            }
        }
        Ok(releases)
    }

    /// Every build number of one pre-release version, following pagination.
    async fn pre_release_builds(&self, version_id: &str) -> Result<Vec<String>, AppConnectError> {
        let url = format!(
            "{}/v1/preReleaseVersions/{}/builds?limit={}",
            self.api_root, version_id, PAGE_LIMIT
        );
        let pages = self.get_all_pages::<BuildAttributes>(url).await?;
        Ok(pages
            .into_iter()
            .flat_map(|page| page.data)
            .filter_map(|build| build.attributes.version)
            .collect())
    }

    /// Store releases with their single build each. Unverified against live
    /// data: whether this matches what the web UI calls "release" builds.
    async fn release_versions(&self) -> Result<Vec<ReleaseInfo>, AppConnectError> {
        let url = format!(
            "{}/v1/apps/{}/appStoreVersions?include=build&limit={}",
            self.api_root, self.app_id, PAGE_LIMIT
        );
        let pages = self.get_all_pages::<AppStoreVersionAttributes>(url).await?;
        Ok(pages
            .iter()
            .flat_map(|page| collect_releases(page, "build"))
            .collect())
    }

    /// Return the available builds, grouped by release and flattened in API
    /// order. `All` lists pre-releases first, then store releases.
    pub async fn list_builds(&self, kind: BuildKind) -> Result<Vec<BuildInfo>, AppConnectError> {
        let mut grouped: Vec<(BuildKind, Vec<ReleaseInfo>)> = Vec::new();
        if matches!(kind, BuildKind::All | BuildKind::PreRelease) {
            grouped.push((BuildKind::PreRelease, self.pre_release_versions().await?));
        }
        if matches!(kind, BuildKind::All | BuildKind::Release) {
            grouped.push((BuildKind::Release, self.release_versions().await?));
        }

        let mut builds = Vec::new();
        for (build_kind, releases) in grouped {
            for release in releases {
                for build_number in release.build_numbers {
                    builds.push(BuildInfo {
                        kind: build_kind,
                        app_id: self.app_id.clone(),
                        platform: release.platform.clone(),
                        version: release.short_version.clone(),
                        build_number,
                    });
                }
            }
        }

        tracing::debug!(app_id = %self.app_id, count = builds.len(), kind = kind.as_str(), "Listed builds");
        Ok(builds)
    }
}
