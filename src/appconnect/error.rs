use thiserror::Error;

/// Errors talking to the App Store Connect REST API.
///
/// [`is_transient()`](AppConnectError::is_transient) separates network and
/// server-side failures, which the next scheduled run may get past, from
/// credential and key problems that need an operator.
#[derive(Debug, Error)]
pub enum AppConnectError {
    #[error("App Store Connect rejected the API credentials (HTTP {status})")]
    InvalidCredentials { status: u16 },

    #[error("Invalid App Store Connect API private key: {0}")]
    InvalidKey(String),

    #[error("App Store Connect API error (HTTP {status}) for {url}")]
    Api { status: u16, url: String },

    #[error("Failed to decode App Store Connect response from {url}: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },

    #[error("Failed to encode API token: {0}")]
    TokenEncoding(#[from] jsonwebtoken::errors::Error),

    #[error("Request to App Store Connect failed: {0}")]
    Network(#[from] reqwest::Error),
}

impl AppConnectError {
    pub fn is_transient(&self) -> bool {
        match self {
            AppConnectError::Api { status, .. } => *status == 429 || *status >= 500,
            AppConnectError::Network(_) => true,
            AppConnectError::InvalidCredentials { .. }
            | AppConnectError::InvalidKey(_)
            | AppConnectError::Decode { .. }
            | AppConnectError::TokenEncoding(_) => false,
        }
    }
}
