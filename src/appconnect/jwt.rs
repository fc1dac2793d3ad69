//! ES256 bearer tokens for the App Store Connect API.
//!
//! Apple accepts JWTs signed with the team's P-256 API key, valid for at most
//! 20 minutes. Tokens are cached and reused until they are close to expiry.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;

use super::error::AppConnectError;

const AUDIENCE: &str = "appstoreconnect-v1";

/// Maximum lifetime Apple accepts for a token, in seconds.
pub const TOKEN_LIFETIME_SECS: i64 = 20 * 60;

/// Tokens with less remaining validity than this are regenerated.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    iat: i64,
    exp: i64,
    aud: &'static str,
}

/// A signed token together with its expiry.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > Duration::seconds(REFRESH_MARGIN_SECS)
    }
}

pub struct TokenSigner {
    key: EncodingKey,
    header: Header,
    issuer_id: String,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("key", &"<redacted>")
            .field("key_id", &self.header.kid)
            .field("issuer_id", &self.issuer_id)
            .finish()
    }
}

impl TokenSigner {
    /// Load a PEM-encoded PKCS#8 P-256 private key as downloaded from App
    /// Store Connect. The key is test-signed once so a key that parses but
    /// cannot sign is rejected here rather than on the first request.
    pub fn new(private_key_pem: &str, key_id: &str, issuer_id: &str) -> Result<Self, AppConnectError> {
        let key = EncodingKey::from_ec_pem(private_key_pem.trim().as_bytes())
            .map_err(|e| AppConnectError::InvalidKey(e.to_string()))?;

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(key_id.to_string());

        let signer = Self {
            key,
            header,
            issuer_id: issuer_id.to_string(),
        };
        signer
            .sign(Utc::now())
            .map_err(|e| AppConnectError::InvalidKey(e.to_string()))?;
        Ok(signer)
    }

    /// Sign a fresh token valid from `now` for [`TOKEN_LIFETIME_SECS`].
    pub fn sign(&self, now: DateTime<Utc>) -> Result<CachedToken, AppConnectError> {
        let expires_at = now + Duration::seconds(TOKEN_LIFETIME_SECS);
        let claims = Claims {
            iss: &self.issuer_id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            aud: AUDIENCE,
        };
        let token = encode(&self.header, &claims, &self.key)?;
        Ok(CachedToken { token, expires_at })
    }
}
