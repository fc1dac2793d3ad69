//! Fixtures shared by unit tests across modules.

use std::io::Write;

use p256::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use serde_json::{json, Value};
use uuid::Uuid;
use zip::write::SimpleFileOptions;

use crate::appconnect::BuildInfo;
use crate::types::BuildKind;

pub const TEST_ISSUER: &str = "69a6de7e-2c1d-47e3-e053-5b8c7c11a4d1";

/// A fresh PKCS#8 P-256 key in PEM form.
pub fn test_private_key_pem() -> String {
    test_key_pair_pem().0
}

/// A fresh P-256 key pair as (PKCS#8 private PEM, SPKI public PEM).
pub fn test_key_pair_pem() -> (String, String) {
    let key = p256::SecretKey::random(&mut rand::rngs::OsRng);
    let private = key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
    let public = key.public_key().to_public_key_pem(LineEnding::LF).unwrap();
    (private, public)
}

/// A complete `appStoreConnect` symbol source object.
pub fn source_json(id: &str, private_key: &str) -> Value {
    json!({
        "type": "appStoreConnect",
        "id": id,
        "name": "Sample App",
        "appconnectIssuer": TEST_ISSUER,
        "appconnectKey": "KEY123",
        "appconnectPrivateKey": private_key,
        "itunesSession": "session-cookie",
        "itunesUser": "dev@example.com",
        "itunesCreated": "2021-03-01T10:00:00Z",
        "appName": "Sample",
        "appId": "1549832463",
        "bundleId": "io.sentry.sample.iOS-Swift",
        "orgId": 118407,
        "orgName": "Sample Org",
    })
}

pub fn build(build_number: &str) -> BuildInfo {
    BuildInfo {
        kind: BuildKind::PreRelease,
        app_id: "1549832463".to_string(),
        platform: "IOS".to_string(),
        version: "7.2.0".to_string(),
        build_number: build_number.to_string(),
    }
}

/// A minimal 64-bit little-endian arm64 Mach-O image with one `LC_UUID`.
pub fn macho_with_uuid(uuid: Uuid) -> Vec<u8> {
    let mut bytes = Vec::new();
    for word in [0xfeed_facf_u32, 0x0100_000c, 0, 0xa, 1, 24, 0, 0] {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes.extend_from_slice(&0x1b_u32.to_le_bytes());
    bytes.extend_from_slice(&24_u32.to_le_bytes());
    bytes.extend_from_slice(uuid.as_bytes());
    bytes
}

/// Zip the given (path, contents) entries in memory.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
