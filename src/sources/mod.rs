//! Resolution and validation of `appStoreConnect` symbol sources.
//!
//! A project stores its symbol sources as an ordered JSON list of
//! heterogeneous objects under the `sentry:symbol_sources` option. This
//! module finds the App Store Connect entry for a given source id and turns
//! it into a [`SourceConfig`], which is the only way to obtain one.

pub mod error;

use serde_json::{Map, Value};

pub use self::error::SourceError;
use crate::project::Project;

/// Project option holding the symbol source list.
pub const SYMBOL_SOURCES_PROP_NAME: &str = "sentry:symbol_sources";

/// `type` value identifying App Store Connect sources.
pub const APP_STORE_CONNECT_TYPE: &str = "appStoreConnect";

#[derive(Debug, Clone, Copy)]
enum FieldType {
    Str {
        min_len: usize,
        max_len: Option<usize>,
    },
    Integer,
}

#[derive(Debug)]
struct Field {
    name: &'static str,
    ty: FieldType,
    required: bool,
}

const fn required_str(name: &'static str, min_len: usize, max_len: Option<usize>) -> Field {
    Field {
        name,
        ty: FieldType::Str { min_len, max_len },
        required: true,
    }
}

const fn optional_str(name: &'static str, max_len: Option<usize>) -> Field {
    Field {
        name,
        ty: FieldType::Str { min_len: 0, max_len },
        required: false,
    }
}

/// Fixed schema for `appStoreConnect` symbol sources, checked in order so the
/// first offending field is reported deterministically.
const SCHEMA: &[Field] = &[
    required_str("type", 1, None),
    required_str("id", 1, None),
    optional_str("name", None),
    required_str("appconnectIssuer", 36, Some(36)),
    required_str("appconnectKey", 2, Some(20)),
    required_str("appconnectPrivateKey", 1, None),
    required_str("itunesSession", 1, None),
    optional_str("itunesUser", None),
    optional_str("itunesCreated", None),
    optional_str("appName", Some(512)),
    required_str("appId", 1, None),
    required_str("bundleId", 1, None),
    Field {
        name: "orgId",
        ty: FieldType::Integer,
        required: true,
    },
    optional_str("orgName", None),
];

/// Validated configuration of one App Store Connect symbol source.
///
/// Immutable, and constructed only through [`SourceConfig::from_value`] or
/// [`resolve`].
#[derive(Clone, PartialEq, Eq)]
pub struct SourceConfig {
    id: String,
    key_id: String,
    private_key: String,
    issuer_id: String,
    itunes_session: String,
    org_id: i64,
    app_id: String,
    bundle_id: String,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("id", &self.id)
            .field("key_id", &self.key_id)
            .field("private_key", &"<redacted>")
            .field("issuer_id", &self.issuer_id)
            .field("itunes_session", &"<redacted>")
            .field("org_id", &self.org_id)
            .field("app_id", &self.app_id)
            .field("bundle_id", &self.bundle_id)
            .finish()
    }
}

impl SourceConfig {
    /// Validate a raw symbol source object against the fixed schema.
    pub fn from_value(value: &Value) -> Result<Self, SourceError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SourceError::invalid("symbol source is not a JSON object"))?;
        validate(obj)?;

        let source_type = str_field(obj, "type")?;
        if source_type != APP_STORE_CONNECT_TYPE {
            return Err(SourceError::invalid(format!(
                "expected type '{}', got '{}'",
                APP_STORE_CONNECT_TYPE, source_type
            )));
        }

        Ok(Self {
            id: str_field(obj, "id")?,
            key_id: str_field(obj, "appconnectKey")?,
            private_key: str_field(obj, "appconnectPrivateKey")?,
            issuer_id: str_field(obj, "appconnectIssuer")?,
            itunes_session: str_field(obj, "itunesSession")?,
            org_id: int_field(obj, "orgId")?,
            app_id: str_field(obj, "appId")?,
            bundle_id: str_field(obj, "bundleId")?,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// App Store Connect API key id (the JWT `kid`).
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// PEM-encoded PKCS#8 P-256 private key.
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// App Store Connect API issuer id (the JWT `iss`).
    pub fn issuer_id(&self) -> &str {
        &self.issuer_id
    }

    /// Value of the iTunes Connect `myacinfo` session cookie.
    pub fn itunes_session(&self) -> &str {
        &self.itunes_session
    }

    pub fn org_id(&self) -> i64 {
        self.org_id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }
}

fn validate(obj: &Map<String, Value>) -> Result<(), SourceError> {
    for field in SCHEMA {
        let value = match obj.get(field.name) {
            None | Some(Value::Null) if field.required => {
                return Err(SourceError::invalid(format!(
                    "missing required field '{}'",
                    field.name
                )));
            }
            None | Some(Value::Null) => continue,
            Some(v) => v,
        };

        match field.ty {
            FieldType::Str { min_len, max_len } => {
                let s = value.as_str().ok_or_else(|| {
                    SourceError::invalid(format!("field '{}' must be a string", field.name))
                })?;
                let len = s.chars().count();
                if len < min_len || max_len.is_some_and(|max| len > max) {
                    return Err(SourceError::invalid(format!(
                        "field '{}' has invalid length {}",
                        field.name, len
                    )));
                }
            }
            FieldType::Integer => {
                parse_integer(value).ok_or_else(|| {
                    SourceError::invalid(format!("field '{}' must be an integer", field.name))
                })?;
            }
        }
    }
    Ok(())
}

/// Integers may also arrive as strings of digits from older frontends.
fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().ok()
        }
        _ => None,
    }
}

fn str_field(obj: &Map<String, Value>, name: &str) -> Result<String, SourceError> {
    obj.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SourceError::invalid(format!("field '{}' must be a string", name)))
}

fn int_field(obj: &Map<String, Value>, name: &str) -> Result<i64, SourceError> {
    obj.get(name)
        .and_then(parse_integer)
        .ok_or_else(|| SourceError::invalid(format!("field '{}' must be an integer", name)))
}

/// Parse the raw `sentry:symbol_sources` option.
///
/// The option is stored as a JSON-encoded string, but an already-decoded
/// array is accepted too.
pub fn parse_symbol_sources(raw: &Value) -> Result<Vec<Value>, SourceError> {
    let decoded;
    let list = match raw {
        Value::String(s) => {
            decoded = serde_json::from_str::<Value>(s)
                .map_err(|e| SourceError::invalid(format!("symbol sources are not valid JSON: {}", e)))?;
            &decoded
        }
        other => other,
    };

    list.as_array()
        .cloned()
        .ok_or_else(|| SourceError::invalid("symbol sources must be a JSON list"))
}

/// Find the `appStoreConnect` source with the given id and validate it.
pub fn resolve(sources: &[Value], source_id: &str) -> Result<SourceConfig, SourceError> {
    let source = sources
        .iter()
        .find(|source| {
            source.get("type").and_then(Value::as_str) == Some(APP_STORE_CONNECT_TYPE)
                && source.get("id").and_then(Value::as_str) == Some(source_id)
        })
        .ok_or_else(|| SourceError::NotFound {
            id: source_id.to_string(),
        })?;

    SourceConfig::from_value(source)
}

/// Resolve the App Store Connect source `source_id` from a project's options.
pub fn get_app_store_config(project: &Project, source_id: &str) -> Result<SourceConfig, SourceError> {
    let raw = project
        .get_option(SYMBOL_SOURCES_PROP_NAME)
        .ok_or_else(|| SourceError::NotFound {
            id: source_id.to_string(),
        })?;
    let sources = parse_symbol_sources(raw)?;
    resolve(&sources, source_id)
}
