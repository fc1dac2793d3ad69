//! JSON:API documents returned by the App Store Connect API.
//!
//! Only the fields needed to enumerate builds are modelled; everything else
//! is ignored.

use std::collections::HashMap;

use serde::Deserialize;

/// One page of a JSON:API collection response.
#[derive(Debug, Deserialize)]
pub struct Document<A> {
    pub data: Vec<Resource<A>>,
    #[serde(default)]
    pub included: Vec<Included>,
    #[serde(default)]
    pub links: Links,
}

#[derive(Debug, Deserialize)]
pub struct Resource<A> {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub attributes: A,
    #[serde(default)]
    pub relationships: HashMap<String, Relationship>,
}

/// A side-loaded resource from `include=`. Only builds are requested, but
/// other types are tolerated and filtered by `kind`.
#[derive(Debug, Deserialize)]
pub struct Included {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub attributes: BuildAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildAttributes {
    /// The build number, Apple's `CFBundleVersion`.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uploaded_date: Option<String>,
    #[serde(default)]
    pub expired: Option<bool>,
}

/// Attributes of a `preReleaseVersions` resource (a TestFlight train).
#[derive(Debug, Deserialize)]
pub struct PreReleaseVersionAttributes {
    pub version: String,
    pub platform: String,
}

/// Attributes of an `appStoreVersions` resource.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStoreVersionAttributes {
    pub version_string: String,
    pub platform: String,
}

/// Common view over the two version resource kinds.
pub trait VersionAttributes {
    fn platform(&self) -> &str;
    /// The human-readable version, Apple's `CFBundleShortVersionString`.
    fn short_version(&self) -> &str;
}

impl VersionAttributes for PreReleaseVersionAttributes {
    fn platform(&self) -> &str {
        &self.platform
    }

    fn short_version(&self) -> &str {
        &self.version
    }
}

impl VersionAttributes for AppStoreVersionAttributes {
    fn platform(&self) -> &str {
        &self.platform
    }

    fn short_version(&self) -> &str {
        &self.version_string
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub data: Option<Linkage>,
    #[serde(default)]
    pub meta: Option<RelationshipMeta>,
}

impl Relationship {
    /// Size of the full relationship when Apple reports it. Side-loaded
    /// linkage is capped by `limit[...]`, so this can exceed `data`.
    pub fn total(&self) -> Option<u64> {
        self.meta.as_ref()?.paging.as_ref().map(|p| p.total)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RelationshipMeta {
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
pub struct Paging {
    pub total: u64,
}

/// Resource linkage is a list for to-many and a single object for to-one
/// relationships.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Linkage {
    Many(Vec<ResourceId>),
    One(ResourceId),
}

impl Linkage {
    pub fn ids(&self) -> Vec<&ResourceId> {
        match self {
            Linkage::Many(ids) => ids.iter().collect(),
            Linkage::One(id) => vec![id],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResourceId {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub next: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_release_page_deserialize() {
        let json = r#"{
            "data": [{
                "type": "preReleaseVersions",
                "id": "prv-1",
                "attributes": {"version": "7.2.0", "platform": "IOS"},
                "relationships": {
                    "builds": {"data": [{"type": "builds", "id": "b1"}, {"type": "builds", "id": "b2"}]},
                    "app": {"links": {"self": "https://example.com"}}
                }
            }],
            "included": [
                {"type": "builds", "id": "b1", "attributes": {"version": "42", "uploadedDate": "2021-03-01T10:00:00-08:00"}},
                {"type": "builds", "id": "b2", "attributes": {"version": "43", "expired": true}}
            ],
            "links": {"self": "https://example.com/page1", "next": "https://example.com/page2"}
        }"#;
        let doc: Document<PreReleaseVersionAttributes> = serde_json::from_str(json).unwrap();
        assert_eq!(doc.data.len(), 1);
        assert_eq!(doc.data[0].attributes.short_version(), "7.2.0");
        let builds = doc.data[0].relationships["builds"].data.as_ref().unwrap();
        assert_eq!(builds.ids().len(), 2);
        assert!(doc.data[0].relationships["app"].data.is_none());
        assert_eq!(doc.included[1].attributes.expired, Some(true));
        assert_eq!(doc.links.next.as_deref(), Some("https://example.com/page2"));
    }

    #[test]
    fn test_app_store_version_to_one_linkage() {
        let json = r#"{
            "data": [{
                "type": "appStoreVersions",
                "id": "asv-1",
                "attributes": {"versionString": "7.1.0", "platform": "IOS", "appStoreState": "READY_FOR_SALE"},
                "relationships": {"build": {"data": {"type": "builds", "id": "b9"}}}
            }],
            "links": {"self": "https://example.com"}
        }"#;
        let doc: Document<AppStoreVersionAttributes> = serde_json::from_str(json).unwrap();
        assert_eq!(doc.data[0].attributes.short_version(), "7.1.0");
        let linkage = doc.data[0].relationships["build"].data.as_ref().unwrap();
        assert_eq!(linkage.ids()[0].id, "b9");
        assert!(doc.included.is_empty());
        assert!(doc.links.next.is_none());
    }

    #[test]
    fn test_relationship_paging_total() {
        let rel: Relationship = serde_json::from_str(
            r#"{"meta": {"paging": {"total": 120, "limit": 50}}, "data": []}"#,
        )
        .unwrap();
        assert_eq!(rel.total(), Some(120));

        let rel: Relationship = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert_eq!(rel.total(), None);
    }

    #[test]
    fn test_null_linkage() {
        let rel: Relationship = serde_json::from_str(r#"{"data": null}"#).unwrap();
        assert!(rel.data.is_none());
    }
}
