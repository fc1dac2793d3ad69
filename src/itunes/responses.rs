use serde::Deserialize;

/// Response from `GET /olympus/v1/session`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    #[serde(default)]
    pub provider: Option<Provider>,
    #[serde(default)]
    pub available_providers: Vec<Provider>,
}

/// A content provider (organization) the session user belongs to.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub provider_id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

/// Response from the build details endpoint.
#[derive(Debug, Deserialize)]
pub struct BuildDetailsResponse {
    #[serde(default)]
    pub data: Option<BuildDetails>,
}

#[derive(Debug, Deserialize)]
pub struct BuildDetails {
    /// Download URL for the dSYM archive, absent until Apple has one.
    #[serde(default)]
    pub dsymurl: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_response_deserialize() {
        let json = r#"{
            "user": {"fullName": "Dev"},
            "provider": {"providerId": 118407, "name": "Sample Org", "contentTypes": ["SOFTWARE"]},
            "availableProviders": [
                {"providerId": 118407, "name": "Sample Org"},
                {"providerId": 1, "name": "Other"}
            ]
        }"#;
        let session: SessionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(session.provider.unwrap().provider_id, 118407);
        assert_eq!(session.available_providers.len(), 2);
    }

    #[test]
    fn test_details_without_dsym() {
        let details: BuildDetailsResponse =
            serde_json::from_str(r#"{"data": {"dsymurl": null, "buildVersion": "1"}}"#).unwrap();
        assert!(details.data.unwrap().dsymurl.is_none());

        let details: BuildDetailsResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(details.data.is_none());
    }
}
