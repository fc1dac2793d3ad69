//! Projects and their options, loaded from a JSON projects file.
//!
//! ```json
//! {
//!   "projects": [
//!     {"id": 42, "slug": "ios-app", "options": {"sentry:symbol_sources": "[...]"}}
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

use crate::sources::SourceError;

#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub id: u64,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    options: HashMap<String, Value>,
}

impl Project {
    pub fn get_option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }
}

#[derive(Debug, Deserialize)]
struct ProjectsFile {
    #[serde(default)]
    projects: Vec<Project>,
}

#[derive(Debug, Default)]
pub struct ProjectStore {
    projects: HashMap<u64, Project>,
}

impl ProjectStore {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read projects file {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("Failed to parse projects file {}", path.display()))
    }

    pub fn from_json(contents: &str) -> anyhow::Result<Self> {
        let file: ProjectsFile = serde_json::from_str(contents)?;
        let mut projects = HashMap::with_capacity(file.projects.len());
        for project in file.projects {
            if let Some(previous) = projects.insert(project.id, project) {
                anyhow::bail!("Duplicate project id {}", previous.id);
            }
        }
        Ok(Self { projects })
    }

    pub fn get(&self, project_id: u64) -> Result<&Project, SourceError> {
        self.projects
            .get(&project_id)
            .ok_or(SourceError::ProjectNotFound { project_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_and_get() {
        let store = ProjectStore::from_json(
            r#"{"projects": [
                {"id": 1, "slug": "ios", "options": {"sentry:symbol_sources": "[]"}},
                {"id": 2}
            ]}"#,
        )
        .unwrap();

        let project = store.get(1).unwrap();
        assert_eq!(project.slug.as_deref(), Some("ios"));
        assert_eq!(
            project.get_option("sentry:symbol_sources"),
            Some(&Value::String("[]".into()))
        );
        assert!(store.get(2).unwrap().get_option("sentry:symbol_sources").is_none());
        assert!(matches!(
            store.get(3),
            Err(SourceError::ProjectNotFound { project_id: 3 })
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = ProjectStore::from_json(r#"{"projects": [{"id": 1}, {"id": 1}]}"#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProjectStore::load(&dir.path().join("nope.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read projects file"));
    }
}
