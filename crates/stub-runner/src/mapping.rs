//! Recorded interactions and the bundles that group them.
//!
//! A [`Mapping`] pairs a request pattern with a canned response. A
//! [`MappingBundle`] is the ordered set of mappings materialized from one
//! directory, each remembering the path it was loaded from relative to the
//! bundle root. Consumer scoping works off those relative paths.

use crate::error::ResolveError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Request side of a mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPattern {
    /// HTTP method, `ANY` or absent matches everything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Exact path plus query string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Exact path, query ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
    /// Regex over path plus query string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query_parameters: HashMap<String, String>,
    /// JSON bodies compare structurally, anything else as a string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Response side of a mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDefinition {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_body: Option<serde_json::Value>,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: HashMap::new(),
            body: None,
            json_body: None,
        }
    }
}

/// One recorded interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    /// Path of the file this mapping came from, relative to the bundle root.
    #[serde(skip)]
    pub source: PathBuf,
    /// Lower wins; unset sorts after every explicit priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(default)]
    pub request: RequestPattern,
    #[serde(default)]
    pub response: ResponseDefinition,
}

impl Mapping {
    pub fn new(
        source: impl Into<PathBuf>,
        request: RequestPattern,
        response: ResponseDefinition,
    ) -> Self {
        Self {
            source: source.into(),
            priority: None,
            request,
            response,
        }
    }

    /// Source path split into its segments.
    ///
    /// Both `/` and `\` are treated as separators so bundles recorded on
    /// either platform scope the same way.
    pub fn source_segments(&self) -> Vec<String> {
        self.source
            .to_string_lossy()
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
            .map(str::to_string)
            .collect()
    }
}

/// Ordered, immutable collection of mappings loaded from one root.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingBundle {
    root: PathBuf,
    mappings: Vec<Mapping>,
}

impl MappingBundle {
    pub fn new(root: impl Into<PathBuf>, mappings: Vec<Mapping>) -> Self {
        Self {
            root: root.into(),
            mappings,
        }
    }

    /// Load every `*.json` mapping below `root`, in sorted path order.
    pub fn load_dir(root: &Path) -> Result<Self, ResolveError> {
        let mut files = Vec::new();
        collect_mapping_files(root, &mut files)?;
        files.sort();

        let mut mappings = Vec::with_capacity(files.len());
        for file in files {
            let content = std::fs::read_to_string(&file).map_err(|source| ResolveError::Io {
                path: file.clone(),
                source,
            })?;
            let mut mapping: Mapping =
                serde_json::from_str(&content).map_err(|e| ResolveError::InvalidMapping {
                    path: file.clone(),
                    reason: e.to_string(),
                })?;
            mapping.source = file.strip_prefix(root).unwrap_or(&file).to_path_buf();
            mappings.push(mapping);
        }

        Ok(Self::new(root, mappings))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// A new bundle with the same root holding only the mappings `keep` accepts.
    pub fn retain<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&Mapping) -> bool,
    {
        Self {
            root: self.root.clone(),
            mappings: self.mappings.iter().filter(|m| keep(m)).cloned().collect(),
        }
    }
}

fn collect_mapping_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), ResolveError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ResolveError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_mapping_files(&path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_mapping_defaults() {
        let mapping: Mapping = serde_json::from_str(r#"{"request": {"urlPath": "/ping"}}"#).unwrap();
        assert_eq!(mapping.request.url_path.as_deref(), Some("/ping"));
        assert_eq!(mapping.response.status, 200);
        assert!(mapping.priority.is_none());
    }

    #[test]
    fn test_source_segments_accept_both_separators() {
        let mapping = Mapping::new(
            "baz-service\\some/contracts/get.json",
            RequestPattern::default(),
            ResponseDefinition::default(),
        );
        assert_eq!(
            mapping.source_segments(),
            vec!["baz-service", "some", "contracts", "get.json"]
        );
    }

    #[test]
    fn test_load_dir_records_relative_sources_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "zz-root.json",
            r#"{"request": {"url": "/root"}, "response": {"status": 204}}"#,
        );
        write(
            dir.path(),
            "baz-service/orders/get.json",
            r#"{"request": {"method": "GET", "url": "/orders"}}"#,
        );
        write(dir.path(), "notes.txt", "ignored");

        let bundle = MappingBundle::load_dir(dir.path()).unwrap();
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.root(), dir.path());
        assert_eq!(
            bundle.mappings()[0].source,
            PathBuf::from("baz-service/orders/get.json")
        );
        assert_eq!(bundle.mappings()[1].source, PathBuf::from("zz-root.json"));
        assert_eq!(bundle.mappings()[1].response.status, 204);
    }

    #[test]
    fn test_load_dir_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.json", "{not json");
        let err = MappingBundle::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidMapping { .. }));
    }

    #[test]
    fn test_retain_leaves_original_untouched() {
        let bundle = MappingBundle::new(
            "/stubs",
            vec![
                Mapping::new("a.json", RequestPattern::default(), ResponseDefinition::default()),
                Mapping::new("b.json", RequestPattern::default(), ResponseDefinition::default()),
            ],
        );
        let only_a = bundle.retain(|m| m.source == Path::new("a.json"));
        assert_eq!(only_a.len(), 1);
        assert_eq!(bundle.len(), 2);
        assert_eq!(only_a.root(), Path::new("/stubs"));
    }
}
