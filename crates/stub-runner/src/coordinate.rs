//! Stub coordinates in ivy notation.
//!
//! A coordinate identifies one stub group:
//! `[groupId:]artifactId[:version][:classifier][:port]`.
//!
//! Identity is `(group, artifact, classifier)`. The version is a resolution
//! detail and the port is a placement hint, so two coordinates that differ
//! only in those compare equal and occupy the same running slot.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

pub const DEFAULT_CLASSIFIER: &str = "stubs";

const LATEST_VERSIONS: [&str; 2] = ["+", "latest"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinateError {
    #[error("Empty stub coordinate")]
    Empty,
    #[error("Stub coordinate '{0}' has no artifact id")]
    MissingArtifact(String),
    #[error("Stub coordinate '{0}' has too many segments")]
    TooManySegments(String),
    #[error("Invalid port '{port}' in stub coordinate '{notation}'")]
    InvalidPort { notation: String, port: String },
}

/// Identity of a running slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StubKey {
    pub group_id: String,
    pub artifact_id: String,
    pub classifier: String,
}

impl fmt::Display for StubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.classifier)
    }
}

/// Coordinate of one stub group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StubCoordinate {
    /// Empty when the notation omitted the group.
    #[serde(default)]
    pub group_id: String,
    pub artifact_id: String,
    /// `None` means "latest".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default = "default_classifier")]
    pub classifier: String,
    /// Explicitly pinned port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

fn default_classifier() -> String {
    DEFAULT_CLASSIFIER.to_string()
}

impl StubCoordinate {
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: None,
            classifier: default_classifier(),
            port: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = normalize_version(&version.into());
        self
    }

    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = classifier.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Parse ivy notation, filling a missing classifier with `default_classifier`.
    pub fn parse(notation: &str, default_classifier: &str) -> Result<Self, CoordinateError> {
        let notation = notation.trim();
        if notation.is_empty() {
            return Err(CoordinateError::Empty);
        }
        let parts: Vec<&str> = notation.split(':').map(str::trim).collect();

        let port_of = |segment: &str| -> Result<u16, CoordinateError> {
            match segment.parse::<u16>() {
                Ok(p) if p > 0 => Ok(p),
                _ => Err(CoordinateError::InvalidPort {
                    notation: notation.to_string(),
                    port: segment.to_string(),
                }),
            }
        };
        let is_port = |segment: &str| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit());

        let (group, artifact, version, classifier, port) = match parts.as_slice() {
            [artifact] => ("", *artifact, "", "", None),
            [artifact, port] if is_port(port) => ("", *artifact, "", "", Some(port_of(port)?)),
            [group, artifact] => (*group, *artifact, "", "", None),
            [group, artifact, port] if is_port(port) => {
                (*group, *artifact, "", "", Some(port_of(port)?))
            }
            [group, artifact, version] => (*group, *artifact, *version, "", None),
            [group, artifact, version, port] if is_port(port) => {
                (*group, *artifact, *version, "", Some(port_of(port)?))
            }
            [group, artifact, version, classifier] => {
                (*group, *artifact, *version, *classifier, None)
            }
            [group, artifact, version, classifier, port] => {
                (*group, *artifact, *version, *classifier, Some(port_of(port)?))
            }
            _ => return Err(CoordinateError::TooManySegments(notation.to_string())),
        };

        if artifact.is_empty() {
            return Err(CoordinateError::MissingArtifact(notation.to_string()));
        }

        Ok(Self {
            group_id: group.to_string(),
            artifact_id: artifact.to_string(),
            version: normalize_version(version),
            classifier: if classifier.is_empty() {
                default_classifier.to_string()
            } else {
                classifier.to_string()
            },
            port,
        })
    }

    pub fn key(&self) -> StubKey {
        StubKey {
            group_id: self.group_id.clone(),
            artifact_id: self.artifact_id.clone(),
            classifier: self.classifier.clone(),
        }
    }

    pub fn is_latest(&self) -> bool {
        self.version.is_none()
    }

    /// Version as written in notation (`+` for latest).
    pub fn version_or_latest(&self) -> &str {
        self.version.as_deref().unwrap_or("+")
    }

    /// Whether this (possibly partial) coordinate selects `other`.
    ///
    /// Artifact must match; group, version and classifier only narrow the
    /// match when they are set here.
    pub fn matches(&self, other: &StubCoordinate) -> bool {
        self.artifact_id == other.artifact_id
            && (self.group_id.is_empty() || self.group_id == other.group_id)
            && (self.classifier.is_empty() || self.classifier == other.classifier)
            && self
                .version
                .as_ref()
                .is_none_or(|v| other.version.as_ref() == Some(v))
    }
}

fn normalize_version(version: &str) -> Option<String> {
    let version = version.trim();
    if version.is_empty() || LATEST_VERSIONS.contains(&version) {
        None
    } else {
        Some(version.to_string())
    }
}

impl PartialEq for StubCoordinate {
    fn eq(&self, other: &Self) -> bool {
        self.group_id == other.group_id
            && self.artifact_id == other.artifact_id
            && self.classifier == other.classifier
    }
}

impl Eq for StubCoordinate {}

impl Hash for StubCoordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.group_id.hash(state);
        self.artifact_id.hash(state);
        self.classifier.hash(state);
    }
}

impl FromStr for StubCoordinate {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, DEFAULT_CLASSIFIER)
    }
}

impl fmt::Display for StubCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.group_id,
            self.artifact_id,
            self.version_or_latest(),
            self.classifier
        )?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}
