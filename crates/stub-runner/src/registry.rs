//! Registry of running stubs.
//!
//! Test code asks the registry where a stub is listening. Entries are only
//! published once every group of a fleet has started, and are removed before
//! their servers are stopped, so a reader never sees a half started or
//! already stopped server.

use crate::coordinate::{CoordinateError, StubCoordinate, StubKey};
use crate::server::StubServerHandle;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// A stub group that is up and serving.
#[derive(Debug, Clone)]
pub struct RunningStub {
    coordinate: StubCoordinate,
    host: String,
    port: u16,
    scheme: &'static str,
    mapping_count: usize,
    started_at: DateTime<Utc>,
    handle: Arc<dyn StubServerHandle>,
    /// Set once the lifecycle manager has stopped this stub and released its port
    pub(crate) released: Arc<AtomicBool>,
}

impl RunningStub {
    pub(crate) fn new(
        coordinate: StubCoordinate,
        host: String,
        scheme: &'static str,
        mapping_count: usize,
        handle: Arc<dyn StubServerHandle>,
    ) -> Self {
        Self {
            coordinate,
            host,
            port: handle.port(),
            scheme,
            mapping_count,
            started_at: Utc::now(),
            handle,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn coordinate(&self) -> &StubCoordinate {
        &self.coordinate
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL, e.g. `http://127.0.0.1:10123`
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Mappings actually served, after consumer filtering
    pub fn mapping_count(&self) -> usize {
        self.mapping_count
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub(crate) fn handle(&self) -> &Arc<dyn StubServerHandle> {
        &self.handle
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("No running stub matches '{0}'")]
    NotFound(String),
    #[error("'{query}' matches several running stubs: {}", .candidates.join(", "))]
    Ambiguous {
        query: String,
        candidates: Vec<String>,
    },
    #[error(transparent)]
    InvalidQuery(#[from] CoordinateError),
}

/// Running stubs by coordinate identity.
#[derive(Debug, Default)]
pub struct StubRegistry {
    entries: RwLock<HashMap<StubKey, RunningStub>>,
}

impl StubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a batch of stubs atomically.
    pub(crate) fn publish(&self, stubs: Vec<RunningStub>) {
        let mut entries = self.entries.write();
        for stub in stubs {
            entries.insert(stub.coordinate.key(), stub);
        }
    }

    /// Remove and return every entry.
    pub(crate) fn drain(&self) -> Vec<RunningStub> {
        let mut entries = self.entries.write();
        entries.drain().map(|(_, stub)| stub).collect()
    }

    /// Exact lookup by `(group, artifact, classifier)`.
    pub fn get(&self, coordinate: &StubCoordinate) -> Option<RunningStub> {
        self.entries.read().get(&coordinate.key()).cloned()
    }

    /// Lookup by a possibly partial ivy coordinate such as `artifact` or
    /// `group:artifact`.
    ///
    /// Fails if nothing or more than one running stub matches.
    pub fn find(&self, query: &str) -> Result<RunningStub, LookupError> {
        // An empty default classifier leaves the classifier unconstrained
        let wanted = StubCoordinate::parse(query, "")?;
        let entries = self.entries.read();
        let mut candidates: Vec<&RunningStub> = entries
            .values()
            .filter(|stub| wanted.matches(&stub.coordinate))
            .collect();

        match candidates.len() {
            0 => Err(LookupError::NotFound(query.to_string())),
            1 => Ok(candidates[0].clone()),
            _ => {
                candidates.sort_by_key(|stub| stub.coordinate.key());
                Err(LookupError::Ambiguous {
                    query: query.to_string(),
                    candidates: candidates
                        .iter()
                        .map(|stub| stub.coordinate.to_string())
                        .collect(),
                })
            }
        }
    }

    pub fn port_of(&self, query: &str) -> Option<u16> {
        self.find(query).ok().map(|stub| stub.port())
    }

    pub fn url_of(&self, query: &str) -> Option<String> {
        self.find(query).ok().map(|stub| stub.url())
    }

    /// Every running stub, ordered by coordinate.
    pub fn all(&self) -> Vec<RunningStub> {
        let mut stubs: Vec<RunningStub> = self.entries.read().values().cloned().collect();
        stubs.sort_by_key(|stub| stub.coordinate.key());
        stubs
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
