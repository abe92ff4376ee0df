//! Resolving stub coordinates into mapping bundles.
//!
//! The orchestration engine only consumes `(coordinate, bundle)` pairs.
//! [`LocalRepositoryResolver`] produces them from a directory laid out as
//!
//! ```text
//! <root>/<groupId>/<artifactId>/<version>/<classifier>/**/*.json
//! ```
//!
//! Each stub is copied into a per-run working directory before it is loaded,
//! and that directory is handed back as [`StubStorage`] so it can be purged
//! after the run.

use crate::coordinate::StubCoordinate;
use crate::error::ResolveError;
use crate::mapping::MappingBundle;
use crate::storage::{MaterializedStubStorage, StubStorage};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One stub group ready to be served.
#[derive(Debug, Clone)]
pub struct ResolvedStub {
    pub coordinate: StubCoordinate,
    pub bundle: MappingBundle,
}

impl ResolvedStub {
    pub fn new(coordinate: StubCoordinate, bundle: MappingBundle) -> Self {
        Self { coordinate, bundle }
    }
}

/// Outcome of resolving a set of coordinates.
#[derive(Default)]
pub struct Resolution {
    pub stubs: Vec<ResolvedStub>,
    /// Where the stubs were materialized, if anywhere
    pub storage: Option<Arc<dyn StubStorage>>,
}

/// Turns coordinates into bundles.
pub trait StubResolver: Send + Sync {
    fn resolve(&self, coordinates: &[StubCoordinate]) -> Result<Resolution, ResolveError>;
}

/// Resolves stubs from a directory tree on the local file system.
#[derive(Debug, Clone)]
pub struct LocalRepositoryResolver {
    root: PathBuf,
    work_dir: PathBuf,
    fail_on_missing: bool,
}

impl LocalRepositoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            work_dir: std::env::temp_dir().join(format!("stub-runner-{}", uuid::Uuid::new_v4())),
            fail_on_missing: true,
        }
    }

    /// Materialize stubs under `work_dir` instead of a fresh temp directory.
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Whether a coordinate without stubs is an error (default) or skipped.
    pub fn fail_on_missing(mut self, fail: bool) -> Self {
        self.fail_on_missing = fail;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Locate `coordinate` in the repository, pinning group and version.
    fn locate(
        &self,
        coordinate: &StubCoordinate,
    ) -> Result<Option<(StubCoordinate, PathBuf)>, ResolveError> {
        let Some(group_id) = self.find_group(coordinate)? else {
            return Ok(None);
        };
        let artifact_dir = self.root.join(&group_id).join(&coordinate.artifact_id);

        let version = match coordinate.version {
            Some(ref version) => version.clone(),
            None => match latest_version(&artifact_dir)? {
                Some(version) => version,
                None => return Ok(None),
            },
        };

        let stub_dir = artifact_dir.join(&version).join(&coordinate.classifier);
        if !stub_dir.is_dir() {
            return Ok(None);
        }

        let mut resolved = coordinate.clone().with_version(version);
        resolved.group_id = group_id;
        Ok(Some((resolved, stub_dir)))
    }

    fn find_group(&self, coordinate: &StubCoordinate) -> Result<Option<String>, ResolveError> {
        if !coordinate.group_id.is_empty() {
            let exists = self
                .root
                .join(&coordinate.group_id)
                .join(&coordinate.artifact_id)
                .is_dir();
            return Ok(exists.then(|| coordinate.group_id.clone()));
        }

        let groups = sorted_subdirectories(&self.root)?;
        Ok(groups
            .into_iter()
            .find(|group| self.root.join(group).join(&coordinate.artifact_id).is_dir()))
    }

    fn materialize(
        &self,
        coordinate: &StubCoordinate,
        source: &Path,
    ) -> Result<PathBuf, ResolveError> {
        let target = self
            .work_dir
            .join(&coordinate.group_id)
            .join(&coordinate.artifact_id)
            .join(coordinate.version_or_latest())
            .join(&coordinate.classifier);
        copy_dir(source, &target)?;
        debug!("Materialized {} from {:?} into {:?}", coordinate, source, target);
        Ok(target)
    }

    fn resolve_all(
        &self,
        coordinates: &[StubCoordinate],
    ) -> Result<Vec<ResolvedStub>, ResolveError> {
        let mut stubs = Vec::with_capacity(coordinates.len());

        for coordinate in coordinates {
            let Some((resolved, stub_dir)) = self.locate(coordinate)? else {
                if self.fail_on_missing {
                    return Err(ResolveError::NotFound(coordinate.to_string()));
                }
                warn!("No stubs found for {} in {:?}, skipping", coordinate, self.root);
                continue;
            };

            let materialized = self.materialize(&resolved, &stub_dir)?;
            let bundle = MappingBundle::load_dir(&materialized)?;
            info!("Resolved {} with {} mapping(s)", resolved, bundle.len());
            stubs.push(ResolvedStub::new(resolved, bundle));
        }
        Ok(stubs)
    }
}

impl StubResolver for LocalRepositoryResolver {
    /// Resolve every coordinate, or none: on error, whatever was already
    /// materialized is deleted again.
    fn resolve(&self, coordinates: &[StubCoordinate]) -> Result<Resolution, ResolveError> {
        let stubs = match self.resolve_all(coordinates) {
            Ok(stubs) => stubs,
            Err(e) => {
                let storage = MaterializedStubStorage::new(vec![self.work_dir.clone()]);
                if let Err(purge_error) = storage.purge() {
                    warn!(
                        "Failed to delete partially materialized stubs in {:?}: {}",
                        self.work_dir, purge_error
                    );
                }
                return Err(e);
            }
        };

        let storage: Option<Arc<dyn StubStorage>> = if stubs.is_empty() {
            None
        } else {
            Some(Arc::new(MaterializedStubStorage::new(vec![self.work_dir.clone()])))
        };
        Ok(Resolution { stubs, storage })
    }
}

/// Highest version directory under `artifact_dir`.
fn latest_version(artifact_dir: &Path) -> Result<Option<String>, ResolveError> {
    Ok(sorted_subdirectories(artifact_dir)?
        .into_iter()
        .max_by(|a, b| compare_versions(a, b)))
}

/// Compare dotted versions segment by segment, numerically where both
/// segments are numbers.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let split = |v: &str| v.split(['.', '-']).map(str::to_string).collect::<Vec<String>>();
    let (left, right) = (split(a), split(b));

    for (l, r) in left.iter().zip(right.iter()) {
        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            // A release segment sorts above a qualifier such as SNAPSHOT
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(_), Err(_)) => l.cmp(r),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    // 1.0.0 < 1.0.0.1, but 1.0.0 > 1.0.0-SNAPSHOT
    let shorter = left.len().min(right.len());
    match (left.get(shorter), right.get(shorter)) {
        (Some(extra), None) if extra.parse::<u64>().is_err() => Ordering::Less,
        (None, Some(extra)) if extra.parse::<u64>().is_err() => Ordering::Greater,
        _ => left.len().cmp(&right.len()),
    }
}

fn sorted_subdirectories(dir: &Path) -> Result<Vec<String>, ResolveError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ResolveError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    Ok(names)
}

fn copy_dir(source: &Path, target: &Path) -> Result<(), ResolveError> {
    std::fs::create_dir_all(target).map_err(io_error(target))?;
    for entry in std::fs::read_dir(source).map_err(io_error(source))? {
        let entry = entry.map_err(io_error(source))?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        if from.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).map_err(io_error(&from))?;
        }
    }
    Ok(())
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ResolveError {
    let path = path.to_path_buf();
    move |source| ResolveError::Io { path, source }
}
