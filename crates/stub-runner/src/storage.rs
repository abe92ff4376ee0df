//! Local storage of materialized stubs.
//!
//! The engine does not own the directories stubs were unpacked into; it only
//! asks the storage to purge them once every server has stopped.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Storage holding materialized stub bundles.
pub trait StubStorage: Send + Sync {
    /// Delete everything this storage materialized.
    fn purge(&self) -> Result<(), std::io::Error>;
}

/// Directories on disk that stubs were copied into.
#[derive(Debug, Clone, Default)]
pub struct MaterializedStubStorage {
    roots: Vec<PathBuf>,
}

impl MaterializedStubStorage {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl StubStorage for MaterializedStubStorage {
    /// Removes every root that still exists. Keeps going after a failure and
    /// returns the first one.
    fn purge(&self) -> Result<(), std::io::Error> {
        let mut first_error = None;
        for root in &self.roots {
            if let Err(e) = remove_root(root) {
                warn!("Failed to delete stub storage {:?}: {}", root, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn remove_root(root: &Path) -> Result<(), std::io::Error> {
    if !root.exists() {
        debug!("Stub storage {:?} is already gone", root);
        return Ok(());
    }
    std::fs::remove_dir_all(root)?;
    debug!("Deleted stub storage {:?}", root);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purge_removes_roots_and_tolerates_missing_ones() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        std::fs::create_dir_all(first.join("mappings")).unwrap();
        std::fs::write(first.join("mappings/get.json"), "{}").unwrap();
        let missing = dir.path().join("never-created");

        let storage = MaterializedStubStorage::new(vec![first.clone(), missing]);
        storage.purge().unwrap();
        assert!(!first.exists());

        // A second purge finds nothing left to do
        storage.purge().unwrap();
    }
}
