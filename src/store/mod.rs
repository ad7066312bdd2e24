use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use log::debug;
use tempfile::NamedTempFile;

use crate::sale::{SaleEngine, SaleError, SaleSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("state file {path} rejected: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: SaleError,
    },
}

/// JSON snapshot of a [`SaleEngine`] on disk. Saves go through a sibling
/// temp file and a rename so a crash never leaves a half-written state.
///
/// Every save rewrites the whole snapshot. The event log is bounded by
/// [`EVENT_LOG_LIMIT`](crate::ledger::EVENT_LOG_LIMIT) but the allocation
/// history is not, so writes grow with the number of presale allocations.
#[derive(Clone, Debug)]
pub struct SaleStore {
    path: PathBuf,
}

impl SaleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    pub fn load_snapshot(&self) -> Result<SaleSnapshot, StoreError> {
        let bytes = fs::read(&self.path).map_err(|e| self.io_err(e))?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Reads the snapshot and rebuilds the engine, checking the merkle root
    /// and the supply invariant on the way.
    pub fn load(&self) -> Result<SaleEngine, StoreError> {
        let snapshot = self.load_snapshot()?;
        SaleEngine::restore(snapshot).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, engine: &SaleEngine) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&engine.snapshot()).map_err(|source| {
            StoreError::Json {
                path: self.path.clone(),
                source,
            }
        })?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;
        // dropped (and removed) on any error before the rename
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.io_err(e))?;
        tmp.write_all(&json).map_err(|e| self.io_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        debug!(
            "state saved to {} at height {}",
            self.path.display(),
            engine.ledger().height()
        );
        Ok(())
    }
}
