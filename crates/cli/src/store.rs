//! File-backed persistence for fitted model state.
//!
//! The core only produces and consumes opaque state blobs; this module decides where they live:
//! `<model_dir>/cohort_model.json` and `<model_dir>/risk_model.json`.

use adherence_core::constants::{COHORT_STATE_FILENAME, RISK_STATE_FILENAME};
use adherence_core::AdherenceService;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

/// Which models were found on disk by [`ModelStore::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedModels {
    pub cohorts: bool,
    pub risk: bool,
}

pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn cohort_path(&self) -> PathBuf {
        self.dir.join(COHORT_STATE_FILENAME)
    }

    fn risk_path(&self) -> PathBuf {
        self.dir.join(RISK_STATE_FILENAME)
    }

    /// Writes the service's fitted state. An unfitted clusterer is not written.
    pub fn save(&self, service: &AdherenceService) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating model directory {}", self.dir.display()))?;

        if service.cohorts().is_fitted() {
            let blob = service.cohorts().export_state()?;
            write(&self.cohort_path(), &blob)?;
        }
        let blob = service.risk().export_state()?;
        write(&self.risk_path(), &blob)?;

        tracing::info!(dir = %self.dir.display(), "saved model state");
        Ok(())
    }

    /// Imports whichever state files exist. Missing files leave the models as they are.
    pub fn load(&self, service: &AdherenceService) -> anyhow::Result<LoadedModels> {
        let cohorts = match read_if_exists(&self.cohort_path())? {
            Some(blob) => {
                service
                    .cohorts()
                    .import_state(&blob)
                    .with_context(|| format!("loading {}", self.cohort_path().display()))?;
                true
            }
            None => false,
        };
        let risk = match read_if_exists(&self.risk_path())? {
            Some(blob) => {
                service
                    .risk()
                    .import_state(&blob)
                    .with_context(|| format!("loading {}", self.risk_path().display()))?;
                true
            }
            None => false,
        };
        Ok(LoadedModels { cohorts, risk })
    }
}

fn write(path: &Path, blob: &[u8]) -> anyhow::Result<()> {
    fs::write(path, blob).with_context(|| format!("writing {}", path.display()))
}

fn read_if_exists(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    if !path.exists() {
        return Ok(None);
    }
    let blob = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(Some(blob))
}
