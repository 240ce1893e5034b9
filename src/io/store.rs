//! Registry and correlation-artifact persistence.
//!
//! Fitted registries are the portable representation of a fit: every
//! coefficient with its structured key, value, bounds, fixed/free state, and
//! standard error. The correlation artifact rides alongside under a derived
//! file name. A failed correlation build is not fatal, but it must delete any
//! stale artifact from an earlier run so the two files never disagree.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::fit::analyze::CorrelationArtifact;
use crate::params::{Registry, SavedParam};

/// On-disk schema of a saved registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedRegistry {
    pub tool: String,
    pub date: NaiveDate,
    pub version: u32,
    pub params: Vec<SavedParam>,
}

/// Store rooted at one output directory; file names derive from a base name.
#[derive(Debug, Clone)]
pub struct ParamStore {
    dir: PathBuf,
}

impl ParamStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn registry_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}_results.json"))
    }

    pub fn correlation_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}_results_correl.json"))
    }

    /// Save a registry under `<name>_results.json`.
    pub fn save_registry(&self, name: &str, registry: &Registry, version: u32) -> Result<(), AppError> {
        let path = self.registry_path(name);
        let file = create(&path)?;
        let saved = SavedRegistry {
            tool: "bfit".to_string(),
            date: chrono::Local::now().date_naive(),
            version,
            params: registry.to_saved(),
        };
        serde_json::to_writer_pretty(file, &saved)
            .map_err(|e| AppError::new(2, format!("Failed to write registry JSON: {e}")))?;
        Ok(())
    }

    /// Load a registry saved by an earlier run.
    pub fn load_registry(&self, name: &str) -> Result<(Registry, u32), AppError> {
        let path = self.registry_path(name);
        let file = File::open(&path).map_err(|e| {
            AppError::new(3, format!("Failed to open registry JSON '{}': {e}", path.display()))
        })?;
        let saved: SavedRegistry = serde_json::from_reader(file)
            .map_err(|e| AppError::new(3, format!("Invalid registry JSON: {e}")))?;
        let version = saved.version;
        let registry = Registry::from_saved(saved.params)?;
        Ok((registry, version))
    }

    /// Save a correlation artifact under `<name>_results_correl.json`.
    pub fn save_correlation(&self, name: &str, artifact: &CorrelationArtifact) -> Result<(), AppError> {
        let path = self.correlation_path(name);
        let file = create(&path)?;
        serde_json::to_writer_pretty(file, artifact)
            .map_err(|e| AppError::new(2, format!("Failed to write correlation JSON: {e}")))?;
        Ok(())
    }

    /// Delete any correlation artifact for `name`. Missing files are fine.
    pub fn delete_correlation(&self, name: &str) -> Result<(), AppError> {
        let path = self.correlation_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::new(
                2,
                format!("Failed to delete stale correlation JSON '{}': {e}", path.display()),
            )),
        }
    }

    /// Persist the outcome of a correlation build.
    ///
    /// Success writes the artifact; failure warns and removes any stale
    /// artifact so it cannot be mistaken for the current fit's.
    pub fn store_correlation_outcome(
        &self,
        name: &str,
        outcome: Result<CorrelationArtifact, String>,
    ) -> Result<(), AppError> {
        match outcome {
            Ok(artifact) => self.save_correlation(name, &artifact),
            Err(reason) => {
                eprintln!("Warning: correlation matrix not saved: {reason}.");
                self.delete_correlation(name)
            }
        }
    }
}

fn create(path: &Path) -> Result<File, AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::new(2, format!("Failed to create output directory '{}': {e}", parent.display()))
            })?;
        }
    }
    File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create '{}': {e}", path.display())))
}
