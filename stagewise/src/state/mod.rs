//! Persisted per-stage run state.
//!
//! Each stage gets one JSON document under the state directory, written only
//! after the stage's runner returns successfully. Commits go through a
//! temporary file and an atomic rename, so a crash mid-stage never leaves a
//! stage marked complete.

use crate::errors::PipelineError;
use crate::fingerprint::Fingerprint;
use crate::registry::DependencyRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A dependency and the fingerprint observed for it at completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyFingerprint {
    /// The declared dependency.
    pub dependency: DependencyRef,
    /// Its fingerprint at the stage's last successful completion.
    pub fingerprint: Fingerprint,
}

/// An output path and its fingerprint at completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFingerprint {
    /// The declared output path.
    pub path: PathBuf,
    /// Its fingerprint right after the stage completed.
    pub fingerprint: Fingerprint,
}

/// Everything persisted about a stage's last successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageState {
    /// Dependency fingerprints observed at completion.
    pub dependencies: Vec<DependencyFingerprint>,
    /// Output fingerprints taken at completion.
    pub outputs: Vec<OutputFingerprint>,
    /// Set once the runner has returned successfully.
    pub completed: bool,
    /// When the stage completed.
    pub completed_at: DateTime<Utc>,
}

impl StageState {
    /// Builds a completed state record stamped with the current time.
    #[must_use]
    pub fn completed(
        dependencies: Vec<DependencyFingerprint>,
        outputs: Vec<OutputFingerprint>,
    ) -> Self {
        Self {
            dependencies,
            outputs,
            completed: true,
            completed_at: Utc::now(),
        }
    }

    /// Returns the persisted fingerprint for a dependency, if recorded.
    #[must_use]
    pub fn fingerprint_of(&self, dep: &DependencyRef) -> Option<&Fingerprint> {
        self.dependencies
            .iter()
            .find(|entry| &entry.dependency == dep)
            .map(|entry| &entry.fingerprint)
    }
}

/// On-disk store for [`StageState`] documents, keyed by stage name.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, stage: &str) -> PathBuf {
        self.root.join(format!("{stage}.json"))
    }

    /// Loads the persisted state for a stage.
    ///
    /// A missing entry means the stage never completed; that is staleness,
    /// not an error.
    pub fn load(&self, stage: &str) -> Result<Option<StageState>, PipelineError> {
        let path = self.entry_path(stage);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::io(path, e)),
        };
        let state = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::serialization(format!(
                "corrupt state entry '{}': {e}",
                path.display()
            ))
        })?;
        Ok(Some(state))
    }

    /// Commits a stage's state via write-to-temp and atomic rename.
    pub fn commit(&self, stage: &str, state: &StageState) -> Result<(), PipelineError> {
        fs::create_dir_all(&self.root).map_err(|e| PipelineError::io(self.root.clone(), e))?;

        let path = self.entry_path(stage);
        let tmp = self.root.join(format!(".{stage}.json.tmp"));
        let raw = serde_json::to_string_pretty(state)
            .map_err(|e| PipelineError::serialization(e.to_string()))?;
        fs::write(&tmp, raw).map_err(|e| PipelineError::io(tmp.clone(), e))?;
        fs::rename(&tmp, &path).map_err(|e| PipelineError::io(path, e))
    }

    /// Removes a stage's persisted state, if present.
    pub fn clear(&self, stage: &str) -> Result<(), PipelineError> {
        let path = self.entry_path(stage);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::io(path, e)),
        }
    }
}
