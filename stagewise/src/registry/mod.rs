//! Stage definitions and the ordered stage registry.
//!
//! Declaration order is execution order: the four-stage chain is linear, and
//! a stage may only consume artifacts produced by strictly earlier stages.
//! The registry validates that property, rejects duplicate output
//! declarations, and precomputes each stage's upstream producers for
//! propagated staleness.

use crate::errors::PipelineError;
use crate::stages::StageRunner;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifies what must be fingerprinted for a stage, not its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum DependencyRef {
    /// A single file's bytes.
    File(PathBuf),
    /// A directory's recursive contents.
    Dir(PathBuf),
    /// A parameter value in the layered configuration, by exact key.
    Param(String),
}

impl DependencyRef {
    /// Returns the filesystem path for file and directory dependencies.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) | Self::Dir(path) => Some(path),
            Self::Param(_) => None,
        }
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::Dir(path) => write!(f, "dir:{}", path.display()),
            Self::Param(key) => write!(f, "param:{key}"),
        }
    }
}

/// An immutable stage declaration: name, dependencies, outputs, runner.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    name: String,
    dependencies: Vec<DependencyRef>,
    outputs: Vec<PathBuf>,
    runner: Arc<dyn StageRunner>,
}

impl StageDefinition {
    /// Creates a definition with no declared dependencies or outputs.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn StageRunner>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            outputs: Vec::new(),
            runner,
        }
    }

    /// Declares a file dependency.
    #[must_use]
    pub fn with_file_dep(mut self, path: impl Into<PathBuf>) -> Self {
        self.dependencies.push(DependencyRef::File(path.into()));
        self
    }

    /// Declares a directory dependency.
    #[must_use]
    pub fn with_dir_dep(mut self, path: impl Into<PathBuf>) -> Self {
        self.dependencies.push(DependencyRef::Dir(path.into()));
        self
    }

    /// Declares a parameter dependency by exact key.
    #[must_use]
    pub fn with_param_dep(mut self, key: impl Into<String>) -> Self {
        self.dependencies.push(DependencyRef::Param(key.into()));
        self
    }

    /// Declares an output artifact path.
    #[must_use]
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared dependencies, in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[DependencyRef] {
        &self.dependencies
    }

    /// Returns the declared outputs, in declaration order.
    #[must_use]
    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    /// Returns the executable unit for this stage.
    #[must_use]
    pub fn runner(&self) -> &Arc<dyn StageRunner> {
        &self.runner
    }
}

/// The ordered list of stage definitions for one pipeline.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<StageDefinition>,
    producers: HashMap<String, Vec<String>>,
}

impl StageRegistry {
    /// Validates the declarations and builds the registry.
    ///
    /// Construction fails on a duplicate stage name, on two stages declaring
    /// the same output path, and on a stage consuming a path that only a
    /// later stage produces.
    pub fn new(stages: Vec<StageDefinition>) -> Result<Self, PipelineError> {
        let mut seen_outputs: HashMap<PathBuf, String> = HashMap::new();
        let mut seen_names: HashMap<String, usize> = HashMap::new();

        for (index, stage) in stages.iter().enumerate() {
            if seen_names.insert(stage.name.clone(), index).is_some() {
                return Err(PipelineError::config(format!(
                    "duplicate stage name '{}'",
                    stage.name
                )));
            }
            for output in &stage.outputs {
                if let Some(first) = seen_outputs.get(output) {
                    return Err(PipelineError::OutputCollision {
                        path: output.clone(),
                        first: first.clone(),
                        second: stage.name.clone(),
                    });
                }
                seen_outputs.insert(output.clone(), stage.name.clone());
            }
        }

        // A dependency may only point at outputs of strictly earlier stages.
        for (index, stage) in stages.iter().enumerate() {
            for dep in &stage.dependencies {
                let Some(dep_path) = dep.path() else {
                    continue;
                };
                for later in &stages[index + 1..] {
                    if later.outputs.iter().any(|o| paths_overlap(dep_path, o)) {
                        return Err(PipelineError::config(format!(
                            "stage '{}' consumes '{}', which is produced by '{}'; \
                             producers must be declared strictly earlier",
                            stage.name,
                            dep_path.display(),
                            later.name,
                        )));
                    }
                }
            }
        }

        let producers = compute_producers(&stages);
        Ok(Self { stages, producers })
    }

    /// Returns the stages in declaration (execution) order.
    #[must_use]
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// Returns the names of the upstream stages producing this stage's
    /// declared inputs.
    #[must_use]
    pub fn producers_of(&self, name: &str) -> &[String] {
        self.producers.get(name).map_or(&[], Vec::as_slice)
    }
}

/// For each stage, the earlier stages whose declared outputs overlap one of
/// its file or directory dependencies.
fn compute_producers(stages: &[StageDefinition]) -> HashMap<String, Vec<String>> {
    let mut producers: HashMap<String, Vec<String>> = HashMap::new();
    for (index, stage) in stages.iter().enumerate() {
        let mut upstream = Vec::new();
        for earlier in &stages[..index] {
            let feeds = stage.dependencies.iter().any(|dep| {
                dep.path()
                    .is_some_and(|p| earlier.outputs.iter().any(|o| paths_overlap(p, o)))
            });
            if feeds {
                upstream.push(earlier.name.clone());
            }
        }
        producers.insert(stage.name.clone(), upstream);
    }
    producers
}

/// True when one path is the other or contains the other.
fn paths_overlap(a: &Path, b: &Path) -> bool {
    a == b || a.starts_with(b) || b.starts_with(a)
}
