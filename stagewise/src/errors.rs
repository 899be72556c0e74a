//! Error types for the stagewise pipeline runner.
//!
//! The taxonomy separates configuration problems (caught before any stage
//! runs), dependency problems (caught at fingerprint time), registry
//! construction problems, stage execution failures, and tracking-sink
//! failures, which are the only non-fatal kind.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or missing configuration, or an unknown parameter key.
    #[error("configuration error: {0}")]
    Config(String),

    /// A declared input was missing or unreadable at fingerprint time.
    #[error("dependency unavailable for stage '{stage}': {dependency}: {cause}")]
    DependencyUnavailable {
        /// The stage whose dependency could not be fingerprinted.
        stage: String,
        /// The dependency that was unavailable.
        dependency: String,
        /// The underlying cause.
        cause: String,
    },

    /// Two stages declared the same output path.
    #[error("output collision: '{}' is declared by both '{first}' and '{second}'", path.display())]
    OutputCollision {
        /// The colliding output path.
        path: PathBuf,
        /// The stage that declared the path first.
        first: String,
        /// The stage that declared it again.
        second: String,
    },

    /// A stage runner failed.
    #[error("stage '{stage}' failed: {cause}")]
    StageExecution {
        /// The failing stage.
        stage: String,
        /// The underlying cause.
        cause: String,
    },

    /// The metrics sink could not be reached or rejected a request.
    ///
    /// Non-fatal: surfaced as a warning on the run report, never rolls back
    /// committed pipeline state.
    #[error("metrics sink error: {0}")]
    Sink(String),

    /// A stage name was not found in the registry.
    #[error("unknown stage: '{0}'")]
    UnknownStage(String),

    /// An I/O error outside of stage execution.
    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a dependency-unavailable error.
    #[must_use]
    pub fn dependency_unavailable(
        stage: impl Into<String>,
        dependency: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self::DependencyUnavailable {
            stage: stage.into(),
            dependency: dependency.into(),
            cause: cause.into(),
        }
    }

    /// Creates a stage execution error.
    #[must_use]
    pub fn stage_execution(stage: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::StageExecution {
            stage: stage.into(),
            cause: cause.into(),
        }
    }

    /// Creates an I/O error tied to a path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Returns true if the error is non-fatal for the pipeline run.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Sink(_))
    }

    /// Returns the stage name the error is attributed to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::DependencyUnavailable { stage, .. } | Self::StageExecution { stage, .. } => {
                Some(stage)
            }
            _ => None,
        }
    }
}
