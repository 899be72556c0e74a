//! Layered configuration loading.
//!
//! Two YAML documents drive a run: the location document (`config/config.yaml`,
//! artifact roots and per-stage paths) and the parameter document
//! (`params.yaml`, the hyperparameters). Both are deserialized into closed,
//! strongly typed structures and frozen into a [`RunParameters`] snapshot that
//! is passed explicitly to every component. There is no global settings
//! object.

use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Paths and endpoints for the data ingestion stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataIngestionPaths {
    /// Root directory for ingestion artifacts.
    pub root_dir: PathBuf,
    /// Where the dataset comes from: a local file, a local directory, or an
    /// `http(s)` URL.
    pub source_url: String,
    /// Directory the dataset is materialized into.
    pub dataset_dir: PathBuf,
}

/// Paths for the base-model preparation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrepareBaseModelPaths {
    /// Root directory for base-model artifacts.
    pub root_dir: PathBuf,
    /// The pristine base-model descriptor.
    pub base_model_path: PathBuf,
    /// The base model with the classifier head attached.
    pub updated_base_model_path: PathBuf,
}

/// Paths for the training stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingPaths {
    /// Root directory for training artifacts.
    pub root_dir: PathBuf,
    /// The trained model artifact.
    pub trained_model_path: PathBuf,
}

/// Paths for the evaluation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationPaths {
    /// Root directory for evaluation artifacts.
    pub root_dir: PathBuf,
    /// The local metrics document, written independently of the tracking
    /// sink.
    pub scores_path: PathBuf,
}

/// Experiment-tracking endpoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackingPaths {
    /// Base URI of the tracking server. When absent, tracking is disabled.
    #[serde(default)]
    pub tracking_uri: Option<String>,
    /// Experiment name runs are logged under.
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
}

fn default_experiment_name() -> String {
    "classifier".to_string()
}

/// The location document: artifact roots and per-stage paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Root directory all artifacts live under.
    pub artifacts_root: PathBuf,
    /// Data ingestion section.
    pub data_ingestion: DataIngestionPaths,
    /// Base-model preparation section.
    pub prepare_base_model: PrepareBaseModelPaths,
    /// Training section.
    pub training: TrainingPaths,
    /// Evaluation section.
    pub evaluation: EvaluationPaths,
    /// Tracking endpoint section.
    #[serde(default)]
    pub tracking: TrackingPaths,
}

/// The parameter document: the hyperparameters a run is sensitive to.
///
/// The schema is closed; unknown keys in the document are a configuration
/// error rather than a silent pass-through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HyperParams {
    /// Input image dimensions, `[height, width, channels]`.
    pub image_size: Vec<u32>,
    /// Optimizer learning rate.
    pub learning_rate: f64,
    /// Whether to keep the pretrained classification head.
    pub include_top: bool,
    /// Pretrained weights source.
    pub weights: String,
    /// Number of output classes.
    pub classes: u32,
    /// Training epoch count.
    pub epochs: u32,
    /// Training batch size.
    pub batch_size: u32,
    /// Whether training-time data augmentation is enabled.
    pub augmentation: bool,
}

/// Immutable per-invocation snapshot of the layered configuration.
///
/// Constructed once at startup and threaded through every component that
/// needs it. Parameter keys are resolved against the layered view: the
/// parameter document first, then the location document, so `"epochs"` and
/// `"data_ingestion.source_url"` are both valid [`DependencyRef::Param`]
/// keys.
///
/// [`DependencyRef::Param`]: crate::registry::DependencyRef::Param
#[derive(Debug, Clone)]
pub struct RunParameters {
    root: PathBuf,
    paths: PathsConfig,
    hyper: HyperParams,
    layered: serde_json::Value,
}

impl RunParameters {
    /// Loads both documents and resolves them against a project root.
    pub fn load(
        root: impl Into<PathBuf>,
        config_path: &Path,
        params_path: &Path,
    ) -> Result<Self, PipelineError> {
        let root = root.into();
        let paths: PathsConfig = read_yaml(&root, config_path)?;
        let hyper: HyperParams = read_yaml(&root, params_path)?;
        Self::from_parts(root, paths, hyper)
    }

    /// Builds a snapshot from already-parsed documents.
    pub fn from_parts(
        root: impl Into<PathBuf>,
        paths: PathsConfig,
        hyper: HyperParams,
    ) -> Result<Self, PipelineError> {
        let layered = layer_documents(&paths, &hyper)?;
        Ok(Self {
            root: root.into(),
            paths,
            hyper,
            layered,
        })
    }

    /// Returns the project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the location document.
    #[must_use]
    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    /// Returns the parameter document.
    #[must_use]
    pub fn hyper(&self) -> &HyperParams {
        &self.hyper
    }

    /// Resolves a configured path against the project root.
    ///
    /// Absolute paths pass through unchanged.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Returns the directory persisted stage state lives in.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.resolve(&self.paths.artifacts_root).join(".stagewise")
    }

    /// Looks up a parameter key in the layered configuration.
    ///
    /// Dotted keys descend into nested sections. An unknown key is a
    /// configuration error, not a silent miss.
    pub fn param_value(&self, key: &str) -> Result<serde_json::Value, PipelineError> {
        let mut current = &self.layered;
        for part in key.split('.') {
            current = current.get(part).ok_or_else(|| {
                PipelineError::config(format!("unknown parameter key '{key}'"))
            })?;
        }
        Ok(current.clone())
    }

    /// Returns the full parameter document as a JSON mapping, for the
    /// tracking sink's parameter snapshot.
    pub fn param_snapshot(&self) -> Result<serde_json::Map<String, serde_json::Value>, PipelineError> {
        match serde_json::to_value(&self.hyper)
            .map_err(|e| PipelineError::serialization(e.to_string()))?
        {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(PipelineError::serialization(
                "parameter document is not a mapping".to_string(),
            )),
        }
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(
    root: &Path,
    path: &Path,
) -> Result<T, PipelineError> {
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let raw = fs::read_to_string(&resolved).map_err(|e| {
        PipelineError::config(format!("cannot read '{}': {e}", resolved.display()))
    })?;
    serde_yaml::from_str(&raw).map_err(|e| {
        PipelineError::config(format!("malformed document '{}': {e}", resolved.display()))
    })
}

/// Merges the two documents into one lookup view.
///
/// Parameter-document keys sit at the top level and shadow location-document
/// sections of the same name.
fn layer_documents(
    paths: &PathsConfig,
    hyper: &HyperParams,
) -> Result<serde_json::Value, PipelineError> {
    let mut layered =
        serde_json::to_value(paths).map_err(|e| PipelineError::serialization(e.to_string()))?;
    let params =
        serde_json::to_value(hyper).map_err(|e| PipelineError::serialization(e.to_string()))?;
    if let (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) =
        (&mut layered, params)
    {
        for (key, value) in overlay {
            base.insert(key, value);
        }
    }
    Ok(layered)
}
