//! Stage runners: the executable unit behind each stage definition.
//!
//! Runners are pluggable capabilities, not a class hierarchy: each one is a
//! pure function of (run parameters, resolved inputs) to declared outputs.
//! The scheduler never interprets runner internals; it only requires that a
//! runner writes every declared output on success and leaves no half-written
//! outputs behind on failure.

mod base_model;
mod evaluation;
mod ingestion;
mod publish;
mod training;

pub use base_model::PrepareBaseModel;
pub use evaluation::ModelEvaluation;
pub use ingestion::DataIngestion;
pub use publish::{copy_dir_recursive, publish_file, publish_json};
pub use training::ModelTraining;

use crate::config::RunParameters;
use crate::errors::PipelineError;
use crate::metrics::MetricsSink;
use crate::registry::{StageDefinition, StageRegistry};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a stage execution hands back to the scheduler.
#[derive(Debug, Default)]
pub struct StageOutcome {
    /// Scalar metrics emitted by the stage, if any. Only the final stage
    /// produces these.
    pub metrics: Option<BTreeMap<String, f64>>,
    /// Non-fatal problems encountered while running, surfaced on the run
    /// report.
    pub warnings: Vec<String>,
}

impl StageOutcome {
    /// An outcome with no metrics and no warnings.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// Attaches metrics to the outcome.
    #[must_use]
    pub fn with_metrics(mut self, metrics: BTreeMap<String, f64>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Records a non-fatal warning.
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Everything a runner sees: the configuration snapshot plus its resolved
/// input and output paths.
#[derive(Debug, Clone)]
pub struct StageContext {
    stage: String,
    params: Arc<RunParameters>,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
}

impl StageContext {
    /// Builds the context for a stage definition, resolving declared paths
    /// against the project root.
    #[must_use]
    pub fn for_definition(definition: &StageDefinition, params: Arc<RunParameters>) -> Self {
        let inputs = definition
            .dependencies()
            .iter()
            .filter_map(|dep| dep.path().map(|p| params.resolve(p)))
            .collect();
        let outputs = definition
            .outputs()
            .iter()
            .map(|p| params.resolve(p))
            .collect();
        Self {
            stage: definition.name().to_string(),
            params,
            inputs,
            outputs,
        }
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Returns the configuration snapshot.
    #[must_use]
    pub fn params(&self) -> &RunParameters {
        &self.params
    }

    /// Returns the resolved file and directory dependency paths, in
    /// declaration order.
    #[must_use]
    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    /// Returns the resolved declared output paths, in declaration order.
    #[must_use]
    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    /// Resolves a configured path against the project root.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.params.resolve(path)
    }
}

/// The capability every stage runner implements.
#[async_trait]
pub trait StageRunner: Send + Sync + Debug {
    /// Executes the stage.
    ///
    /// Runners are idempotent given identical inputs, must write every
    /// declared output on success, and must not leave partially written
    /// outputs on failure.
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, PipelineError>;
}

/// Wires the four-stage classifier pipeline into a registry.
///
/// Declaration order encodes the dependency chain: ingestion, base-model
/// preparation, training, evaluation. Each stage's declared inputs reference
/// either the layered configuration or artifacts of strictly earlier stages.
pub fn classifier_registry(
    params: &RunParameters,
    sink: Arc<dyn MetricsSink>,
) -> Result<StageRegistry, PipelineError> {
    let paths = params.paths();

    let dataset_dir = params.resolve(&paths.data_ingestion.dataset_dir);
    let base_model = params.resolve(&paths.prepare_base_model.base_model_path);
    let updated_base_model = params.resolve(&paths.prepare_base_model.updated_base_model_path);
    let trained_model = params.resolve(&paths.training.trained_model_path);
    let scores = params.resolve(&paths.evaluation.scores_path);

    let mut ingestion = StageDefinition::new("data_ingestion", Arc::new(DataIngestion))
        .with_param_dep("data_ingestion.source_url")
        .with_output(dataset_dir.clone());
    if let Some(local) = local_source(params, &paths.data_ingestion.source_url) {
        ingestion = if local.is_dir() {
            ingestion.with_dir_dep(local)
        } else {
            ingestion.with_file_dep(local)
        };
    }

    let prepare = StageDefinition::new("prepare_base_model", Arc::new(PrepareBaseModel))
        .with_param_dep("image_size")
        .with_param_dep("learning_rate")
        .with_param_dep("include_top")
        .with_param_dep("weights")
        .with_param_dep("classes")
        .with_output(base_model)
        .with_output(updated_base_model.clone());

    let training = StageDefinition::new("training", Arc::new(ModelTraining))
        .with_file_dep(updated_base_model)
        .with_dir_dep(dataset_dir.clone())
        .with_param_dep("image_size")
        .with_param_dep("epochs")
        .with_param_dep("batch_size")
        .with_param_dep("augmentation")
        .with_output(trained_model.clone());

    let evaluation = StageDefinition::new("evaluation", Arc::new(ModelEvaluation::new(sink)))
        .with_file_dep(trained_model)
        .with_dir_dep(dataset_dir)
        .with_param_dep("image_size")
        .with_param_dep("batch_size")
        .with_output(scores);

    StageRegistry::new(vec![ingestion, prepare, training, evaluation])
}

/// Returns the resolved local path of a dataset source, or `None` for remote
/// URLs, whose identity is tracked through the `source_url` parameter alone.
fn local_source(params: &RunParameters, source_url: &str) -> Option<PathBuf> {
    if source_url.starts_with("http://") || source_url.starts_with("https://") {
        None
    } else {
        Some(params.resolve(Path::new(source_url)))
    }
}
