//! End-to-end scenarios over the four-stage classifier pipeline.

use super::{Scheduler, StaleReason};
use crate::config::HyperParams;
use crate::errors::PipelineError;
use crate::metrics::{NoOpSink, RecordingSink};
use crate::registry::{StageDefinition, StageRegistry};
use crate::stages::{classifier_registry, StageContext, StageOutcome, StageRunner};
use crate::test_support::{params_with, sample_hyper, sample_params, write_sample_dataset};
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const STAGES: [&str; 4] = [
    "data_ingestion",
    "prepare_base_model",
    "training",
    "evaluation",
];

fn pipeline(root: &Path) -> (Scheduler, StageRegistry) {
    pipeline_with(root, sample_hyper())
}

fn pipeline_with(root: &Path, hyper: HyperParams) -> (Scheduler, StageRegistry) {
    let params = params_with(root, "data/source", hyper);
    let registry = classifier_registry(&params, Arc::new(NoOpSink)).unwrap();
    (Scheduler::new(params), registry)
}

#[tokio::test]
async fn test_fresh_tree_runs_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_dataset(dir.path());
    let (scheduler, registry) = pipeline(dir.path());

    let report = scheduler.run(&registry).await.unwrap();

    for stage in STAGES {
        assert!(report.ran(stage), "{stage} should have run");
    }
    assert!(report.metrics.is_some());
    let scores = dir.path().join("artifacts/evaluation/scores.json");
    assert!(scores.exists());
}

#[tokio::test]
async fn test_second_run_skips_everything() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_dataset(dir.path());
    let (scheduler, registry) = pipeline(dir.path());

    scheduler.run(&registry).await.unwrap();
    let second = scheduler.run(&registry).await.unwrap();

    for stage in STAGES {
        assert!(second.skipped(stage), "{stage} should have been skipped");
    }
    assert!(second.metrics.is_none());
}

#[tokio::test]
async fn test_changed_parameter_reruns_only_downstream() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_dataset(dir.path());
    let (scheduler, registry) = pipeline(dir.path());
    scheduler.run(&registry).await.unwrap();

    // Bump a training-only parameter; ingestion and base-model preparation
    // do not depend on it.
    let mut hyper = sample_hyper();
    hyper.epochs = 5;
    let (scheduler, registry) = pipeline_with(dir.path(), hyper);

    let report = scheduler.run(&registry).await.unwrap();

    assert!(report.skipped("data_ingestion"));
    assert!(report.skipped("prepare_base_model"));
    assert!(report.ran("training"));
    assert!(report.ran("evaluation"));

    assert_eq!(
        report.stage("training").unwrap().reason,
        Some(StaleReason::DependencyChanged("param:epochs".to_string()))
    );
    assert_eq!(
        report.stage("evaluation").unwrap().reason,
        Some(StaleReason::UpstreamRan("training".to_string()))
    );
}

#[tokio::test]
async fn test_changed_source_data_reruns_the_whole_chain() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_dataset(dir.path());
    let (scheduler, registry) = pipeline(dir.path());
    scheduler.run(&registry).await.unwrap();

    fs::write(dir.path().join("data/source/normal/img_9.png"), "new").unwrap();

    let report = scheduler.run(&registry).await.unwrap();

    assert!(report.ran("data_ingestion"));
    assert!(report.skipped("prepare_base_model"));
    assert!(report.ran("training"));
    assert!(report.ran("evaluation"));
}

#[tokio::test]
async fn test_deleted_output_reruns_its_stage_and_downstream() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_dataset(dir.path());
    let (scheduler, registry) = pipeline(dir.path());
    scheduler.run(&registry).await.unwrap();

    let base_model = dir.path().join("artifacts/prepare_base_model/base_model.json");
    fs::remove_file(&base_model).unwrap();

    let report = scheduler.run(&registry).await.unwrap();

    assert!(report.skipped("data_ingestion"));
    assert!(report.ran("prepare_base_model"));
    assert!(report.ran("training"));
    assert!(report.ran("evaluation"));
    assert_eq!(
        report.stage("prepare_base_model").unwrap().reason,
        Some(StaleReason::MissingOutput(base_model.clone()))
    );
    assert!(base_model.exists());
}

#[tokio::test]
async fn test_status_predicts_without_executing() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_dataset(dir.path());
    let (scheduler, registry) = pipeline(dir.path());

    let status = scheduler.status(&registry).unwrap();
    for stage in STAGES {
        assert!(status.ran(stage), "{stage} should be predicted stale");
    }
    assert!(!dir.path().join("artifacts").exists());

    scheduler.run(&registry).await.unwrap();

    let status = scheduler.status(&registry).unwrap();
    for stage in STAGES {
        assert!(status.skipped(stage), "{stage} should be predicted clean");
    }
}

#[tokio::test]
async fn test_forced_single_stage_bypasses_staleness() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_dataset(dir.path());
    let (scheduler, registry) = pipeline(dir.path());
    scheduler.run(&registry).await.unwrap();

    let report = scheduler.run_stage(&registry, "training").await.unwrap();

    assert_eq!(report.stages.len(), 1);
    assert!(report.ran("training"));
    assert_eq!(
        report.stage("training").unwrap().reason,
        Some(StaleReason::Forced)
    );
}

#[tokio::test]
async fn test_forced_unknown_stage_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_dataset(dir.path());
    let (scheduler, registry) = pipeline(dir.path());

    let err = scheduler.run_stage(&registry, "deploy").await.unwrap_err();
    assert!(matches!(err, PipelineError::UnknownStage(name) if name == "deploy"));
}

#[tokio::test]
async fn test_evaluation_warnings_surface_on_the_report() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_dataset(dir.path());
    let params = sample_params(dir.path(), "data/source");
    let registry = classifier_registry(&params, Arc::new(RecordingSink::failing())).unwrap();
    let scheduler = Scheduler::new(params);

    let report = scheduler.run(&registry).await.unwrap();

    assert!(report.ran("evaluation"));
    assert_eq!(report.warnings.len(), 3);
    assert!(report.warnings.iter().all(|w| w.starts_with("evaluation:")));
}

#[derive(Debug)]
struct WritingRunner;

#[async_trait]
impl StageRunner for WritingRunner {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        for output in ctx.outputs() {
            fs::create_dir_all(output.parent().unwrap())
                .map_err(|e| PipelineError::io(output.clone(), e))?;
            fs::write(output, ctx.stage()).map_err(|e| PipelineError::io(output.clone(), e))?;
        }
        Ok(StageOutcome::ok())
    }
}

/// Writes its first output, then fails.
#[derive(Debug)]
struct FailingRunner;

#[async_trait]
impl StageRunner for FailingRunner {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        let output = &ctx.outputs()[0];
        fs::create_dir_all(output.parent().unwrap())
            .map_err(|e| PipelineError::io(output.clone(), e))?;
        fs::write(output, "partial").map_err(|e| PipelineError::io(output.clone(), e))?;
        Err(PipelineError::stage_execution(ctx.stage(), "deliberate failure"))
    }
}

#[tokio::test]
async fn test_failure_aborts_and_discards_partial_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let params = sample_params(dir.path(), "data/source");
    let first_out = dir.path().join("artifacts/first.json");
    let second_out = dir.path().join("artifacts/second.json");
    let registry = StageRegistry::new(vec![
        StageDefinition::new("first", Arc::new(WritingRunner)).with_output(first_out.clone()),
        StageDefinition::new("second", Arc::new(FailingRunner))
            .with_file_dep(first_out.clone())
            .with_output(second_out.clone()),
    ])
    .unwrap();
    let scheduler = Scheduler::new(params.clone());

    let err = scheduler.run(&registry).await.unwrap_err();

    assert_eq!(err.stage(), Some("second"));
    assert!(err.to_string().contains("deliberate failure"));

    // The first stage's work survives; the failed stage leaves nothing.
    assert!(first_out.exists());
    assert!(!second_out.exists());
    let store = crate::state::StateStore::new(params.state_dir());
    assert!(store.load("first").unwrap().is_some());
    assert!(store.load("second").unwrap().is_none());
}

#[tokio::test]
async fn test_missing_declared_output_is_an_execution_error() {
    let dir = tempfile::tempdir().unwrap();
    let params = sample_params(dir.path(), "data/source");

    // The runner writes only its first declared output.
    let written = dir.path().join("artifacts/first.json");
    let missing = dir.path().join("artifacts/never-written.json");
    let registry = StageRegistry::new(vec![StageDefinition::new(
        "incomplete",
        Arc::new(PartialRunner),
    )
    .with_output(written)
    .with_output(missing)])
    .unwrap();

    let err = Scheduler::new(params).run(&registry).await.unwrap_err();
    assert!(err.to_string().contains("did not produce declared output"));
}

/// Writes only the first declared output and reports success.
#[derive(Debug)]
struct PartialRunner;

#[async_trait]
impl StageRunner for PartialRunner {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        let output = &ctx.outputs()[0];
        fs::create_dir_all(output.parent().unwrap())
            .map_err(|e| PipelineError::io(output.clone(), e))?;
        fs::write(output, "only one").map_err(|e| PipelineError::io(output.clone(), e))?;
        Ok(StageOutcome::ok())
    }
}
