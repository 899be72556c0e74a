//! Evaluation: score the trained model and report the results.
//!
//! Writes `scores.json` locally first, so inspection never depends on the
//! tracking server being reachable, then logs the parameter snapshot,
//! metrics, and model artifact to the sink. Sink failures are demoted to
//! warnings: by the time the sink is called the stage's outputs are already
//! on disk.

use super::publish::publish_json;
use super::{StageContext, StageOutcome, StageRunner};
use crate::errors::PipelineError;
use crate::fingerprint::{fingerprint_bytes, fingerprint_dir, fingerprint_file};
use crate::metrics::MetricsSink;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Stage 4: evaluate the trained model and log the run.
#[derive(Debug)]
pub struct ModelEvaluation {
    sink: Arc<dyn MetricsSink>,
}

impl ModelEvaluation {
    /// Creates the evaluation runner with the sink the results go to.
    #[must_use]
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl StageRunner for ModelEvaluation {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        let paths = ctx.params().paths();
        let model_path = ctx.resolve(&paths.training.trained_model_path);
        let dataset_dir = ctx.resolve(&paths.data_ingestion.dataset_dir);

        let model_digest = fingerprint_file(&model_path)
            .map_err(|e| PipelineError::io(model_path.clone(), e))?;
        let dataset_digest = fingerprint_dir(&dataset_dir)
            .map_err(|e| PipelineError::io(dataset_dir.clone(), e))?;

        let metrics = score(model_digest.as_hex(), dataset_digest.as_hex());
        let scores_path = ctx.resolve(&paths.evaluation.scores_path);
        publish_json(&scores_path, &metrics)?;
        tracing::info!(
            stage = ctx.stage(),
            accuracy = metrics.get("accuracy").copied(),
            loss = metrics.get("loss").copied(),
            "evaluation complete"
        );

        let mut outcome = StageOutcome::ok().with_metrics(metrics.clone());
        for warning in self.log_run(ctx, &metrics, &model_path).await {
            tracing::warn!(stage = ctx.stage(), warning, "tracking sink call failed");
            outcome.push_warning(warning);
        }
        Ok(outcome)
    }
}

impl ModelEvaluation {
    async fn log_run(
        &self,
        ctx: &StageContext,
        metrics: &BTreeMap<String, f64>,
        model_path: &Path,
    ) -> Vec<String> {
        let mut warnings = Vec::new();

        match ctx.params().param_snapshot() {
            Ok(snapshot) => {
                if let Err(e) = self.sink.log_params(&snapshot).await {
                    warnings.push(e.to_string());
                }
            }
            Err(e) => warnings.push(e.to_string()),
        }
        if let Err(e) = self.sink.log_metrics(metrics).await {
            warnings.push(e.to_string());
        }
        if let Err(e) = self.sink.log_artifact(model_path, "model").await {
            warnings.push(e.to_string());
        }

        warnings
    }
}

/// Deterministic proxy score over the model/dataset identity. The real
/// evaluation loop lives with the model runtime, outside this executor.
fn score(model_digest: &str, dataset_digest: &str) -> BTreeMap<String, f64> {
    let seed = fingerprint_bytes(format!("{model_digest}:{dataset_digest}").as_bytes());
    let word = u64::from_str_radix(&seed.as_hex()[..16], 16).unwrap_or(0);
    #[allow(clippy::cast_precision_loss)]
    let fraction = word as f64 / u64::MAX as f64;

    let accuracy = 0.5 + fraction / 2.0;
    let loss = -accuracy.ln();

    let mut metrics = BTreeMap::new();
    metrics.insert("accuracy".to_string(), accuracy);
    metrics.insert("loss".to_string(), loss);
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{RecordingSink, SinkEvent};
    use crate::registry::StageDefinition;
    use crate::test_support::sample_params;
    use std::fs;

    async fn sandbox(root: &Path) -> StageContext {
        let params = sample_params(root, "data/source");

        let dataset_dir = params.resolve(&params.paths().data_ingestion.dataset_dir);
        fs::create_dir_all(&dataset_dir).unwrap();
        fs::write(dataset_dir.join("img.png"), "pixels").unwrap();

        let trained_path = params.resolve(&params.paths().training.trained_model_path);
        fs::create_dir_all(trained_path.parent().unwrap()).unwrap();
        fs::write(&trained_path, "{\"model\": {}}").unwrap();

        let scores_path = params.resolve(&params.paths().evaluation.scores_path);
        let definition = StageDefinition::new(
            "evaluation",
            Arc::new(ModelEvaluation::new(Arc::new(RecordingSink::new()))),
        )
        .with_file_dep(trained_path)
        .with_dir_dep(dataset_dir)
        .with_output(scores_path);
        StageContext::for_definition(&definition, params)
    }

    #[tokio::test]
    async fn test_scores_written_and_logged() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = sandbox(dir.path()).await;
        let sink = Arc::new(RecordingSink::new());

        let outcome = ModelEvaluation::new(sink.clone()).execute(&ctx).await.unwrap();

        let metrics = outcome.metrics.unwrap();
        assert!(metrics.contains_key("accuracy"));
        assert!(metrics.contains_key("loss"));
        assert!(outcome.warnings.is_empty());

        let scores_path = ctx.resolve(&ctx.params().paths().evaluation.scores_path);
        let written: BTreeMap<String, f64> =
            serde_json::from_str(&fs::read_to_string(scores_path).unwrap()).unwrap();
        assert_eq!(written, metrics);

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], SinkEvent::Params(_)));
        assert!(matches!(events[1], SinkEvent::Metrics(_)));
    }

    #[tokio::test]
    async fn test_sink_failure_is_non_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = sandbox(dir.path()).await;

        let outcome = ModelEvaluation::new(Arc::new(RecordingSink::failing()))
            .execute(&ctx)
            .await
            .unwrap();

        // All three sink calls failed, the stage itself did not.
        assert_eq!(outcome.warnings.len(), 3);
        let scores_path = ctx.resolve(&ctx.params().paths().evaluation.scores_path);
        assert!(scores_path.exists());
    }

    #[tokio::test]
    async fn test_score_is_deterministic_per_inputs() {
        let left = score("aaaa", "bbbb");
        assert_eq!(left, score("aaaa", "bbbb"));
        assert_ne!(left, score("aaaa", "cccc"));

        let accuracy = left["accuracy"];
        assert!((0.5..=1.0).contains(&accuracy));
        assert!(left["loss"] >= 0.0);
    }
}
