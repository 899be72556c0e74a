//! Training: produce the trained-model artifact from the prepared model and
//! the ingested dataset.
//!
//! The training loop itself is opaque to the executor; what matters here is
//! that the artifact is a pure function of the updated base model, the
//! dataset contents, and the training parameters, and that it is published
//! atomically.

use super::publish::publish_json;
use super::{StageContext, StageOutcome, StageRunner};
use crate::errors::PipelineError;
use crate::fingerprint::fingerprint_dir;
use async_trait::async_trait;
use std::fs;
use walkdir::WalkDir;

/// Stage 3: train the classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelTraining;

#[async_trait]
impl StageRunner for ModelTraining {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        let hyper = ctx.params().hyper();
        let paths = ctx.params().paths();

        let model_path = ctx.resolve(&paths.prepare_base_model.updated_base_model_path);
        let raw = fs::read_to_string(&model_path)
            .map_err(|e| PipelineError::io(model_path.clone(), e))?;
        let model: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::serialization(format!(
                "corrupt model descriptor '{}': {e}",
                model_path.display()
            ))
        })?;

        let dataset_dir = ctx.resolve(&paths.data_ingestion.dataset_dir);
        let dataset_digest = fingerprint_dir(&dataset_dir)
            .map_err(|e| PipelineError::io(dataset_dir.clone(), e))?;
        let samples = count_samples(&dataset_dir);
        let batches_per_epoch = samples.div_ceil(u64::from(hyper.batch_size.max(1)));

        let trained = serde_json::json!({
            "model": model,
            "epochs": hyper.epochs,
            "batch_size": hyper.batch_size,
            "augmentation": hyper.augmentation,
            "image_size": hyper.image_size,
            "samples": samples,
            "steps": u64::from(hyper.epochs) * batches_per_epoch,
            "dataset_digest": dataset_digest.as_hex(),
        });
        let trained_path = ctx.resolve(&paths.training.trained_model_path);
        publish_json(&trained_path, &trained)?;

        tracing::info!(
            stage = ctx.stage(),
            samples,
            epochs = hyper.epochs,
            dataset = %dataset_digest.short(),
            "model trained"
        );
        Ok(StageOutcome::ok())
    }
}

fn count_samples(dataset_dir: &std::path::Path) -> u64 {
    WalkDir::new(dataset_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StageDefinition;
    use crate::stages::PrepareBaseModel;
    use crate::test_support::{sample_params, write_sample_dataset};
    use std::path::Path;
    use std::sync::Arc;

    async fn prepare_inputs(root: &Path) -> StageContext {
        let params = sample_params(root, "data/source");
        write_sample_dataset(root);

        // Materialize the dataset where training expects it.
        let dataset_dir = params.resolve(&params.paths().data_ingestion.dataset_dir);
        std::fs::create_dir_all(dataset_dir.parent().unwrap()).unwrap();
        crate::stages::copy_dir_recursive(&root.join("data/source"), &dataset_dir).unwrap();

        // And the prepared model.
        let cfg = params.paths().prepare_base_model.clone();
        let prep = StageDefinition::new("prepare_base_model", Arc::new(PrepareBaseModel))
            .with_output(params.resolve(&cfg.base_model_path))
            .with_output(params.resolve(&cfg.updated_base_model_path));
        PrepareBaseModel
            .execute(&StageContext::for_definition(&prep, params.clone()))
            .await
            .unwrap();

        let trained_path = params.resolve(&params.paths().training.trained_model_path);
        let definition = StageDefinition::new("training", Arc::new(ModelTraining))
            .with_file_dep(params.resolve(&cfg.updated_base_model_path))
            .with_dir_dep(dataset_dir)
            .with_output(trained_path);
        StageContext::for_definition(&definition, params)
    }

    #[tokio::test]
    async fn test_trained_artifact_records_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = prepare_inputs(dir.path()).await;

        ModelTraining.execute(&ctx).await.unwrap();

        let trained_path =
            ctx.resolve(&ctx.params().paths().training.trained_model_path);
        let trained: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(trained_path).unwrap()).unwrap();
        assert_eq!(trained["samples"], 6);
        assert_eq!(trained["epochs"], 1);
        assert_eq!(trained["model"]["head"]["classes"], 2);
        assert!(trained["dataset_digest"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_retraining_on_identical_inputs_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = prepare_inputs(dir.path()).await;
        let trained_path =
            ctx.resolve(&ctx.params().paths().training.trained_model_path);

        ModelTraining.execute(&ctx).await.unwrap();
        let first = fs::read(&trained_path).unwrap();
        ModelTraining.execute(&ctx).await.unwrap();
        let second = fs::read(&trained_path).unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_missing_dataset_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let params = sample_params(dir.path(), "data/source");
        let cfg = params.paths().prepare_base_model.clone();
        let prep = StageDefinition::new("prepare_base_model", Arc::new(PrepareBaseModel))
            .with_output(params.resolve(&cfg.base_model_path))
            .with_output(params.resolve(&cfg.updated_base_model_path));
        PrepareBaseModel
            .execute(&StageContext::for_definition(&prep, params.clone()))
            .await
            .unwrap();

        let trained_path = params.resolve(&params.paths().training.trained_model_path);
        let definition = StageDefinition::new("training", Arc::new(ModelTraining))
            .with_output(trained_path.clone());
        let ctx = StageContext::for_definition(&definition, params);

        assert!(ModelTraining.execute(&ctx).await.is_err());
        assert!(!trained_path.exists());
    }
}
