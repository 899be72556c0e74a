//! Base-model preparation: derive the transfer-learning model descriptors.
//!
//! The pristine backbone descriptor and the updated descriptor with the
//! classifier head attached are both written as artifacts. The heavy model
//! weights live outside this runner; the descriptors are what downstream
//! stages and the registry depend on.

use super::publish::publish_json;
use super::{StageContext, StageOutcome, StageRunner};
use crate::errors::PipelineError;
use async_trait::async_trait;

/// Stage 2: prepare the base model and attach the classifier head.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrepareBaseModel;

#[async_trait]
impl StageRunner for PrepareBaseModel {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        let hyper = ctx.params().hyper();
        let cfg = &ctx.params().paths().prepare_base_model;

        let base = serde_json::json!({
            "architecture": "vgg16",
            "weights": hyper.weights,
            "include_top": hyper.include_top,
            "input_shape": hyper.image_size,
        });
        let base_path = ctx.resolve(&cfg.base_model_path);
        publish_json(&base_path, &base)?;

        let updated = serde_json::json!({
            "base": base,
            "frozen_base": true,
            "head": {
                "classes": hyper.classes,
                "activation": "softmax",
                "optimizer": "sgd",
                "learning_rate": hyper.learning_rate,
                "loss": "categorical_crossentropy",
            },
        });
        let updated_path = ctx.resolve(&cfg.updated_base_model_path);
        publish_json(&updated_path, &updated)?;

        tracing::info!(
            stage = ctx.stage(),
            classes = hyper.classes,
            "base model prepared"
        );
        Ok(StageOutcome::ok())
    }
}
