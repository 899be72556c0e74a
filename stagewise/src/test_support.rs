//! Shared fixtures for unit and scenario tests.

use crate::config::{
    DataIngestionPaths, EvaluationPaths, HyperParams, PathsConfig, PrepareBaseModelPaths,
    RunParameters, TrackingPaths, TrainingPaths,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A typical parameter document.
#[must_use]
pub fn sample_hyper() -> HyperParams {
    HyperParams {
        image_size: vec![224, 224, 3],
        learning_rate: 0.01,
        include_top: false,
        weights: "imagenet".to_string(),
        classes: 2,
        epochs: 1,
        batch_size: 16,
        augmentation: true,
    }
}

/// A typical location document, with the dataset coming from `source_url`.
#[must_use]
pub fn sample_paths(source_url: &str) -> PathsConfig {
    PathsConfig {
        artifacts_root: PathBuf::from("artifacts"),
        data_ingestion: DataIngestionPaths {
            root_dir: PathBuf::from("artifacts/data_ingestion"),
            source_url: source_url.to_string(),
            dataset_dir: PathBuf::from("artifacts/data_ingestion/dataset"),
        },
        prepare_base_model: PrepareBaseModelPaths {
            root_dir: PathBuf::from("artifacts/prepare_base_model"),
            base_model_path: PathBuf::from("artifacts/prepare_base_model/base_model.json"),
            updated_base_model_path: PathBuf::from(
                "artifacts/prepare_base_model/base_model_updated.json",
            ),
        },
        training: TrainingPaths {
            root_dir: PathBuf::from("artifacts/training"),
            trained_model_path: PathBuf::from("artifacts/training/model.json"),
        },
        evaluation: EvaluationPaths {
            root_dir: PathBuf::from("artifacts/evaluation"),
            scores_path: PathBuf::from("artifacts/evaluation/scores.json"),
        },
        tracking: TrackingPaths::default(),
    }
}

/// Builds a configuration snapshot rooted at `root`.
#[must_use]
pub fn sample_params(root: &Path, source_url: &str) -> Arc<RunParameters> {
    params_with(root, source_url, sample_hyper())
}

/// Builds a configuration snapshot with a custom parameter document.
#[must_use]
pub fn params_with(root: &Path, source_url: &str, hyper: HyperParams) -> Arc<RunParameters> {
    #[allow(clippy::unwrap_used)]
    Arc::new(RunParameters::from_parts(root, sample_paths(source_url), hyper).unwrap())
}

/// Writes a small two-class image dataset under `root/data/source`.
#[allow(clippy::unwrap_used)]
pub fn write_sample_dataset(root: &Path) {
    for class in ["normal", "tumor"] {
        let class_dir = root.join("data/source").join(class);
        fs::create_dir_all(&class_dir).unwrap();
        for index in 0..3 {
            fs::write(
                class_dir.join(format!("img_{index}.png")),
                format!("{class}-{index}"),
            )
            .unwrap();
        }
    }
}
