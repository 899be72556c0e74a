//! Data ingestion: materialize the dataset into the artifacts tree.
//!
//! The source is either a local file, a local directory, or an `http(s)`
//! URL. Whatever the source, the stage stages the data next to its
//! destination and swaps it into place in one rename.

use super::publish::{copy_dir_recursive, staging_dir, swap_dir_into_place};
use super::{StageContext, StageOutcome, StageRunner};
use crate::errors::PipelineError;
use async_trait::async_trait;
use std::fs;
use std::path::Path;

/// Stage 1: fetch the dataset and place it under the artifacts root.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataIngestion;

#[async_trait]
impl StageRunner for DataIngestion {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
        let cfg = &ctx.params().paths().data_ingestion;
        let dest = ctx.resolve(&cfg.dataset_dir);
        let staging = staging_dir(&dest)?;

        let files = if is_remote(&cfg.source_url) {
            download(ctx, &cfg.source_url, &staging).await?
        } else {
            copy_local(ctx, &cfg.source_url, &staging)?
        };

        swap_dir_into_place(&staging, &dest)?;
        tracing::info!(
            stage = ctx.stage(),
            files,
            dest = %dest.display(),
            "dataset materialized"
        );
        Ok(StageOutcome::ok())
    }
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

async fn download(ctx: &StageContext, url: &str, staging: &Path) -> Result<u64, PipelineError> {
    tracing::info!(stage = ctx.stage(), url, "downloading dataset");
    let response = reqwest::get(url)
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| PipelineError::stage_execution(ctx.stage(), format!("GET {url}: {e}")))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| PipelineError::stage_execution(ctx.stage(), format!("GET {url}: {e}")))?;

    let name = url
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("dataset.bin");
    let target = staging.join(name);
    fs::write(&target, &bytes).map_err(|e| PipelineError::io(target, e))?;
    Ok(1)
}

fn copy_local(ctx: &StageContext, source: &str, staging: &Path) -> Result<u64, PipelineError> {
    let src = ctx.resolve(Path::new(source));
    if src.is_dir() {
        copy_dir_recursive(&src, staging)
            .map_err(|e| PipelineError::io(src.clone(), e))
    } else if src.is_file() {
        let name = src.file_name().map_or_else(
            || "dataset.bin".into(),
            std::ffi::OsStr::to_os_string,
        );
        let target = staging.join(name);
        fs::copy(&src, &target).map_err(|e| PipelineError::io(target, e))?;
        Ok(1)
    } else {
        Err(PipelineError::dependency_unavailable(
            ctx.stage(),
            format!("file:{}", src.display()),
            "dataset source does not exist",
        ))
    }
}
