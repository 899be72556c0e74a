//! The experiment-tracking sink contract.
//!
//! The evaluation stage logs its parameter snapshot, scalar metrics, and the
//! model artifact reference to a sink. The tracking server itself is opaque:
//! the core neither retries nor buffers, and a sink failure is surfaced as a
//! warning on the run report rather than failing the stage, because the
//! stage's outputs and state are already committed by the time the sink is
//! called.

use crate::errors::PipelineError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

/// Append-only logging contract for an experiment-tracking backend.
#[async_trait]
pub trait MetricsSink: Send + Sync + Debug {
    /// Logs the run's parameter snapshot.
    async fn log_params(
        &self,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), PipelineError>;

    /// Logs scalar metrics.
    async fn log_metrics(&self, metrics: &BTreeMap<String, f64>) -> Result<(), PipelineError>;

    /// Logs a reference to a produced artifact.
    async fn log_artifact(&self, path: &Path, logical_name: &str) -> Result<(), PipelineError>;
}

/// Sink used when no tracking endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSink;

#[async_trait]
impl MetricsSink for NoOpSink {
    async fn log_params(
        &self,
        _params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn log_metrics(&self, _metrics: &BTreeMap<String, f64>) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn log_artifact(&self, _path: &Path, _logical_name: &str) -> Result<(), PipelineError> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SinkEnvelope<T: Serialize> {
    experiment: String,
    #[serde(flatten)]
    payload: T,
}

/// HTTP tracking sink posting JSON documents to a remote endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    base_url: String,
    experiment: String,
}

impl HttpSink {
    /// Creates a sink for the given tracking endpoint and experiment name.
    #[must_use]
    pub fn new(base_url: impl Into<String>, experiment: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            experiment: experiment.into(),
        }
    }

    async fn post<T: Serialize + Sync>(&self, route: &str, payload: T) -> Result<(), PipelineError> {
        let url = format!("{}/{route}", self.base_url);
        let envelope = SinkEnvelope {
            experiment: self.experiment.clone(),
            payload,
        };
        self.client
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| PipelineError::Sink(format!("POST {url}: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl MetricsSink for HttpSink {
    async fn log_params(
        &self,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), PipelineError> {
        self.post("api/params", serde_json::json!({ "params": params }))
            .await
    }

    async fn log_metrics(&self, metrics: &BTreeMap<String, f64>) -> Result<(), PipelineError> {
        self.post("api/metrics", serde_json::json!({ "metrics": metrics }))
            .await
    }

    async fn log_artifact(&self, path: &Path, logical_name: &str) -> Result<(), PipelineError> {
        self.post(
            "api/artifacts",
            serde_json::json!({ "name": logical_name, "path": path.display().to_string() }),
        )
        .await
    }
}

/// A call recorded by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// Parameters were logged.
    Params(serde_json::Map<String, serde_json::Value>),
    /// Metrics were logged.
    Metrics(BTreeMap<String, f64>),
    /// An artifact reference was logged.
    Artifact {
        /// Artifact path as logged.
        path: String,
        /// Logical artifact name.
        logical_name: String,
    },
}

/// In-memory sink for tests: records every call, optionally failing all of
/// them.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    fail: bool,
}

impl RecordingSink {
    /// Creates a recording sink that accepts every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recording sink whose calls all fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Returns the calls recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    fn record(&self, event: SinkEvent) -> Result<(), PipelineError> {
        if self.fail {
            return Err(PipelineError::Sink("tracking server unreachable".to_string()));
        }
        self.events.lock().push(event);
        Ok(())
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn log_params(
        &self,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), PipelineError> {
        self.record(SinkEvent::Params(params.clone()))
    }

    async fn log_metrics(&self, metrics: &BTreeMap<String, f64>) -> Result<(), PipelineError> {
        self.record(SinkEvent::Metrics(metrics.clone()))
    }

    async fn log_artifact(&self, path: &Path, logical_name: &str) -> Result<(), PipelineError> {
        self.record(SinkEvent::Artifact {
            path: path.display().to_string(),
            logical_name: logical_name.to_string(),
        })
    }
}
