//! The run report: what happened, stage by stage.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Whether a stage executed or was short-circuited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageDisposition {
    /// The stage was stale and its runner executed.
    Ran,
    /// The stage was clean; existing outputs were reused.
    Skipped,
}

/// Why a stage was considered stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// No prior successful completion is recorded.
    NeverRun,
    /// A stage with no declared inputs cannot be proven unchanged.
    NoDeclaredInputs,
    /// A dependency's fingerprint differs from the persisted one.
    DependencyChanged(String),
    /// A declared output is missing from disk.
    MissingOutput(PathBuf),
    /// An upstream producer re-ran in this invocation.
    UpstreamRan(String),
    /// Re-run was forced from the command line.
    Forced,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeverRun => f.write_str("never run"),
            Self::NoDeclaredInputs => f.write_str("no declared inputs"),
            Self::DependencyChanged(dep) => write!(f, "dependency changed: {dep}"),
            Self::MissingOutput(path) => write!(f, "missing output: {}", path.display()),
            Self::UpstreamRan(stage) => write!(f, "upstream stage '{stage}' ran"),
            Self::Forced => f.write_str("forced"),
        }
    }
}

/// One stage's entry in the run report.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    /// The stage name.
    pub name: String,
    /// Whether the stage ran or was skipped.
    pub disposition: StageDisposition,
    /// Why the stage was stale, when it ran.
    pub reason: Option<StaleReason>,
    /// Wall-clock duration of the staleness check plus execution.
    pub duration_ms: f64,
    /// The stage's declared outputs, resolved.
    pub outputs: Vec<PathBuf>,
}

impl StageReport {
    /// True if the stage executed.
    #[must_use]
    pub fn ran(&self) -> bool {
        self.disposition == StageDisposition::Ran
    }
}

/// The outcome of one pipeline invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique identity of this invocation.
    pub run_id: String,
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
    /// Total wall-clock duration.
    pub duration_ms: f64,
    /// Per-stage entries in execution order.
    pub stages: Vec<StageReport>,
    /// Metrics emitted by the final stage, when it ran.
    pub metrics: Option<BTreeMap<String, f64>>,
    /// Non-fatal problems, e.g. tracking-sink failures.
    pub warnings: Vec<String>,
}

impl RunReport {
    /// Looks up a stage's entry by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// True if the named stage executed in this invocation.
    #[must_use]
    pub fn ran(&self, name: &str) -> bool {
        self.stage(name).is_some_and(StageReport::ran)
    }

    /// True if the named stage was skipped in this invocation.
    #[must_use]
    pub fn skipped(&self, name: &str) -> bool {
        self.stage(name)
            .is_some_and(|stage| stage.disposition == StageDisposition::Skipped)
    }

    /// Renders a human-readable summary for the command line.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("run {}", self.run_id)];
        for stage in &self.stages {
            let disposition = match stage.disposition {
                StageDisposition::Ran => "ran",
                StageDisposition::Skipped => "skipped",
            };
            let reason = stage
                .reason
                .as_ref()
                .map(|reason| format!(" ({reason})"))
                .unwrap_or_default();
            lines.push(format!(
                "  {:<20} {disposition:<8}{reason} [{:.1} ms]",
                stage.name, stage.duration_ms
            ));
        }
        if let Some(metrics) = &self.metrics {
            for (name, value) in metrics {
                lines.push(format!("  {name}: {value:.4}"));
            }
        }
        for warning in &self.warnings {
            lines.push(format!("  warning: {warning}"));
        }
        lines.join("\n")
    }
}
