//! The incremental scheduler: decide, execute, commit.
//!
//! Stages are visited strictly in declaration order. For each one the
//! scheduler decides whether it is stale, executes the runner if so, and
//! commits fresh dependency and output fingerprints only after the runner
//! has returned successfully. A clean stage is skipped and its artifacts
//! reused. The first stage failure aborts the run; state already committed
//! for earlier stages survives, so the next invocation resumes from the
//! failure point.

use crate::config::RunParameters;
use crate::errors::PipelineError;
use crate::fingerprint::FingerprintEngine;
use crate::registry::{StageDefinition, StageRegistry};
use crate::stages::{StageContext, StageOutcome};
use crate::state::{DependencyFingerprint, OutputFingerprint, StageState, StateStore};
use chrono::Utc;
use std::collections::HashSet;
use std::time::Instant;

use super::report::{RunReport, StageDisposition, StageReport, StaleReason};

/// Drives a registry of stages through one incremental invocation.
#[derive(Debug)]
pub struct Scheduler {
    params: std::sync::Arc<RunParameters>,
    engine: FingerprintEngine,
    store: StateStore,
}

impl Scheduler {
    /// Creates a scheduler over a configuration snapshot. Run state lives
    /// under the artifacts root.
    #[must_use]
    pub fn new(params: std::sync::Arc<RunParameters>) -> Self {
        let store = StateStore::new(params.state_dir());
        let engine = FingerprintEngine::new(params.clone());
        Self {
            params,
            engine,
            store,
        }
    }

    /// Runs every stage in order, skipping the clean ones.
    ///
    /// Returns the first stage failure as an error; stages completed before
    /// the failure keep their committed state.
    pub async fn run(&self, registry: &StageRegistry) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let mut report = empty_report();
        let mut ran: HashSet<String> = HashSet::new();

        for definition in registry.stages() {
            let stage_started = Instant::now();
            let decision = self.decide(registry, definition, &ran)?;

            match decision {
                Some(reason) => {
                    tracing::info!(stage = definition.name(), %reason, "stage is stale");
                    let outcome = self.execute_and_commit(definition).await?;
                    ran.insert(definition.name().to_string());
                    absorb(&mut report, definition, &outcome);
                    report.stages.push(self.stage_report(
                        definition,
                        StageDisposition::Ran,
                        Some(reason),
                        stage_started,
                    ));
                }
                None => {
                    tracing::info!(stage = definition.name(), "stage is clean, skipping");
                    report.stages.push(self.stage_report(
                        definition,
                        StageDisposition::Skipped,
                        None,
                        stage_started,
                    ));
                }
            }
        }

        report.duration_ms = ms_since(started);
        Ok(report)
    }

    /// Runs one named stage unconditionally, bypassing the staleness check.
    ///
    /// The stage's state is committed on success exactly as in a full run,
    /// so downstream stages will observe its fresh outputs next time.
    pub async fn run_stage(
        &self,
        registry: &StageRegistry,
        name: &str,
    ) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let definition = registry
            .get(name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;

        let mut report = empty_report();
        let outcome = self.execute_and_commit(definition).await?;
        absorb(&mut report, definition, &outcome);
        report.stages.push(self.stage_report(
            definition,
            StageDisposition::Ran,
            Some(StaleReason::Forced),
            started,
        ));
        report.duration_ms = ms_since(started);
        Ok(report)
    }

    /// Reports what a full run would do, without executing anything.
    pub fn status(&self, registry: &StageRegistry) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let mut report = empty_report();
        let mut would_run: HashSet<String> = HashSet::new();

        for definition in registry.stages() {
            let stage_started = Instant::now();
            let decision = self.decide(registry, definition, &would_run)?;
            let (disposition, reason) = match decision {
                Some(reason) => {
                    would_run.insert(definition.name().to_string());
                    (StageDisposition::Ran, Some(reason))
                }
                None => (StageDisposition::Skipped, None),
            };
            report
                .stages
                .push(self.stage_report(definition, disposition, reason, stage_started));
        }

        report.duration_ms = ms_since(started);
        Ok(report)
    }

    /// Decides whether a stage must run, given the set of stages that have
    /// already run in this invocation.
    ///
    /// Checks that need no fingerprinting come first, so a fresh tree where
    /// upstream artifacts do not exist yet never trips over unreadable
    /// dependencies.
    fn decide(
        &self,
        registry: &StageRegistry,
        definition: &StageDefinition,
        ran: &HashSet<String>,
    ) -> Result<Option<StaleReason>, PipelineError> {
        if definition.dependencies().is_empty() {
            return Ok(Some(StaleReason::NoDeclaredInputs));
        }

        let Some(state) = self.store.load(definition.name())? else {
            return Ok(Some(StaleReason::NeverRun));
        };
        if !state.completed {
            return Ok(Some(StaleReason::NeverRun));
        }

        if let Some(upstream) = registry
            .producers_of(definition.name())
            .iter()
            .find(|producer| ran.contains(producer.as_str()))
        {
            return Ok(Some(StaleReason::UpstreamRan(upstream.clone())));
        }

        for dep in definition.dependencies() {
            let current = self.engine.fingerprint(definition.name(), dep)?;
            match state.fingerprint_of(dep) {
                Some(recorded) if *recorded == current => {}
                _ => return Ok(Some(StaleReason::DependencyChanged(dep.to_string()))),
            }
        }

        for output in definition.outputs() {
            let resolved = self.params.resolve(output);
            if !resolved.exists() {
                return Ok(Some(StaleReason::MissingOutput(resolved)));
            }
        }

        Ok(None)
    }

    /// Executes a stage's runner and, on success, commits its state with
    /// dependency and output fingerprints taken at completion.
    async fn execute_and_commit(
        &self,
        definition: &StageDefinition,
    ) -> Result<StageOutcome, PipelineError> {
        let ctx = StageContext::for_definition(definition, self.params.clone());

        let outcome = match definition.runner().execute(&ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.discard_partial_outputs(definition);
                return Err(attribute(definition.name(), e));
            }
        };

        for output in definition.outputs() {
            let resolved = self.params.resolve(output);
            if !resolved.exists() {
                return Err(PipelineError::stage_execution(
                    definition.name(),
                    format!("did not produce declared output '{}'", resolved.display()),
                ));
            }
        }

        let mut dependencies = Vec::with_capacity(definition.dependencies().len());
        for dep in definition.dependencies() {
            dependencies.push(DependencyFingerprint {
                dependency: dep.clone(),
                fingerprint: self.engine.fingerprint(definition.name(), dep)?,
            });
        }
        let mut outputs = Vec::with_capacity(definition.outputs().len());
        for output in definition.outputs() {
            outputs.push(OutputFingerprint {
                path: output.clone(),
                fingerprint: self.engine.fingerprint_output(definition.name(), output)?,
            });
        }

        self.store
            .commit(definition.name(), &StageState::completed(dependencies, outputs))?;
        tracing::info!(stage = definition.name(), "stage committed");
        Ok(outcome)
    }

    /// Removes declared outputs after a failed execution, best-effort. A
    /// half-written artifact must not survive to satisfy a later staleness
    /// check.
    fn discard_partial_outputs(&self, definition: &StageDefinition) {
        for output in definition.outputs() {
            let resolved = self.params.resolve(output);
            if !resolved.exists() {
                continue;
            }
            let removal = if resolved.is_dir() {
                std::fs::remove_dir_all(&resolved)
            } else {
                std::fs::remove_file(&resolved)
            };
            if let Err(e) = removal {
                tracing::warn!(
                    stage = definition.name(),
                    path = %resolved.display(),
                    error = %e,
                    "could not discard partial output"
                );
            }
        }
    }

    fn stage_report(
        &self,
        definition: &StageDefinition,
        disposition: StageDisposition,
        reason: Option<StaleReason>,
        started: Instant,
    ) -> StageReport {
        StageReport {
            name: definition.name().to_string(),
            disposition,
            reason,
            duration_ms: ms_since(started),
            outputs: definition
                .outputs()
                .iter()
                .map(|p| self.params.resolve(p))
                .collect(),
        }
    }
}

fn empty_report() -> RunReport {
    RunReport {
        run_id: uuid::Uuid::new_v4().to_string(),
        started_at: Utc::now(),
        duration_ms: 0.0,
        stages: Vec::new(),
        metrics: None,
        warnings: Vec::new(),
    }
}

/// Folds a stage outcome into the run report, prefixing warnings with the
/// stage name.
fn absorb(report: &mut RunReport, definition: &StageDefinition, outcome: &StageOutcome) {
    if let Some(metrics) = &outcome.metrics {
        report.metrics = Some(metrics.clone());
    }
    for warning in &outcome.warnings {
        report
            .warnings
            .push(format!("{}: {warning}", definition.name()));
    }
}

/// Attributes a runner error to its stage, preserving variants that already
/// carry the stage name.
fn attribute(stage: &str, error: PipelineError) -> PipelineError {
    match error {
        e @ (PipelineError::StageExecution { .. } | PipelineError::DependencyUnavailable { .. }) => {
            e
        }
        other => PipelineError::stage_execution(stage, other.to_string()),
    }
}

fn ms_since(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
