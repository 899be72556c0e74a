//! # Stagewise
//!
//! An incremental executor for a staged image-classifier training pipeline.
//!
//! Stagewise runs an ordered chain of stages — data ingestion, base-model
//! preparation, training, evaluation — and skips every stage whose declared
//! inputs are unchanged since its last successful run:
//!
//! - **Declared dependencies**: each stage names the files, directories, and
//!   parameter keys it is sensitive to
//! - **Content fingerprints**: SHA-256 over file bytes, directory manifests,
//!   and canonical parameter JSON decides staleness, never timestamps
//! - **Persisted state**: per-stage fingerprints are committed atomically
//!   after each successful run, so interrupted runs resume cleanly
//! - **Propagated staleness**: a stage that re-runs marks every downstream
//!   consumer of its artifacts stale in the same invocation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagewise::prelude::*;
//!
//! let params = Arc::new(RunParameters::load(
//!     ".",
//!     Path::new("config/config.yaml"),
//!     Path::new("params.yaml"),
//! )?);
//! let registry = classifier_registry(&params, Arc::new(NoOpSink))?;
//! let report = Scheduler::new(params).run(&registry).await?;
//! println!("{}", report.summary());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod stages;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::config::RunParameters;
    pub use crate::errors::PipelineError;
    pub use crate::fingerprint::{Fingerprint, FingerprintEngine};
    pub use crate::metrics::{HttpSink, MetricsSink, NoOpSink};
    pub use crate::pipeline::{RunReport, Scheduler, StageDisposition, StaleReason};
    pub use crate::registry::{DependencyRef, StageDefinition, StageRegistry};
    pub use crate::stages::{classifier_registry, StageContext, StageOutcome, StageRunner};
}
