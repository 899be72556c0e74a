//! Incremental scheduling over an ordered stage registry.

mod report;
mod scheduler;

pub use report::{RunReport, StageDisposition, StageReport, StaleReason};
pub use scheduler::Scheduler;

#[cfg(test)]
mod scenario_tests;
