//! cycletrace: excavator work-cycle analysis.
//!
//! Feed it an operation video and it produces the sequence of
//! dig -> swing -> dump -> return cycles with timings, aggregate statistics,
//! optional simulator telemetry and a rendered training report.
//!
//! The [`coordinator::Coordinator`] drives six stages in order: frame
//! extraction, vision-model classification, event detection, cycle
//! assembly, telemetry enrichment and report generation.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod report;

pub use config::Settings;
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use error::PipelineError;
pub use pipeline::types::PipelineResult;
