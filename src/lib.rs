//! Run orchestration for the mov2wav conform pipeline.
//!
//! [`orchestrator::Orchestrator`] owns the lifecycle of one conversion run. It drives a
//! [`pipeline::ConversionPipeline`] and folds the per-file events into a result table and an
//! append-only log. The `mov2wav` binary is a thin CLI on top.

pub mod cli;
pub mod error;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod settings;
pub mod storage;
mod text_summary;
