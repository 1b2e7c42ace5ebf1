//! The conversion pipeline seam.
//!
//! The orchestrator never decodes audio or walks folders itself. It hands a [`JobConfig`] to a
//! [`ConversionPipeline`] and consumes the lazy stream of per-file events that comes back.

mod process;
mod scripted;

use crate::error::PipelineError;
use crate::model::{ConversionEvent, JobConfig};
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

pub use process::{locate_tool_root, ProcessPipeline, ToolConfig, DEFAULT_SCRIPT};
pub use scripted::{ScriptFeeder, ScriptedPipeline};

/// Per-file events; an `Err` item means the pipeline died and the run cannot continue.
pub type EventStream = BoxStream<'static, Result<ConversionEvent, PipelineError>>;

pub trait ConversionPipeline: Send + Sync {
    /// Begin a run. The stream must end promptly once `cancel` fires, at the latest after the
    /// file currently in flight.
    fn run(&self, config: &JobConfig, cancel: CancellationToken)
        -> Result<EventStream, PipelineError>;
}
