//! Error types shared by the orchestrator and the pipelines.

use std::io;
use std::process::ExitStatus;

use thiserror::Error;

/// Problems turning form settings into a runnable job.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Input or output folder empty after trimming.
    #[error("input and output folders must both be selected")]
    MissingFolders,

    #[error("unknown {field}: '{value}'")]
    UnknownValue { field: &'static str, value: String },
}

/// Failures that end a run as a whole, as opposed to per-file errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error reading conversion tool output: {0}")]
    Io(#[from] io::Error),

    #[error("conversion tool exited unexpectedly ({status})")]
    Exited { status: ExitStatus },

    #[error("{0}")]
    Unavailable(String),
}

impl PipelineError {
    pub fn launch(program: impl Into<String>, source: io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            source,
        }
    }
}
