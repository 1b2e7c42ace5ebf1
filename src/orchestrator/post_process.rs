//! Post-run processing utilities.
//!
//! Handles the run report, auto-save and result exports after a run ends.

use super::{LogLine, RunSnapshot};
use crate::model::{JobConfig, ResultRow, RunState};
use crate::storage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persistent record of one finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub timestamp_utc: String,
    pub state: RunState,
    pub config: Option<JobConfig>,
    pub results: Vec<ResultRow>,
    pub log: Vec<LogLine>,
}

impl RunReport {
    pub fn from_snapshot(snapshot: &RunSnapshot) -> Self {
        Self {
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            state: snapshot.state,
            config: snapshot.config.clone(),
            results: snapshot.results.clone(),
            log: snapshot.log.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostProcessOptions {
    pub auto_save: bool,
    /// Overrides the platform runs directory for auto-save.
    pub runs_dir: Option<PathBuf>,
    pub export_json: Option<PathBuf>,
    pub export_csv: Option<PathBuf>,
}

/// Result of post-run processing, ready for presentation layers.
#[derive(Debug)]
pub struct ProcessedRun {
    pub report: RunReport,
    pub export_messages: Vec<String>,
    pub auto_saved_path: Option<PathBuf>,
}

/// Build the report, auto-save it and run the requested exports. Failures become messages.
pub fn process_run_completion(snapshot: &RunSnapshot, opts: &PostProcessOptions) -> ProcessedRun {
    let report = RunReport::from_snapshot(snapshot);
    let mut export_messages = Vec::new();

    let auto_saved_path = if opts.auto_save {
        let saved = match opts.runs_dir.as_deref() {
            Some(dir) => storage::save_run_in(dir, &report),
            None => storage::save_run(&report),
        };
        match saved {
            Ok(path) => Some(path),
            Err(e) => {
                export_messages.push(format!("Auto-save failed: {e:#}"));
                None
            }
        }
    } else {
        None
    };

    if let Some(path) = opts.export_json.as_deref() {
        match storage::export_json(path, &report.results) {
            Ok(()) => export_messages.push(format!("Exported JSON: {}", path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }
    if let Some(path) = opts.export_csv.as_deref() {
        match storage::export_csv(path, &report.results) {
            Ok(()) => export_messages.push(format!("Exported CSV: {}", path.display())),
            Err(e) => export_messages.push(format!("Export CSV failed: {e:#}")),
        }
    }

    ProcessedRun {
        report,
        export_messages,
        auto_saved_path,
    }
}
