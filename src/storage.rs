//! Run report persistence and result-table exports.

use crate::model::ResultRow;
use crate::orchestrator::RunReport;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory holding auto-saved run reports.
pub fn runs_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("no local data directory for this platform")?;
    Ok(base.join("mov2wav").join("runs"))
}

/// File name for a report, derived from its RFC 3339 timestamp.
pub fn report_file_name(report: &RunReport) -> String {
    let stamp = report.timestamp_utc.replace(':', "-").replace('T', "_");
    format!("mov2wav-{stamp}.json")
}

/// Save a report to the default runs directory.
pub fn save_run(report: &RunReport) -> Result<PathBuf> {
    save_run_in(&runs_dir()?, report)
}

pub fn save_run_in(dir: &Path, report: &RunReport) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(report_file_name(report));
    let data = serde_json::to_vec_pretty(report).context("serialize run report")?;
    fs::write(&path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

pub fn export_json(path: &Path, rows: &[ResultRow]) -> Result<()> {
    let data = serde_json::to_vec_pretty(rows).context("serialize results")?;
    write_creating_parent(path, &data)
}

pub fn export_csv(path: &Path, rows: &[ResultRow]) -> Result<()> {
    write_creating_parent(path, results_csv(rows).as_bytes())
}

/// Results as CSV with a header row.
pub fn results_csv(rows: &[ResultRow]) -> String {
    let mut out = String::from("source,output,timecode,reel,status\n");
    for row in rows {
        let fields = [
            row.source.as_str(),
            row.output.as_str(),
            row.timecode.as_deref().unwrap_or(""),
            row.reel.as_deref().unwrap_or(""),
            row.status.label(),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn write_creating_parent(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, data).with_context(|| format!("write {}", path.display()))
}
