//! Folding pipeline events into the per-file result table.

use crate::model::{ConversionEvent, Outcome, ResultRow, RowStatus};
use std::collections::BTreeMap;

/// Latest row per source, kept sorted by source for rendering.
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    rows: BTreeMap<String, ResultRow>,
}

impl ResultTable {
    /// Apply one event; creates the row on first sight of the source.
    pub fn apply(&mut self, event: &ConversionEvent, dry_run: bool) -> &ResultRow {
        let row = self
            .rows
            .entry(event.source.clone())
            .or_insert_with(|| ResultRow::pending(&event.source));

        if let Some(timecode) = reported(&event.timecode) {
            row.timecode = Some(timecode.to_string());
        }
        if let Some(reel) = reported(&event.reel) {
            row.reel = Some(reel.to_string());
        }
        if let Some(output) = event.output.as_deref() {
            if output != row.output {
                tracing::debug!(
                    source = %event.source,
                    reported = output,
                    derived = %row.output,
                    "ignoring pipeline output name"
                );
            }
        }
        row.status = classify(row, event.outcome, dry_run);
        row
    }

    pub fn get(&self, source: &str) -> Option<&ResultRow> {
        self.rows.get(source)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn rows(&self) -> impl Iterator<Item = &ResultRow> {
        self.rows.values()
    }
}

fn reported(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn classify(row: &ResultRow, outcome: Outcome, dry_run: bool) -> RowStatus {
    if dry_run {
        return RowStatus::DryRun;
    }
    match outcome {
        Outcome::Error => RowStatus::Error,
        Outcome::MissingMetadata => RowStatus::MissingMetadata,
        Outcome::Ready | Outcome::Probed => {
            if row.timecode.is_none() || row.reel.is_none() {
                RowStatus::MissingMetadata
            } else {
                RowStatus::Ready
            }
        }
    }
}
