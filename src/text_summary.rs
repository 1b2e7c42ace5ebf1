//! Text rendering of the result table for CLI output.

use crate::model::{ResultRow, RowStatus};

const HEADERS: [&str; 5] = ["Source", "Output", "Timecode", "Reel", "Status"];

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build an aligned table plus a per-status tally.
pub(crate) fn build_text_summary(rows: &[ResultRow]) -> TextSummary {
    let cells: Vec<[&str; 5]> = rows
        .iter()
        .map(|r| {
            [
                r.source.as_str(),
                r.output.as_str(),
                r.timecode.as_deref().unwrap_or("-"),
                r.reel.as_deref().unwrap_or("-"),
                r.status.label(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &cells {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let render = |row: &[&str; 5]| {
        let padded: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, w)| format!("{cell:<w$}"))
            .collect();
        padded.join("  ").trim_end().to_string()
    };

    let mut lines = Vec::with_capacity(cells.len() + 3);
    lines.push(render(&HEADERS));
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    lines.extend(cells.iter().map(render));

    let tally: Vec<String> = [
        RowStatus::Ready,
        RowStatus::DryRun,
        RowStatus::MissingMetadata,
        RowStatus::Error,
        RowStatus::Pending,
    ]
    .into_iter()
    .filter_map(|status| {
        let n = rows.iter().filter(|r| r.status == status).count();
        (n > 0).then(|| format!("{status}: {n}"))
    })
    .collect();
    if !tally.is_empty() {
        lines.push(String::new());
        lines.push(tally.join(", "));
    }

    TextSummary { lines }
}
