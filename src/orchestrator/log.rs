//! Timestamped, append-only run log shown to the user.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::macros::format_description;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Wall-clock time of the append, `HH:MM:SS`.
    pub timestamp: String,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogLines {
    lines: Vec<LogLine>,
}

impl LogLines {
    pub fn push(&mut self, message: impl Into<String>) {
        self.push_at(wall_clock(), message);
    }

    pub(crate) fn push_at(&mut self, timestamp: String, message: impl Into<String>) {
        self.lines.push(LogLine {
            timestamp,
            message: message.into(),
        });
    }

    pub fn reset(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    /// Lines appended after the first `seen`; lets a renderer print incrementally.
    pub fn since(&self, seen: usize) -> &[LogLine] {
        self.lines.get(seen..).unwrap_or(&[])
    }
}

fn wall_clock() -> String {
    // Local offset lookup fails on some multi-threaded unix setups; fall back to UTC.
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "--:--:--".into())
}
