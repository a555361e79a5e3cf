//! Day-summary log
//!
//! Appends one JSON line per completed attendance day. The in-memory day
//! state is discarded on reset; this file is the local record of what the
//! day looked like just before.

use crate::domain::types::{AttendanceStatus, StudentId, TripPhase};
use chrono::NaiveDate;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct DaySummary {
    pub bus: String,
    pub date: NaiveDate,
    pub phase: TripPhase,
    pub active_students: usize,
    pub absent: usize,
    pub outbound_boarded: usize,
    pub outbound_dropped: usize,
    pub return_boarded: usize,
    pub return_dropped: usize,
    pub statuses: Vec<(StudentId, AttendanceStatus)>,
}

pub struct DayLog {
    path: PathBuf,
}

impl DayLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one summary line. Failures are logged, never fatal.
    pub fn append(&self, summary: &DaySummary) {
        if let Err(e) = self.append_inner(summary) {
            warn!(error = %e, file = %self.path.display(), "day_log_failed");
        } else {
            info!(date = %summary.date, file = %self.path.display(), "day_logged");
        }
    }

    fn append_inner(&self, summary: &DaySummary) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string(summary)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{json}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(date: NaiveDate) -> DaySummary {
        DaySummary {
            bus: "bus-01".to_string(),
            date,
            phase: TripPhase::Finished,
            active_students: 3,
            absent: 1,
            outbound_boarded: 2,
            outbound_dropped: 2,
            return_boarded: 2,
            return_dropped: 2,
            statuses: vec![
                (StudentId(1), AttendanceStatus::Boarded),
                (StudentId(2), AttendanceStatus::Boarded),
                (StudentId(3), AttendanceStatus::Absent),
            ],
        }
    }

    #[test]
    fn test_append_writes_one_line_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("days.jsonl");
        let log = DayLog::new(&path);

        log.append(&summary(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()));
        log.append(&summary(NaiveDate::from_ymd_opt(2026, 3, 3).unwrap()));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["date"], "2026-03-02");
        assert_eq!(first["phase"], "finished");
        assert_eq!(first["absent"], 1);
    }

    #[test]
    fn test_append_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/days.jsonl");
        let log = DayLog::new(&path);
        log.append(&summary(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()));
        assert!(path.exists());
    }
}
