// src/record_log.rs
//
// Append-only run log: one JSON line per road status per tick.
// Timestamps are a wall-clock anchor taken at startup plus monotonic
// elapsed time, so they never go backwards even if the system clock does.

use crate::types::RoadStatus;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord {
    pub timestamp: DateTime<Utc>,
    pub tick: u64,
    pub road: String,
    pub alert: bool,
    pub vehicle_count: u32,
    pub min_distance: f32,
    pub speed_score: f32,
}

impl StatusRecord {
    pub fn from_status(timestamp: DateTime<Utc>, tick: u64, status: &RoadStatus) -> Self {
        Self {
            timestamp,
            tick,
            road: status.road.clone(),
            alert: status.alert,
            vehicle_count: status.vehicle_count,
            min_distance: status.min_distance,
            speed_score: status.speed_score,
        }
    }
}

pub trait RecordSink: Send {
    fn append(&mut self, record: &StatusRecord) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Wall-clock timestamps that follow the monotonic clock after startup.
#[derive(Debug, Clone, Copy)]
pub struct RecordClock {
    wall_anchor: DateTime<Utc>,
    mono_anchor: Instant,
}

impl RecordClock {
    pub fn start() -> Self {
        Self {
            wall_anchor: Utc::now(),
            mono_anchor: Instant::now(),
        }
    }

    pub fn timestamp_at(&self, at: Instant) -> DateTime<Utc> {
        let elapsed = at.saturating_duration_since(self.mono_anchor);
        match chrono::Duration::from_std(elapsed) {
            Ok(d) => self.wall_anchor + d,
            Err(_) => self.wall_anchor,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.timestamp_at(Instant::now())
    }
}

pub struct JsonlRecordLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlRecordLog {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory {}", parent.display())
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open record log {}", path.display()))?;

        info!("💾 Status records will be appended to: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }
}

impl RecordSink for JsonlRecordLog {
    fn append(&mut self, record: &StatusRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush record log {}", self.path.display()))
    }
}

/// Sink used when record logging is disabled.
pub struct NullSink;

impl RecordSink for NullSink {
    fn append(&mut self, _record: &StatusRecord) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run.jsonl");
        let clock = RecordClock::start();

        let mut log = JsonlRecordLog::create(&path).unwrap();
        for tick in 1..=2 {
            let ts = clock.now();
            log.append(&StatusRecord::from_status(ts, tick, &RoadStatus::idle("EAST")))
                .unwrap();
            log.append(&StatusRecord::from_status(ts, tick, &RoadStatus::idle("WEST")))
                .unwrap();
        }
        log.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["road"], "EAST");
        assert_eq!(lines[3]["tick"], 2);
        assert_eq!(lines[1]["min_distance"], 200.0);
        assert_eq!(lines[1]["alert"], false);
    }

    #[test]
    fn test_timestamps_follow_monotonic_clock() {
        let clock = RecordClock::start();
        let base = Instant::now();
        let a = clock.timestamp_at(base);
        let b = clock.timestamp_at(base + Duration::from_millis(40));
        assert!(b > a);
        assert_eq!((b - a).num_milliseconds(), 40);
    }

    #[test]
    fn test_reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let ts = RecordClock::start().now();

        for _ in 0..2 {
            let mut log = JsonlRecordLog::create(&path).unwrap();
            log.append(&StatusRecord::from_status(ts, 1, &RoadStatus::idle("MAIN")))
                .unwrap();
            log.flush().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
