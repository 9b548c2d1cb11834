use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Format tag written into every exported time log.
pub const TIMELOG_FORMAT: &str = "rdastream-timelog/v1";

/// Bounded FIFO of data block arrival times, in seconds since the Unix epoch.
///
/// When full, recording a new timestamp evicts the oldest one.
#[derive(Debug, Clone)]
pub struct TimeLog {
    entries: VecDeque<f64>,
    capacity: usize,
}

/// On-disk form of a [`TimeLog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeLogExport {
    pub format: String,
    pub timestamps: Vec<f64>,
}

impl TimeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Record the current wall-clock time.
    pub fn record_now(&mut self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.push(now);
    }

    pub fn push(&mut self, timestamp: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(timestamp);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn timestamps(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().copied()
    }

    pub fn export(&self) -> TimeLogExport {
        TimeLogExport {
            format: TIMELOG_FORMAT.to_string(),
            timestamps: self.entries.iter().copied().collect(),
        }
    }

    /// Write the log as JSON to `path`, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &self.export())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Read a time log written by [`TimeLog::save`].
pub fn load_timelog(path: &Path) -> Result<TimeLogExport> {
    let raw = std::fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}
