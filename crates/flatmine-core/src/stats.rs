//! Per-run outcome counters and their CSV trail.
//!
//! Every tact appends exactly one row to a per-worker file, failures
//! included, so gaps in the trail mean the scheduler never fired.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::warn;

use crate::Result;

/// Scraping-worker outcome columns, in file order.
pub const REAPER_FIELDS: &[&str] = &[
    "inserted",
    "updated",
    "duplicated",
    "unlocated",
    "unresponded",
    "invalidated",
    "unparsed",
];

/// Cleanup-worker outcome columns.
pub const SWEEPER_FIELDS: &[&str] = &["deleted", "unresponded"];

/// Shared across pipeline stages behind an `Arc`; counters are atomic so
/// concurrent fan-out bumps them without coordination.
pub struct Tally {
    path: PathBuf,
    counters: Vec<(&'static str, AtomicU64)>,
}

impl Tally {
    pub fn new(stats_dir: &Path, worker: &str, fields: &[&'static str]) -> Self {
        Self {
            path: stats_dir.join(format!("{worker}.csv")),
            counters: fields.iter().map(|field| (*field, AtomicU64::new(0))).collect(),
        }
    }

    pub fn bump(&self, field: &str) {
        self.add(field, 1);
    }

    pub fn add(&self, field: &str, amount: u64) {
        match self.counters.iter().find(|(name, _)| *name == field) {
            Some((_, counter)) => {
                counter.fetch_add(amount, Ordering::Relaxed);
            }
            None => warn!(field, "bumped a counter this tally does not carry"),
        }
    }

    pub fn get(&self, field: &str) -> u64 {
        self.counters
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, counter)| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Appends one row, writing the header first when the file is new.
    pub fn write(&self) -> Result<()> {
        let fresh = !self.path.exists()
            || std::fs::metadata(&self.path).map(|meta| meta.len() == 0)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if fresh {
            let header: Vec<&str> = self
                .counters
                .iter()
                .map(|(name, _)| *name)
                .chain(std::iter::once("written"))
                .collect();
            writer.write_record(&header)?;
        }
        let row: Vec<String> = self
            .counters
            .iter()
            .map(|(_, counter)| counter.load(Ordering::Relaxed).to_string())
            .chain(std::iter::once(
                Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            ))
            .collect();
        writer.write_record(&row)?;
        writer.flush()?;
        Ok(())
    }
}
