//! Ingest and engine counters.
//!
//! Counters are shared between the ingress tasks, the engine thread and the
//! HTTP API, so every update is a relaxed atomic increment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Every counted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    ReadingsAccepted,
    Duplicates,
    TooOld,
    Malformed,
    UnknownNode,
    QueueOverflow,
    Heartbeats,
    Ticks,
    SnapshotsPublished,
    CalibrationsOk,
    CalibrationsFailed,
}

impl Counter {
    const COUNT: usize = 11;

    fn index(self) -> usize {
        self as usize
    }
}

/// Live counters for the running engine.
#[derive(Debug)]
pub struct IngestStats {
    counters: [AtomicU64; Counter::COUNT],
    started_at: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            counters: Default::default(),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Counters persisted at `path`, resuming from an earlier run if present.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::debug!("Could not load previous statistics: {e}");
        }

        stats
    }

    pub fn record(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            readings_accepted: self.get(Counter::ReadingsAccepted),
            duplicates: self.get(Counter::Duplicates),
            too_old: self.get(Counter::TooOld),
            malformed: self.get(Counter::Malformed),
            unknown_node: self.get(Counter::UnknownNode),
            queue_overflow: self.get(Counter::QueueOverflow),
            heartbeats: self.get(Counter::Heartbeats),
            ticks: self.get(Counter::Ticks),
            snapshots_published: self.get(Counter::SnapshotsPublished),
            calibrations_ok: self.get(Counter::CalibrationsOk),
            calibrations_failed: self.get(Counter::CalibrationsFailed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    pub fn summary(&self) -> String {
        let s = self.stats();
        format!(
            "Engine Statistics:\n\
             - Readings accepted: {}\n\
             - Duplicates dropped: {}\n\
             - Late readings dropped: {}\n\
             - Malformed messages: {}\n\
             - Unknown nodes: {}\n\
             - Queue overflows: {}\n\
             - Heartbeats: {}\n\
             - Ticks: {}\n\
             - Snapshots published: {}\n\
             - Calibrations: {} ok, {} failed\n\
             - Uptime: {} seconds",
            s.readings_accepted,
            s.duplicates,
            s.too_old,
            s.malformed,
            s.unknown_node,
            s.queue_overflow,
            s.heartbeats,
            s.ticks,
            s.snapshots_published,
            s.calibrations_ok,
            s.calibrations_failed,
            s.uptime_secs
        )
    }

    /// Write the counters to the persistence path, if any.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let persisted = PersistedStats {
            counters: self.stats(),
            last_updated: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedStats =
            serde_json::from_str(&content).map_err(std::io::Error::other)?;
        let c = persisted.counters;
        let restored = [
            (Counter::ReadingsAccepted, c.readings_accepted),
            (Counter::Duplicates, c.duplicates),
            (Counter::TooOld, c.too_old),
            (Counter::Malformed, c.malformed),
            (Counter::UnknownNode, c.unknown_node),
            (Counter::QueueOverflow, c.queue_overflow),
            (Counter::Heartbeats, c.heartbeats),
            (Counter::Ticks, c.ticks),
            (Counter::SnapshotsPublished, c.snapshots_published),
            (Counter::CalibrationsOk, c.calibrations_ok),
            (Counter::CalibrationsFailed, c.calibrations_failed),
        ];
        for (counter, value) in restored {
            self.counters[counter.index()].store(value, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub readings_accepted: u64,
    pub duplicates: u64,
    pub too_old: u64,
    pub malformed: u64,
    pub unknown_node: u64,
    pub queue_overflow: u64,
    pub heartbeats: u64,
    pub ticks: u64,
    pub snapshots_published: u64,
    pub calibrations_ok: u64,
    pub calibrations_failed: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    counters: StatsSnapshot,
    last_updated: DateTime<Utc>,
}

/// Counters shared across threads and tasks.
pub type SharedStats = Arc<IngestStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(IngestStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(IngestStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = IngestStats::new();
        stats.record(Counter::ReadingsAccepted);
        stats.record(Counter::ReadingsAccepted);
        stats.record(Counter::Malformed);

        let s = stats.stats();
        assert_eq!(s.readings_accepted, 2);
        assert_eq!(s.malformed, 1);
        assert_eq!(s.duplicates, 0);
    }

    #[test]
    fn test_reset() {
        let stats = IngestStats::new();
        stats.record(Counter::Ticks);
        stats.reset();
        assert_eq!(stats.get(Counter::Ticks), 0);
    }

    #[test]
    fn test_summary_format() {
        let stats = IngestStats::new();
        let summary = stats.summary();
        assert!(summary.contains("Readings accepted"));
        assert!(summary.contains("Queue overflows"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = std::env::temp_dir().join(format!("stampede-stats-{}", uuid::Uuid::new_v4()));
        let path = dir.join("stats.json");

        let stats = IngestStats::with_persistence(path.clone());
        stats.record(Counter::Heartbeats);
        stats.record(Counter::CalibrationsFailed);
        stats.save().unwrap();

        let restored = IngestStats::with_persistence(path);
        assert_eq!(restored.get(Counter::Heartbeats), 1);
        assert_eq!(restored.get(Counter::CalibrationsFailed), 1);

        let _ = std::fs::remove_dir_all(dir);
    }
}
