//! Per-zone sliding window of recent node samples.
//!
//! The window holds at most `capacity` samples ordered by sensing time.
//! Late arrivals are slotted in at their timestamp; once the window is full
//! the oldest sample is evicted on insert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A single sample as stored in a zone window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    /// None when the echo failed or the value was out of range
    pub distance_cm: Option<f64>,
    pub motion_active: bool,
}

/// Result of offering a sample to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Same node and timestamp already present
    Duplicate,
    /// Older than everything retained by a full window
    TooOld,
}

/// Fixed-capacity window of samples sorted by timestamp.
#[derive(Debug, Clone)]
pub struct ZoneWindow {
    capacity: usize,
    samples: VecDeque<Sample>,
    last_good: Option<(f64, DateTime<Utc>)>,
}

impl ZoneWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            last_good: None,
        }
    }

    /// Insert a sample at its timestamp position.
    pub fn insert(&mut self, sample: Sample) -> InsertOutcome {
        if self
            .samples
            .iter()
            .any(|s| s.timestamp == sample.timestamp && s.node_id == sample.node_id)
        {
            return InsertOutcome::Duplicate;
        }

        if self.is_full() {
            if let Some(oldest) = self.samples.front() {
                if sample.timestamp < oldest.timestamp {
                    return InsertOutcome::TooOld;
                }
            }
        }

        if let Some(d) = sample.distance_cm {
            let newer = self
                .last_good
                .map_or(true, |(_, at)| sample.timestamp >= at);
            if newer {
                self.last_good = Some((d, sample.timestamp));
            }
        }

        let pos = self
            .samples
            .iter()
            .position(|s| s.timestamp > sample.timestamp)
            .unwrap_or(self.samples.len());
        self.samples.insert(pos, sample);

        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }

        InsertOutcome::Inserted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples from oldest to newest.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn newest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Distances of the samples that carried a valid echo.
    pub fn valid_distances(&self) -> Vec<f64> {
        self.samples.iter().filter_map(|s| s.distance_cm).collect()
    }

    /// Most recent valid distance and when it was sensed.
    ///
    /// Survives eviction so a run of failed echoes can fall back to it.
    pub fn last_good_distance(&self) -> Option<(f64, DateTime<Utc>)> {
        self.last_good
    }

    /// Fraction of samples with the PIR flag set.
    pub fn motion_fraction(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let active = self.samples.iter().filter(|s| s.motion_active).count();
        active as f64 / self.samples.len() as f64
    }
}
