//! Dashboard snapshot published once per tick.
//!
//! A snapshot is an immutable copy of everything an operator display needs.
//! Readers receive it behind an `Arc` and never see a partial update.

use crate::core::alert::{AlertLevel, Forecast};
use crate::core::audio::{AudioState, Baseline};
use crate::core::composite::{Component, CpiSnapshot};
use crate::core::features::{DetectionType, ZoneStatus};
use crate::core::health::NodeHealth;
use crate::core::recommend::Action;
use crate::core::zones::{ZoneId, ZoneState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Snapshot schema version.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Name of this producer.
pub const PRODUCER_NAME: &str = "stampede-shield";

/// Producer metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    /// Unique per engine instance
    pub instance_id: String,
}

/// Current alert state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertView {
    pub level: AlertLevel,
    pub score: f64,
    pub confidence: f64,
    /// When the current level was entered; None before the first change
    pub entered_at: Option<DateTime<Utc>>,
}

/// CPI breakdown as shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub density: f64,
    pub motion: f64,
    pub audio: f64,
    pub trend: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpiView {
    pub value: f64,
    pub confidence: f64,
    pub breakdown: Breakdown,
    pub dominant: Component,
}

/// Per-zone view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneView {
    pub status: ZoneStatus,
    /// Distance in cm, null when no valid echo has been received
    pub distance: Option<f64>,
    pub density: f64,
    pub motion: f64,
    pub detection_type: DetectionType,
    pub online: bool,
    /// The distance is a reused last-good value older than the staleness limit
    pub stale: bool,
}

impl From<&ZoneState> for ZoneView {
    fn from(zone: &ZoneState) -> Self {
        Self {
            status: zone.status,
            distance: zone.features.distance_cm,
            density: round1(zone.density),
            motion: round1(zone.motion),
            detection_type: zone.features.detection_type,
            online: zone.online,
            stale: zone.features.stale,
        }
    }
}

/// Per-node liveness view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub online: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub uptime_secs: Option<u64>,
}

impl From<&NodeHealth> for NodeView {
    fn from(node: &NodeHealth) -> Self {
        Self {
            online: node.online,
            last_heartbeat: node.last_heartbeat,
            uptime_secs: node.uptime_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioView {
    /// Last raw RMS, null until the microphone reports
    pub level: Option<f64>,
    pub score: f64,
    pub state: AudioState,
    pub baseline: Baseline,
}

/// Complete dashboard snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: String,
    pub producer: Producer,
    /// Increments by one per tick
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub alert: AlertView,
    pub cpi: CpiView,
    /// Seconds until CRITICAL at the current slope, null when not rising
    pub time_to_critical: Option<f64>,
    pub nodes: BTreeMap<String, NodeView>,
    pub zones: BTreeMap<ZoneId, ZoneView>,
    pub timeline: Forecast,
    pub audio: AudioView,
    pub actions: Vec<Action>,
    pub factors: Vec<String>,
}

impl EngineSnapshot {
    pub fn zone(&self, id: ZoneId) -> Option<&ZoneView> {
        self.zones.get(&id)
    }

    pub fn online_nodes(&self) -> usize {
        self.nodes.values().filter(|n| n.online).count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Everything the builder needs from one tick.
pub struct SnapshotParts<'a> {
    pub timestamp: DateTime<Utc>,
    pub level: AlertLevel,
    pub entered_at: Option<DateTime<Utc>>,
    pub cpi: &'a CpiSnapshot,
    pub time_to_critical: Option<f64>,
    pub nodes: Vec<&'a NodeHealth>,
    pub zones: Vec<&'a ZoneState>,
    pub timeline: Forecast,
    pub audio: AudioView,
    pub actions: Vec<Action>,
    pub factors: Vec<String>,
}

/// Stamps snapshots with the producer identity and a sequence number.
pub struct SnapshotBuilder {
    instance_id: Uuid,
    sequence: u64,
}

impl SnapshotBuilder {
    /// Create a builder with a unique instance id.
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            sequence: 0,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn build(&mut self, parts: SnapshotParts<'_>) -> EngineSnapshot {
        self.sequence += 1;
        let cpi = parts.cpi;

        EngineSnapshot {
            version: SNAPSHOT_VERSION.to_string(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: crate::VERSION.to_string(),
                instance_id: self.instance_id.to_string(),
            },
            sequence: self.sequence,
            timestamp: parts.timestamp,
            alert: AlertView {
                level: parts.level,
                score: round1(cpi.value),
                confidence: round1(cpi.confidence),
                entered_at: parts.entered_at,
            },
            cpi: CpiView {
                value: round1(cpi.value),
                confidence: round1(cpi.confidence),
                breakdown: Breakdown {
                    density: round1(cpi.components.density),
                    motion: round1(cpi.components.movement),
                    audio: round1(cpi.components.audio),
                    trend: round1(cpi.components.trend),
                },
                dominant: cpi.dominant,
            },
            time_to_critical: parts.time_to_critical.map(round1),
            nodes: parts
                .nodes
                .into_iter()
                .map(|n| (n.node_id.clone(), NodeView::from(n)))
                .collect(),
            zones: parts
                .zones
                .into_iter()
                .map(|z| (z.id, ZoneView::from(z)))
                .collect(),
            timeline: parts.timeline,
            audio: parts.audio,
            actions: parts.actions,
            factors: parts.factors,
        }
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Round to one decimal for display.
fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::composite::CpiComponents;

    fn cpi() -> CpiSnapshot {
        CpiSnapshot {
            timestamp: Utc::now(),
            value: 42.04,
            confidence: 99.96,
            components: CpiComponents {
                movement: 50.0,
                audio: 30.0,
                trend: 0.0,
                density: 12.34,
            },
            dominant: Component::Movement,
        }
    }

    fn parts(cpi: &CpiSnapshot) -> SnapshotParts<'_> {
        SnapshotParts {
            timestamp: Utc::now(),
            level: AlertLevel::Low,
            entered_at: None,
            cpi,
            time_to_critical: None,
            nodes: Vec::new(),
            zones: Vec::new(),
            timeline: Forecast::insufficient(),
            audio: AudioView {
                level: None,
                score: 0.0,
                state: AudioState::Quiet,
                baseline: Baseline {
                    audio_baseline: 0.0,
                    calibrated_at: None,
                    sample_count: 0,
                    zone_distances: BTreeMap::new(),
                },
            },
            actions: Vec::new(),
            factors: vec!["No major risk factors".to_string()],
        }
    }

    #[test]
    fn test_builder_sequence_and_identity() {
        let mut builder = SnapshotBuilder::new();
        let cpi = cpi();
        let first = builder.build(parts(&cpi));
        let second = builder.build(parts(&cpi));
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(first.producer.instance_id, second.producer.instance_id);
        assert_eq!(first.producer.name, PRODUCER_NAME);
    }

    #[test]
    fn test_values_rounded() {
        let mut builder = SnapshotBuilder::new();
        let cpi = cpi();
        let snapshot = builder.build(parts(&cpi));
        assert_eq!(snapshot.cpi.value, 42.0);
        assert_eq!(snapshot.cpi.confidence, 100.0);
        assert_eq!(snapshot.cpi.breakdown.density, 12.3);
    }

    #[test]
    fn test_serialized_shape() {
        let mut builder = SnapshotBuilder::new();
        let cpi = cpi();
        let snapshot = builder.build(parts(&cpi));
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["alert"]["level"], "LOW");
        assert!(json["cpi"]["breakdown"]["motion"].is_number());
        assert!(json["time_to_critical"].is_null());
        assert_eq!(json["timeline"]["insufficient_data"], true);
        assert_eq!(json["audio"]["state"], "QUIET");
        assert_eq!(json["factors"][0], "No major risk factors");
    }
}
