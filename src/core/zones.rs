//! Zone state tracking.
//!
//! Routes node readings into their zone's window and recomputes the zone
//! features once per tick. Zones that receive no new reading during a tick
//! have their effective motion and density decayed.

use crate::config::EngineConfig;
use crate::core::features::{compute_zone_features, ZoneFeatures, ZoneStatus};
use crate::core::windowing::{InsertOutcome, Sample, ZoneWindow};
use crate::ingest::types::{IngestError, NodeReading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Corridor zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneId {
    Entry,
    Center,
    Exit,
}

impl ZoneId {
    pub const ALL: [ZoneId; 3] = [ZoneId::Entry, ZoneId::Center, ZoneId::Exit];

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneId::Entry => "ENTRY",
            ZoneId::Center => "CENTER",
            ZoneId::Exit => "EXIT",
        }
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live state of one zone.
#[derive(Debug, Clone)]
pub struct ZoneState {
    pub id: ZoneId,
    pub nodes: Vec<String>,
    pub window: ZoneWindow,
    /// Features as of the last tick
    pub features: ZoneFeatures,
    /// Motion score after decay
    pub motion: f64,
    /// Density score after decay
    pub density: f64,
    pub online: bool,
    pub status: ZoneStatus,
    pub last_update: Option<DateTime<Utc>>,
    /// Calibrated empty-corridor distance; the configured maximum when unset
    pub empty_distance_cm: Option<f64>,
    fresh: bool,
}

impl ZoneState {
    fn new(id: ZoneId, nodes: Vec<String>, window_size: usize) -> Self {
        Self {
            id,
            nodes,
            window: ZoneWindow::new(window_size),
            features: ZoneFeatures::default(),
            motion: 0.0,
            density: 0.0,
            online: false,
            status: ZoneStatus::Offline,
            last_update: None,
            empty_distance_cm: None,
            fresh: false,
        }
    }

    /// Freshness in [0, 1] used for confidence.
    pub fn freshness(&self) -> f64 {
        let f = self.features.valid_fraction;
        if self.features.stale {
            f * 0.5
        } else {
            f
        }
    }
}

/// Owns every zone and the node to zone routing table.
#[derive(Debug, Clone)]
pub struct ZoneTracker {
    zones: BTreeMap<ZoneId, ZoneState>,
    routes: HashMap<String, ZoneId>,
}

impl ZoneTracker {
    pub fn new(config: &EngineConfig) -> Self {
        let mut zones = BTreeMap::new();
        let mut routes = HashMap::new();
        for zone in &config.zones {
            for node in &zone.nodes {
                routes.insert(node.clone(), zone.id);
            }
            zones.insert(
                zone.id,
                ZoneState::new(zone.id, zone.nodes.clone(), config.window.size),
            );
        }
        Self { zones, routes }
    }

    pub fn zone_of(&self, node_id: &str) -> Option<ZoneId> {
        self.routes.get(node_id).copied()
    }

    /// Record a sanitized reading in its zone's window.
    pub fn record(&mut self, reading: &NodeReading) -> Result<InsertOutcome, IngestError> {
        let zone_id = self
            .zone_of(&reading.node_id)
            .ok_or_else(|| IngestError::UnknownNode(reading.node_id.clone()))?;
        let zone = self
            .zones
            .get_mut(&zone_id)
            .ok_or_else(|| IngestError::UnknownNode(reading.node_id.clone()))?;

        let outcome = zone.window.insert(Sample {
            node_id: reading.node_id.clone(),
            timestamp: reading.timestamp,
            distance_cm: reading.distance_cm,
            motion_active: reading.motion_active,
        });
        if outcome == InsertOutcome::Inserted {
            zone.fresh = true;
            zone.last_update = Some(
                zone.last_update
                    .map_or(reading.timestamp, |t| t.max(reading.timestamp)),
            );
        }
        Ok(outcome)
    }

    /// Recompute features and decay idle zones.
    ///
    /// `is_online` reports whether a node is currently alive.
    pub fn tick<F>(&mut self, config: &EngineConfig, now: DateTime<Utc>, is_online: F)
    where
        F: Fn(&str) -> bool,
    {
        let stale_after = config.stale_after();
        let keep = 1.0 - config.composite.decay_rate;

        for zone in self.zones.values_mut() {
            zone.features = compute_zone_features(
                &zone.window,
                &config.window,
                zone.empty_distance_cm.unwrap_or(config.window.max_expected_distance_cm),
                &config.detection,
                stale_after,
                now,
            );

            if zone.fresh {
                zone.motion = zone.features.motion_score;
                zone.density = zone.features.density_score;
            } else {
                zone.motion *= keep;
                zone.density *= keep;
            }
            zone.fresh = false;

            zone.online = zone.nodes.iter().any(|n| is_online(n));
            zone.status = if zone.online {
                ZoneStatus::from_scores(zone.density, zone.motion)
            } else {
                ZoneStatus::Offline
            };
        }
    }

    /// Mean distance of every zone holding at least `min_samples` readings,
    /// taken as that zone's empty-corridor reference.
    pub fn capture_empty_distances(&self, min_samples: usize) -> BTreeMap<ZoneId, f64> {
        self.zones
            .values()
            .filter(|z| z.window.len() >= min_samples)
            .filter_map(|z| {
                z.features
                    .mean_distance
                    .filter(|d| d.is_finite() && *d > 0.0)
                    .map(|d| (z.id, d))
            })
            .collect()
    }

    /// Apply calibrated empty-corridor distances. Zones missing from the map
    /// keep their current reference.
    pub fn set_empty_distances(&mut self, distances: &BTreeMap<ZoneId, f64>) {
        for (id, distance) in distances {
            if let Some(zone) = self.zones.get_mut(id) {
                zone.empty_distance_cm = Some(*distance);
            }
        }
    }

    pub fn get(&self, id: ZoneId) -> Option<&ZoneState> {
        self.zones.get(&id)
    }

    /// Zones in ENTRY, CENTER, EXIT order.
    pub fn zones(&self) -> impl Iterator<Item = &ZoneState> {
        self.zones.values()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_unknown_node_rejected() {
        let mut tracker = ZoneTracker::new(&EngineConfig::default());
        let reading = NodeReading::new("NODE_X", Utc::now()).with_distance(50.0);
        assert_eq!(
            tracker.record(&reading),
            Err(IngestError::UnknownNode("NODE_X".to_string()))
        );
    }

    #[test]
    fn test_reading_routes_to_zone() {
        let mut tracker = ZoneTracker::new(&EngineConfig::default());
        let reading = NodeReading::new("NODE_C", Utc::now()).with_distance(50.0);
        assert_eq!(tracker.record(&reading), Ok(InsertOutcome::Inserted));
        assert_eq!(tracker.get(ZoneId::Center).map(|z| z.window.len()), Some(1));
        assert_eq!(tracker.get(ZoneId::Entry).map(|z| z.window.len()), Some(0));
    }

    #[test]
    fn test_idle_zone_decays() {
        let config = EngineConfig::default();
        let mut tracker = ZoneTracker::new(&config);
        let now = Utc::now();
        tracker
            .record(&NodeReading::new("NODE_A", now).with_distance(0.0).with_motion(true))
            .unwrap();
        tracker.tick(&config, now, |_| true);
        let first = tracker.get(ZoneId::Entry).unwrap().motion;
        assert_eq!(first, 100.0);

        tracker.tick(&config, now + Duration::milliseconds(500), |_| true);
        let second = tracker.get(ZoneId::Entry).unwrap().motion;
        assert!((second - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_offline_zone_status() {
        let config = EngineConfig::default();
        let mut tracker = ZoneTracker::new(&config);
        tracker.tick(&config, Utc::now(), |n| n != "NODE_B");
        assert_eq!(tracker.get(ZoneId::Exit).unwrap().status, ZoneStatus::Offline);
        assert_eq!(tracker.get(ZoneId::Entry).unwrap().status, ZoneStatus::Green);
    }

    #[test]
    fn test_empty_distance_rescales_density() {
        let config = EngineConfig::default();
        let mut tracker = ZoneTracker::new(&config);
        let start = Utc::now();
        for i in 0..config.window.min_samples as i64 {
            let at = start + Duration::milliseconds(i * 500);
            tracker
                .record(&NodeReading::new("NODE_C", at).with_distance(200.0))
                .unwrap();
        }
        tracker.tick(&config, start + Duration::seconds(5), |_| true);
        assert!((tracker.get(ZoneId::Center).unwrap().density - 50.0).abs() < 1e-9);

        let captured = tracker.capture_empty_distances(config.window.min_samples);
        assert_eq!(captured.get(&ZoneId::Center), Some(&200.0));
        assert!(!captured.contains_key(&ZoneId::Entry));

        tracker.set_empty_distances(&captured);
        tracker
            .record(&NodeReading::new("NODE_C", start + Duration::seconds(6)).with_distance(200.0))
            .unwrap();
        tracker.tick(&config, start + Duration::seconds(6), |_| true);
        let center = tracker.get(ZoneId::Center).unwrap();
        assert_eq!(center.empty_distance_cm, Some(200.0));
        assert_eq!(center.density, 0.0);
    }

    #[test]
    fn test_zone_id_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&ZoneId::Center).unwrap(), "\"CENTER\"");
    }
}
