//! Feature extraction from a zone window.
//!
//! Turns the raw distance and PIR samples of a zone into bounded density
//! and motion scores, a detection classification and a colour tier.

use crate::config::{DetectionThresholds, WindowConfig};
use crate::core::windowing::ZoneWindow;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// What a zone's sensor most likely sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionType {
    Unknown,
    Clear,
    Wall,
    StaticObject,
    SinglePerson,
    Crowd,
}

impl std::fmt::Display for DetectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DetectionType::Unknown => "UNKNOWN",
            DetectionType::Clear => "CLEAR",
            DetectionType::Wall => "WALL",
            DetectionType::StaticObject => "STATIC_OBJECT",
            DetectionType::SinglePerson => "SINGLE_PERSON",
            DetectionType::Crowd => "CROWD",
        };
        f.write_str(s)
    }
}

/// Colour tier of a zone, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneStatus {
    Offline,
    Green,
    Yellow,
    Orange,
    Red,
    Black,
}

impl ZoneStatus {
    /// Tier from the combined pressure of density and motion.
    pub fn from_scores(density: f64, motion: f64) -> Self {
        let pressure = 0.5 * density + 0.5 * motion;
        if pressure >= 85.0 {
            ZoneStatus::Black
        } else if pressure >= 70.0 {
            ZoneStatus::Red
        } else if pressure >= 50.0 {
            ZoneStatus::Orange
        } else if pressure >= 30.0 {
            ZoneStatus::Yellow
        } else {
            ZoneStatus::Green
        }
    }

    /// ORANGE or worse.
    pub fn is_elevated(self) -> bool {
        self >= ZoneStatus::Orange
    }
}

impl std::fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ZoneStatus::Offline => "OFFLINE",
            ZoneStatus::Green => "GREEN",
            ZoneStatus::Yellow => "YELLOW",
            ZoneStatus::Orange => "ORANGE",
            ZoneStatus::Red => "RED",
            ZoneStatus::Black => "BLACK",
        };
        f.write_str(s)
    }
}

/// Features derived from one zone window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneFeatures {
    /// Newest distance, or the last good one when the newest echo failed
    pub distance_cm: Option<f64>,
    /// The reported distance is older than the staleness limit
    pub stale: bool,
    pub density_score: f64,
    pub motion_score: f64,
    pub variance_distance: f64,
    pub mean_distance: Option<f64>,
    pub motion_fraction: f64,
    /// Share of window samples that carried a valid distance
    pub valid_fraction: f64,
    pub sample_count: usize,
    pub detection_type: DetectionType,
}

impl Default for ZoneFeatures {
    fn default() -> Self {
        Self {
            distance_cm: None,
            stale: false,
            density_score: 0.0,
            motion_score: 0.0,
            variance_distance: 0.0,
            mean_distance: None,
            motion_fraction: 0.0,
            valid_fraction: 0.0,
            sample_count: 0,
            detection_type: DetectionType::Unknown,
        }
    }
}

/// Density score: 0 for an empty corridor, 100 for an obstruction at the sensor.
pub fn density_from_distance(distance_cm: f64, max_expected_cm: f64) -> f64 {
    if max_expected_cm <= 0.0 {
        return 0.0;
    }
    ((max_expected_cm - distance_cm) / max_expected_cm * 100.0).clamp(0.0, 100.0)
}

/// Recency-weighted share of samples with motion, scaled to 0-100.
///
/// Sample i (0 = oldest) carries weight i + 1.
pub fn motion_score(window: &ZoneWindow) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for (i, sample) in window.samples().enumerate() {
        let weight = (i + 1) as f64;
        total += weight;
        if sample.motion_active {
            weighted += weight;
        }
    }
    if total == 0.0 {
        0.0
    } else {
        (weighted / total * 100.0).clamp(0.0, 100.0)
    }
}

/// Population variance of the distances; 0 with fewer than two values.
pub fn distance_variance(distances: &[f64]) -> f64 {
    if distances.len() < 2 {
        return 0.0;
    }
    let variance = distances.iter().population_variance();
    if variance.is_finite() {
        variance
    } else {
        0.0
    }
}

/// Classify what a zone sees. Rules are checked in order.
pub fn classify(
    sample_count: usize,
    min_samples: usize,
    mean_distance: Option<f64>,
    variance: f64,
    motion_fraction: f64,
    thresholds: &DetectionThresholds,
) -> DetectionType {
    if sample_count < min_samples {
        return DetectionType::Unknown;
    }

    let stable = variance <= thresholds.stability_variance;
    let idle = motion_fraction <= thresholds.idle_motion_fraction;

    if !stable || motion_fraction > thresholds.crowd_motion_fraction {
        return DetectionType::Crowd;
    }

    let Some(mean) = mean_distance else {
        // no valid echo in the whole window
        return if idle {
            DetectionType::Unknown
        } else {
            DetectionType::SinglePerson
        };
    };

    if mean > thresholds.far_cm && idle {
        return DetectionType::Clear;
    }
    if idle && mean < thresholds.wall_cm {
        return DetectionType::Wall;
    }
    if idle && mean < thresholds.near_cm {
        return DetectionType::StaticObject;
    }
    if (thresholds.near_cm..=thresholds.far_cm).contains(&mean)
        && (thresholds.single_motion_min..=thresholds.single_motion_max).contains(&motion_fraction)
    {
        return DetectionType::SinglePerson;
    }

    if idle {
        DetectionType::StaticObject
    } else {
        DetectionType::SinglePerson
    }
}

/// Compute all features of a zone window at `now`.
///
/// `empty_distance_cm` is the distance the zone reports when empty.
pub fn compute_zone_features(
    window: &ZoneWindow,
    window_config: &WindowConfig,
    empty_distance_cm: f64,
    thresholds: &DetectionThresholds,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> ZoneFeatures {
    if window.is_empty() {
        return ZoneFeatures::default();
    }

    let distances = window.valid_distances();
    let sample_count = window.len();
    let valid_fraction = distances.len() as f64 / sample_count as f64;

    let mean_distance = if distances.is_empty() {
        None
    } else {
        Some(distances.iter().mean())
    };
    let variance_distance = distance_variance(&distances);
    let motion_fraction = window.motion_fraction();

    let newest_distance = window.newest().and_then(|s| s.distance_cm);
    let (distance_cm, stale) = match (newest_distance, window.last_good_distance()) {
        (Some(d), _) => (Some(d), false),
        (None, Some((d, at))) => (Some(d), now - at > stale_after),
        (None, None) => (None, false),
    };

    let density_score = distance_cm
        .map(|d| density_from_distance(d, empty_distance_cm))
        .unwrap_or(0.0);

    ZoneFeatures {
        distance_cm,
        stale,
        density_score,
        motion_score: motion_score(window),
        variance_distance,
        mean_distance,
        motion_fraction,
        valid_fraction,
        sample_count,
        detection_type: classify(
            sample_count,
            window_config.min_samples,
            mean_distance,
            variance_distance,
            motion_fraction,
            thresholds,
        ),
    }
}
