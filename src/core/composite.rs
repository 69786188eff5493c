//! Composite Pressure Index (CPI).
//!
//! Fuses movement, audio, trend and density into one bounded score with
//! fixed weights, and keeps a short history used for the trend component
//! and for forecasting.

use crate::config::{CompositeConfig, CpiWeights};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// The four CPI inputs, each in 0-100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpiComponents {
    pub movement: f64,
    pub audio: f64,
    pub trend: f64,
    pub density: f64,
}

impl CpiComponents {
    /// Weighted sum, clamped to 0-100.
    pub fn weighted(&self, weights: &CpiWeights) -> f64 {
        let value = weights.movement * self.movement
            + weights.audio * self.audio
            + weights.trend * self.trend
            + weights.density * self.density;
        value.clamp(0.0, 100.0)
    }

    /// Component with the largest weighted contribution.
    pub fn dominant(&self, weights: &CpiWeights) -> Component {
        let ranked = [
            (Component::Movement, weights.movement * self.movement),
            (Component::Audio, weights.audio * self.audio),
            (Component::Trend, weights.trend * self.trend),
            (Component::Density, weights.density * self.density),
        ];
        let mut best = ranked[0];
        for candidate in &ranked[1..] {
            // strict comparison keeps the earlier component on ties
            if candidate.1 > best.1 {
                best = *candidate;
            }
        }
        best.0
    }
}

/// Identifies one CPI component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Movement,
    Audio,
    Trend,
    Density,
}

/// One computed CPI value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpiSnapshot {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// 0-100, reported alongside but never applied to the value
    pub confidence: f64,
    pub components: CpiComponents,
    pub dominant: Component,
}

/// Sensor-derived inputs for one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeInputs {
    pub movement: f64,
    pub audio: f64,
    pub density: f64,
    /// Share of zones with at least one online node
    pub online_fraction: f64,
    /// Mean freshness of the online zones
    pub freshness: f64,
}

/// Least-squares slope of evenly spaced values, in units per step.
pub fn least_squares_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

/// Computes the CPI and retains its history.
#[derive(Debug, Clone)]
pub struct CompositeScorer {
    config: CompositeConfig,
    history: VecDeque<CpiSnapshot>,
}

impl CompositeScorer {
    pub fn new(config: CompositeConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_capacity),
            config,
        }
    }

    pub fn weights(&self) -> &CpiWeights {
        &self.config.weights
    }

    /// CPI slope over the trend lookback, in points per tick.
    pub fn slope_per_tick(&self) -> Option<f64> {
        let skip = self.history.len().saturating_sub(self.config.trend_lookback);
        let recent: Vec<f64> = self.history.iter().skip(skip).map(|s| s.value).collect();
        least_squares_slope(&recent)
    }

    /// Trend component from the current history.
    pub fn trend_component(&self) -> f64 {
        self.slope_per_tick()
            .map(|s| (s * self.config.trend_scale).clamp(0.0, 100.0))
            .unwrap_or(0.0)
    }

    /// Compute this tick's CPI and append it to the history.
    pub fn score(&mut self, inputs: CompositeInputs, now: DateTime<Utc>) -> CpiSnapshot {
        let components = CpiComponents {
            movement: inputs.movement.clamp(0.0, 100.0),
            audio: inputs.audio.clamp(0.0, 100.0),
            trend: self.trend_component(),
            density: inputs.density.clamp(0.0, 100.0),
        };
        let weights = &self.config.weights;
        let online = inputs.online_fraction.clamp(0.0, 1.0);
        let fresh = inputs.freshness.clamp(0.0, 1.0);

        let snapshot = CpiSnapshot {
            timestamp: now,
            value: components.weighted(weights),
            confidence: (100.0 * online * (0.5 + 0.5 * fresh)).clamp(0.0, 100.0),
            components,
            dominant: components.dominant(weights),
        };

        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(snapshot.clone());
        snapshot
    }

    pub fn history(&self) -> impl Iterator<Item = &CpiSnapshot> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn latest(&self) -> Option<&CpiSnapshot> {
        self.history.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(movement: f64, audio: f64, density: f64) -> CompositeInputs {
        CompositeInputs {
            movement,
            audio,
            density,
            online_fraction: 1.0,
            freshness: 1.0,
        }
    }

    #[test]
    fn test_weighted_value_bounds() {
        let weights = CpiWeights::default();
        let zero = CpiComponents::default();
        assert_eq!(zero.weighted(&weights), 0.0);

        let full = CpiComponents {
            movement: 100.0,
            audio: 100.0,
            trend: 100.0,
            density: 100.0,
        };
        assert!((full.weighted(&weights) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_movement_dominates_ties() {
        let weights = CpiWeights::default();
        assert_eq!(CpiComponents::default().dominant(&weights), Component::Movement);

        let audio_heavy = CpiComponents {
            movement: 10.0,
            audio: 80.0,
            trend: 0.0,
            density: 0.0,
        };
        assert_eq!(audio_heavy.dominant(&weights), Component::Audio);
    }

    #[test]
    fn test_slope() {
        assert_eq!(least_squares_slope(&[5.0]), None);
        let slope = least_squares_slope(&[0.0, 2.0, 4.0, 6.0]).unwrap();
        assert!((slope - 2.0).abs() < 1e-9);
        assert_eq!(least_squares_slope(&[3.0, 3.0, 3.0]), Some(0.0));
    }

    #[test]
    fn test_rising_history_produces_trend() {
        let mut scorer = CompositeScorer::new(CompositeConfig::default());
        let now = Utc::now();
        for i in 0..5 {
            scorer.score(inputs(i as f64 * 10.0, 0.0, 0.0), now);
        }
        assert!(scorer.trend_component() > 0.0);
        assert_eq!(scorer.history_len(), 5);
    }

    #[test]
    fn test_falling_history_has_no_trend() {
        let mut scorer = CompositeScorer::new(CompositeConfig::default());
        let now = Utc::now();
        for i in (0..5).rev() {
            scorer.score(inputs(i as f64 * 10.0, 0.0, 0.0), now);
        }
        assert_eq!(scorer.trend_component(), 0.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let config = CompositeConfig {
            history_capacity: 12,
            ..CompositeConfig::default()
        };
        let mut scorer = CompositeScorer::new(config);
        for _ in 0..30 {
            scorer.score(inputs(50.0, 50.0, 50.0), Utc::now());
        }
        assert_eq!(scorer.history_len(), 12);
    }

    #[test]
    fn test_confidence_follows_online_fraction() {
        let mut scorer = CompositeScorer::new(CompositeConfig::default());
        let mut degraded = inputs(50.0, 0.0, 0.0);
        degraded.online_fraction = 2.0 / 3.0;
        let cpi = scorer.score(degraded, Utc::now());
        assert!((cpi.confidence - 66.666_666).abs() < 1e-3);
        // the value itself is untouched by confidence
        assert!((cpi.value - 0.56 * 50.0).abs() < 1e-9);
    }
}
