//! Alert level state machine and short-term forecast.
//!
//! De-escalation is immediate. Escalation needs the higher target to hold
//! for `dwell_ticks` consecutive ticks, and CRITICAL additionally needs
//! either an audio signal or real movement.

use crate::config::{AlertConfig, ScoreBands};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Forecast horizons in seconds.
pub const FORECAST_HORIZONS_SECS: [u64; 3] = [30, 60, 120];

/// Publicly visible alert level, ordered by severity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    #[default]
    Safe,
    Low,
    Moderate,
    High,
    Critical,
}

impl AlertLevel {
    /// Band containing `score`.
    pub fn from_score(score: f64, bands: &ScoreBands) -> Self {
        if score >= bands.critical {
            AlertLevel::Critical
        } else if score >= bands.high {
            AlertLevel::High
        } else if score >= bands.moderate {
            AlertLevel::Moderate
        } else if score >= bands.low {
            AlertLevel::Low
        } else {
            AlertLevel::Safe
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Safe => "SAFE",
            AlertLevel::Low => "LOW",
            AlertLevel::Moderate => "MODERATE",
            AlertLevel::High => "HIGH",
            AlertLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change of the reported alert level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: AlertLevel,
    pub to: AlertLevel,
    pub score: f64,
    pub at: DateTime<Utc>,
}

impl Transition {
    pub fn is_escalation(&self) -> bool {
        self.to > self.from
    }
}

/// Component values the CRITICAL gate looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct CriticalEvidence {
    pub audio: f64,
    pub movement: f64,
}

#[derive(Debug, Clone, Copy)]
struct PendingRaise {
    ticks: u32,
    /// Lowest target seen during the run
    floor: AlertLevel,
}

/// Hysteresis state machine over CPI values.
#[derive(Debug, Clone)]
pub struct AlertMachine {
    config: AlertConfig,
    level: AlertLevel,
    entered_at: Option<DateTime<Utc>>,
    pending: Option<PendingRaise>,
}

impl AlertMachine {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            level: AlertLevel::Safe,
            entered_at: None,
            pending: None,
        }
    }

    /// Start from a given level, e.g. when restoring state.
    pub fn with_level(config: AlertConfig, level: AlertLevel) -> Self {
        Self {
            level,
            ..Self::new(config)
        }
    }

    pub fn level(&self) -> AlertLevel {
        self.level
    }

    pub fn entered_at(&self) -> Option<DateTime<Utc>> {
        self.entered_at
    }

    pub fn bands(&self) -> &ScoreBands {
        &self.config.bands
    }

    /// Target level for a score, with CRITICAL gated on multi-factor evidence.
    pub fn target(&self, score: f64, evidence: CriticalEvidence) -> AlertLevel {
        let target = AlertLevel::from_score(score, &self.config.bands);
        let corroborated = evidence.audio > 0.0
            || evidence.movement >= self.config.critical_movement_floor;
        if target == AlertLevel::Critical && !corroborated {
            AlertLevel::High
        } else {
            target
        }
    }

    /// Feed one tick's score. Returns the transition if the level changed.
    pub fn update(
        &mut self,
        score: f64,
        evidence: CriticalEvidence,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        let target = self.target(score, evidence);

        let next = if target < self.level {
            self.pending = None;
            target
        } else if target == self.level {
            self.pending = None;
            return None;
        } else {
            let run = match self.pending {
                Some(p) => PendingRaise {
                    ticks: p.ticks + 1,
                    floor: p.floor.min(target),
                },
                None => PendingRaise {
                    ticks: 1,
                    floor: target,
                },
            };
            if run.ticks < self.config.dwell_ticks {
                self.pending = Some(run);
                return None;
            }
            self.pending = None;
            run.floor
        };

        let from = self.level;
        self.level = next;
        self.entered_at = Some(now);
        Some(Transition {
            from,
            to: next,
            score,
            at: now,
        })
    }
}

/// Predicted levels at fixed horizons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub now: AlertLevel,
    #[serde(rename = "30s")]
    pub in_30s: AlertLevel,
    #[serde(rename = "60s")]
    pub in_60s: AlertLevel,
    #[serde(rename = "120s")]
    pub in_120s: AlertLevel,
    pub insufficient_data: bool,
}

impl Forecast {
    pub fn insufficient() -> Self {
        Self {
            now: AlertLevel::Safe,
            in_30s: AlertLevel::Safe,
            in_60s: AlertLevel::Safe,
            in_120s: AlertLevel::Safe,
            insufficient_data: true,
        }
    }

    pub fn slots(&self) -> [AlertLevel; 4] {
        [self.now, self.in_30s, self.in_60s, self.in_120s]
    }
}

/// Extrapolate the score linearly and band each horizon.
///
/// `slope_per_sec` is None when fewer than two history samples exist.
pub fn forecast(score: f64, slope_per_sec: Option<f64>, bands: &ScoreBands) -> Forecast {
    let Some(slope) = slope_per_sec else {
        return Forecast::insufficient();
    };
    let at = |secs: u64| {
        let projected = (score + slope * secs as f64).clamp(0.0, 100.0);
        AlertLevel::from_score(projected, bands)
    };
    let [h30, h60, h120] = FORECAST_HORIZONS_SECS;
    Forecast {
        now: AlertLevel::from_score(score.clamp(0.0, 100.0), bands),
        in_30s: at(h30),
        in_60s: at(h60),
        in_120s: at(h120),
        insufficient_data: false,
    }
}

/// Seconds until the score reaches the CRITICAL bound at the current slope.
pub fn time_to_critical(score: f64, slope_per_sec: Option<f64>, bands: &ScoreBands) -> Option<f64> {
    if score >= bands.critical {
        return Some(0.0);
    }
    match slope_per_sec {
        Some(s) if s > 0.0 => Some((bands.critical - score) / s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud() -> CriticalEvidence {
        CriticalEvidence {
            audio: 50.0,
            movement: 50.0,
        }
    }

    #[test]
    fn test_bands() {
        let bands = ScoreBands::default();
        assert_eq!(AlertLevel::from_score(0.0, &bands), AlertLevel::Safe);
        assert_eq!(AlertLevel::from_score(25.0, &bands), AlertLevel::Low);
        assert_eq!(AlertLevel::from_score(44.9, &bands), AlertLevel::Low);
        assert_eq!(AlertLevel::from_score(45.0, &bands), AlertLevel::Moderate);
        assert_eq!(AlertLevel::from_score(65.0, &bands), AlertLevel::High);
        assert_eq!(AlertLevel::from_score(100.0, &bands), AlertLevel::Critical);
    }

    #[test]
    fn test_raise_needs_dwell() {
        let mut machine = AlertMachine::new(AlertConfig::default());
        let now = Utc::now();
        assert!(machine.update(70.0, loud(), now).is_none());
        assert_eq!(machine.level(), AlertLevel::Safe);
        let t = machine.update(70.0, loud(), now).unwrap();
        assert_eq!(t.from, AlertLevel::Safe);
        assert_eq!(t.to, AlertLevel::High);
        assert!(t.is_escalation());
    }

    #[test]
    fn test_raise_goes_to_lowest_sustained_target() {
        let mut machine = AlertMachine::new(AlertConfig::default());
        let now = Utc::now();
        machine.update(90.0, loud(), now);
        let t = machine.update(50.0, loud(), now).unwrap();
        assert_eq!(t.to, AlertLevel::Moderate);
    }

    #[test]
    fn test_drop_is_immediate() {
        let mut machine = AlertMachine::with_level(AlertConfig::default(), AlertLevel::High);
        let t = machine.update(10.0, loud(), Utc::now()).unwrap();
        assert_eq!(t.to, AlertLevel::Safe);
        assert!(!t.is_escalation());
    }

    #[test]
    fn test_oscillation_does_not_flip() {
        let mut machine =
            AlertMachine::with_level(AlertConfig::default(), AlertLevel::Moderate);
        let now = Utc::now();
        for i in 0..20 {
            let score = if i % 2 == 0 { 70.0 } else { 60.0 };
            assert!(machine.update(score, loud(), now).is_none());
            assert_eq!(machine.level(), AlertLevel::Moderate);
        }
    }

    #[test]
    fn test_critical_requires_corroboration() {
        let mut machine = AlertMachine::new(AlertConfig::default());
        let now = Utc::now();
        let density_only = CriticalEvidence {
            audio: 0.0,
            movement: 10.0,
        };
        for _ in 0..5 {
            machine.update(95.0, density_only, now);
        }
        assert_eq!(machine.level(), AlertLevel::High);

        machine.update(95.0, loud(), now);
        machine.update(95.0, loud(), now);
        assert_eq!(machine.level(), AlertLevel::Critical);
    }

    #[test]
    fn test_flat_forecast_matches_current_level() {
        let bands = ScoreBands::default();
        let f = forecast(50.0, Some(0.0), &bands);
        assert!(!f.insufficient_data);
        assert!(f.slots().iter().all(|l| *l == AlertLevel::Moderate));
    }

    #[test]
    fn test_rising_forecast() {
        let bands = ScoreBands::default();
        let f = forecast(50.0, Some(0.5), &bands);
        assert_eq!(f.now, AlertLevel::Moderate);
        assert_eq!(f.in_30s, AlertLevel::High);
        assert_eq!(f.in_60s, AlertLevel::High);
        assert_eq!(f.in_120s, AlertLevel::Critical);
    }

    #[test]
    fn test_forecast_without_history() {
        let f = forecast(90.0, None, &ScoreBands::default());
        assert!(f.insufficient_data);
        assert!(f.slots().iter().all(|l| *l == AlertLevel::Safe));
    }

    #[test]
    fn test_forecast_serializes_horizon_keys() {
        let f = forecast(10.0, Some(0.0), &ScoreBands::default());
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["now"], "SAFE");
        assert_eq!(json["30s"], "SAFE");
        assert_eq!(json["120s"], "SAFE");
    }

    #[test]
    fn test_time_to_critical() {
        let bands = ScoreBands::default();
        assert_eq!(time_to_critical(90.0, None, &bands), Some(0.0));
        assert_eq!(time_to_critical(65.0, Some(2.0), &bands), Some(10.0));
        assert_eq!(time_to_critical(65.0, Some(0.0), &bands), None);
        assert_eq!(time_to_critical(65.0, Some(-1.0), &bands), None);
    }
}
