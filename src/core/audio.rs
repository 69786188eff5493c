//! Audio scoring against a calibrated ambient baseline.

use crate::config::AudioConfig;
use crate::core::zones::ZoneId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

/// A decaying score below this is reported as silence.
const SILENCE_FLOOR: f64 = 0.01;

/// Qualitative audio state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioState {
    Quiet,
    Normal,
    Loud,
    Scream,
}

impl AudioState {
    pub fn from_score(score: f64, config: &AudioConfig) -> Self {
        if score >= config.scream_from {
            AudioState::Scream
        } else if score >= config.loud_from {
            AudioState::Loud
        } else if score >= config.quiet_below {
            AudioState::Normal
        } else {
            AudioState::Quiet
        }
    }
}

impl std::fmt::Display for AudioState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AudioState::Quiet => "QUIET",
            AudioState::Normal => "NORMAL",
            AudioState::Loud => "LOUD",
            AudioState::Scream => "SCREAM",
        };
        f.write_str(s)
    }
}

/// Ambient audio reference subtracted before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub audio_baseline: f64,
    /// None until the first calibration completes
    pub calibrated_at: Option<DateTime<Utc>>,
    /// Number of samples averaged
    pub sample_count: usize,
    /// Empty-corridor distance per zone captured by the same calibration (cm)
    #[serde(default)]
    pub zone_distances: BTreeMap<ZoneId, f64>,
}

impl Baseline {
    /// Read a baseline saved by [`Baseline::save`]. A missing file is `None`.
    pub fn load(path: &Path) -> Result<Option<Self>, std::io::Error> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let baseline = serde_json::from_str(&content).map_err(std::io::Error::other)?;
        Ok(Some(baseline))
    }

    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Why a calibration attempt was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// No audio sample inside the calibration window
    NoSamples,
    /// Average is at or above the scoring ceiling
    AboveCeiling { average: f64, ceiling: f64 },
    /// No microphone node is configured
    NoMicrophone,
    /// A restored baseline is not a usable ambient level
    Invalid(f64),
}

impl std::fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationError::NoSamples => write!(f, "no audio samples collected"),
            CalibrationError::AboveCeiling { average, ceiling } => write!(
                f,
                "ambient average {average:.1} is not below the ceiling {ceiling:.1}"
            ),
            CalibrationError::NoMicrophone => write!(f, "no microphone node configured"),
            CalibrationError::Invalid(v) => write!(f, "baseline {v} is not a usable level"),
        }
    }
}

impl std::error::Error for CalibrationError {}

/// Audio score for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioReading {
    /// Last raw RMS received, if any
    pub level: Option<f64>,
    pub score: f64,
    pub state: AudioState,
}

/// Normalize a raw RMS value against the baseline into 0-100.
pub fn score_raw(raw: f64, baseline: f64, max_expected: f64) -> f64 {
    let span = max_expected - baseline;
    if span <= 0.0 || !raw.is_finite() {
        return 0.0;
    }
    ((raw - baseline) / span * 100.0).clamp(0.0, 100.0)
}

/// Scores microphone readings and manages the baseline.
#[derive(Debug, Clone)]
pub struct AudioScorer {
    config: AudioConfig,
    baseline: Baseline,
    samples: VecDeque<(DateTime<Utc>, f64)>,
    last_raw: Option<f64>,
    last_at: Option<DateTime<Utc>>,
    fresh: bool,
    score: f64,
    startup_done: bool,
}

impl AudioScorer {
    pub fn new(config: AudioConfig) -> Self {
        let baseline = Baseline {
            audio_baseline: config.default_baseline,
            calibrated_at: None,
            sample_count: 0,
            zone_distances: BTreeMap::new(),
        };
        let startup_done = config.startup_samples == 0;
        Self {
            samples: VecDeque::with_capacity(config.calibration_buffer),
            config,
            baseline,
            last_raw: None,
            last_at: None,
            fresh: false,
            score: 0.0,
            startup_done,
        }
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    pub fn has_microphone(&self) -> bool {
        self.config.microphone_node.is_some()
    }

    pub fn is_microphone(&self, node_id: &str) -> bool {
        self.config.microphone_node.as_deref() == Some(node_id)
    }

    /// Record a raw microphone sample.
    ///
    /// A sample older than the current level still feeds calibration but
    /// never replaces the level. Returns the new baseline when this sample
    /// completed the startup calibration.
    pub fn record(&mut self, raw: f64, at: DateTime<Utc>) -> Option<Baseline> {
        if self.samples.len() >= self.config.calibration_buffer {
            self.samples.pop_front();
        }
        self.samples.push_back((at, raw));
        if self.last_at.map_or(true, |last| at >= last) {
            self.last_raw = Some(raw);
            self.last_at = Some(at);
            self.fresh = true;
        }

        if !self.startup_done && self.samples.len() >= self.config.startup_samples {
            self.startup_done = true;
            let recent: Vec<f64> = self
                .samples
                .iter()
                .rev()
                .take(self.config.startup_samples)
                .map(|(_, v)| *v)
                .collect();
            return self.apply(&recent, at).ok();
        }
        None
    }

    /// Replace the baseline with the average of recent samples.
    ///
    /// On failure the previous baseline stays in effect.
    pub fn calibrate(&mut self, now: DateTime<Utc>) -> Result<Baseline, CalibrationError> {
        if !self.has_microphone() {
            return Err(CalibrationError::NoMicrophone);
        }
        let window = Duration::from_std(self.config.calibration_window)
            .unwrap_or_else(|_| Duration::seconds(10));
        let recent: Vec<f64> = self
            .samples
            .iter()
            .filter(|(at, _)| *at >= now - window && *at <= now)
            .map(|(_, v)| *v)
            .collect();
        let baseline = self.apply(&recent, now)?;
        // an explicit calibration supersedes the pending startup one
        self.startup_done = true;
        Ok(baseline)
    }

    /// Reinstate a saved baseline. Startup calibration is skipped afterwards.
    pub fn restore(&mut self, baseline: Baseline) -> Result<(), CalibrationError> {
        let level = baseline.audio_baseline;
        if !level.is_finite() || level < 0.0 || level >= self.config.max_expected_rms {
            return Err(CalibrationError::Invalid(level));
        }
        self.baseline = baseline;
        self.startup_done = true;
        Ok(())
    }

    /// Merge zone distance references into the current baseline.
    pub fn set_zone_distances(&mut self, distances: &BTreeMap<ZoneId, f64>) -> Baseline {
        self.baseline
            .zone_distances
            .extend(distances.iter().map(|(id, d)| (*id, *d)));
        self.baseline.clone()
    }

    fn apply(&mut self, values: &[f64], at: DateTime<Utc>) -> Result<Baseline, CalibrationError> {
        if values.is_empty() {
            return Err(CalibrationError::NoSamples);
        }
        let average = values.iter().sum::<f64>() / values.len() as f64;
        if average >= self.config.max_expected_rms {
            return Err(CalibrationError::AboveCeiling {
                average,
                ceiling: self.config.max_expected_rms,
            });
        }
        self.baseline = Baseline {
            audio_baseline: average.max(0.0),
            calibrated_at: Some(at),
            sample_count: values.len(),
            zone_distances: std::mem::take(&mut self.baseline.zone_distances),
        };
        Ok(self.baseline.clone())
    }

    /// Score for this tick.
    ///
    /// Without a new sample from an online microphone the previous score
    /// decays by `decay_rate`.
    pub fn tick(&mut self, microphone_online: bool, decay_rate: f64) -> AudioReading {
        match self.last_raw {
            Some(raw) if self.fresh && microphone_online => {
                self.score = score_raw(
                    raw,
                    self.baseline.audio_baseline,
                    self.config.max_expected_rms,
                );
            }
            _ => {
                self.score *= 1.0 - decay_rate;
                if self.score < SILENCE_FLOOR {
                    self.score = 0.0;
                }
            }
        }
        self.fresh = false;

        AudioReading {
            level: self.last_raw,
            score: self.score,
            state: AudioState::from_score(self.score, &self.config),
        }
    }
}
