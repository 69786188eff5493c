//! The engine context.
//!
//! [`Engine`] owns every piece of mutable fusion state. It is driven by two
//! calls only: [`Engine::ingest`] for each node message and [`Engine::tick`]
//! at the fixed cadence. Time is always passed in.

use crate::config::{ConfigError, EngineConfig};
use crate::core::alert::{self, AlertLevel, AlertMachine, CriticalEvidence, Transition};
use crate::core::audio::{AudioScorer, Baseline, CalibrationError};
use crate::core::composite::{CompositeInputs, CompositeScorer};
use crate::core::health::{NodeHealthMonitor, NodeTransition};
use crate::core::recommend::{self, RecommendationContext, ZoneView};
use crate::core::windowing::InsertOutcome;
use crate::core::zones::ZoneTracker;
use crate::ingest::types::{IngestError, IngressMessage, NodeReading};
use crate::snapshot::{AudioView, EngineSnapshot, SnapshotBuilder, SnapshotParts};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Engine construction errors.
#[derive(Debug)]
pub enum EngineError {
    Config(ConfigError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Config(e) => write!(f, "engine refused to start: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}

/// What happened to an accepted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Already in the window; ignored
    Duplicate,
    /// Older than the full window; ignored
    TooOld,
    Heartbeat,
}

/// Result of one tick.
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub snapshot: EngineSnapshot,
    pub transition: Option<Transition>,
    pub node_changes: Vec<NodeTransition>,
}

/// The single owner of all engine state.
pub struct Engine {
    config: EngineConfig,
    zones: ZoneTracker,
    audio: AudioScorer,
    health: NodeHealthMonitor,
    composite: CompositeScorer,
    alert: AlertMachine,
    builder: SnapshotBuilder,
}

impl Engine {
    /// Build an engine, refusing configurations that violate an invariant.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let nodes: Vec<String> = config
            .zones
            .iter()
            .flat_map(|z| z.nodes.iter().cloned())
            .collect();

        let engine = Self {
            zones: ZoneTracker::new(&config),
            audio: AudioScorer::new(config.audio.clone()),
            health: NodeHealthMonitor::new(nodes, config.health.timeout()),
            composite: CompositeScorer::new(config.composite.clone()),
            alert: AlertMachine::new(config.alert.clone()),
            builder: SnapshotBuilder::new(),
            config,
        };

        info!(
            "Engine {} initialized with {} zones",
            engine.builder.instance_id(),
            engine.zones.len()
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn instance_id(&self) -> Uuid {
        self.builder.instance_id()
    }

    pub fn baseline(&self) -> &Baseline {
        self.audio.baseline()
    }

    pub fn alert_level(&self) -> AlertLevel {
        self.alert.level()
    }

    pub fn zones(&self) -> &ZoneTracker {
        &self.zones
    }

    pub fn health(&self) -> &NodeHealthMonitor {
        &self.health
    }

    /// Apply one node message.
    pub fn ingest(
        &mut self,
        message: IngressMessage,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, IngestError> {
        match message {
            IngressMessage::Reading(reading) => self.ingest_reading(reading, now),
            IngressMessage::Heartbeat(hb) => {
                if !self.health.contains(&hb.node_id) {
                    return Err(IngestError::UnknownNode(hb.node_id));
                }
                // a heartbeat stamped in the future counts from receipt
                let at = hb.timestamp.min(now);
                if self
                    .health
                    .touch(&hb.node_id, at, Some(hb.uptime_secs), now)
                    .is_some()
                {
                    info!("Node {} online (uptime {}s)", hb.node_id, hb.uptime_secs);
                }
                Ok(IngestOutcome::Heartbeat)
            }
        }
    }

    fn ingest_reading(
        &mut self,
        reading: NodeReading,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, IngestError> {
        let skew = self.config.window.max_clock_skew();
        if reading.timestamp > now + skew {
            return Err(IngestError::Malformed(format!(
                "reading from {} is stamped {} ahead of receipt",
                reading.node_id,
                reading.timestamp - now
            )));
        }

        let (reading, fault) = reading.sanitized(self.config.window.sensor_max_range_cm);
        if fault {
            debug!("Node {} reported an out-of-range distance", reading.node_id);
        }

        let outcome = self.zones.record(&reading)?;

        if self
            .health
            .touch(&reading.node_id, reading.timestamp.min(now), None, now)
            .is_some()
        {
            info!("Node {} online", reading.node_id);
        }

        match outcome {
            InsertOutcome::Inserted => {
                if let Some(raw) = reading.audio_rms {
                    if self.audio.is_microphone(&reading.node_id) {
                        if let Some(baseline) = self.audio.record(raw, reading.timestamp) {
                            info!(
                                "Startup audio baseline set to {:.1} from {} samples",
                                baseline.audio_baseline, baseline.sample_count
                            );
                        }
                    }
                }
                Ok(IngestOutcome::Accepted)
            }
            InsertOutcome::Duplicate => Ok(IngestOutcome::Duplicate),
            InsertOutcome::TooOld => Ok(IngestOutcome::TooOld),
        }
    }

    /// Re-sample the ambient audio baseline and the empty-corridor distance
    /// of every zone with enough readings.
    pub fn calibrate(&mut self, now: DateTime<Utc>) -> Result<Baseline, CalibrationError> {
        match self.audio.calibrate(now) {
            Ok(_) => {
                let distances = self
                    .zones
                    .capture_empty_distances(self.config.window.min_samples);
                self.zones.set_empty_distances(&distances);
                let baseline = self.audio.set_zone_distances(&distances);
                info!(
                    "Audio baseline calibrated to {:.1} from {} samples ({} zone distances)",
                    baseline.audio_baseline,
                    baseline.sample_count,
                    distances.len()
                );
                Ok(baseline)
            }
            Err(e) => {
                warn!("Calibration failed, keeping previous baseline: {e}");
                Err(e)
            }
        }
    }

    /// Reinstate a baseline saved by an earlier run.
    pub fn restore_baseline(&mut self, baseline: Baseline) -> Result<(), CalibrationError> {
        let distances = baseline.zone_distances.clone();
        self.audio.restore(baseline)?;
        self.zones.set_empty_distances(&distances);
        info!(
            "Restored audio baseline {:.1} and {} zone distances",
            self.audio.baseline().audio_baseline,
            distances.len()
        );
        Ok(())
    }

    /// Advance the engine by one tick and build the snapshot.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutput {
        let node_changes = self.health.tick(now);
        for change in &node_changes {
            warn!("Node {} offline: no contact within timeout", change.node_id);
        }

        let health = &self.health;
        self.zones.tick(&self.config, now, |n| health.is_online(n));

        let microphone_online = self
            .config
            .audio
            .microphone_node
            .as_deref()
            .is_some_and(|n| self.health.is_online(n));
        let audio = self
            .audio
            .tick(microphone_online, self.config.composite.decay_rate);

        let active: Vec<_> = self.zones.zones().filter(|z| z.online).collect();
        let inputs = CompositeInputs {
            movement: active.iter().map(|z| z.motion).fold(0.0, f64::max),
            audio: audio.score,
            density: active.iter().map(|z| z.density).fold(0.0, f64::max),
            online_fraction: active.len() as f64 / self.zones.len().max(1) as f64,
            freshness: if active.is_empty() {
                0.0
            } else {
                active.iter().map(|z| z.freshness()).sum::<f64>() / active.len() as f64
            },
        };
        let cpi = self.composite.score(inputs, now);

        let evidence = CriticalEvidence {
            audio: cpi.components.audio,
            movement: cpi.components.movement,
        };
        let transition = self.alert.update(cpi.value, evidence, now);
        if let Some(ref t) = transition {
            info!(
                "Alert level {} -> {} (score {:.1}, confidence {:.0}%)",
                t.from, t.to, t.score, cpi.confidence
            );
        }

        let tick_secs = self.config.tick_interval.as_secs_f64();
        let slope_per_sec = self.composite.slope_per_tick().map(|s| s / tick_secs);
        let bands = self.alert.bands();
        let timeline = alert::forecast(cpi.value, slope_per_sec, bands);
        let time_to_critical = alert::time_to_critical(cpi.value, slope_per_sec, bands);

        let offline_nodes: Vec<String> = self
            .health
            .nodes()
            .filter(|n| !n.online)
            .map(|n| n.node_id.clone())
            .collect();
        let context = RecommendationContext {
            level: self.alert.level(),
            zones: self
                .zones
                .zones()
                .map(|z| ZoneView {
                    id: z.id,
                    status: z.status,
                    detection_type: z.features.detection_type,
                    online: z.online,
                })
                .collect(),
            dominant: cpi.dominant,
            audio_state: audio.state,
            trend: cpi.components.trend,
            offline_nodes,
        };
        let actions = recommend::recommend(&context, self.config.max_actions);
        let factors = recommend::contributing_factors(&context);

        let snapshot = self.builder.build(SnapshotParts {
            timestamp: now,
            level: self.alert.level(),
            entered_at: self.alert.entered_at(),
            cpi: &cpi,
            time_to_critical,
            nodes: self.health.nodes().collect(),
            zones: self.zones.zones().collect(),
            timeline,
            audio: AudioView {
                level: audio.level,
                score: (audio.score * 10.0).round() / 10.0,
                state: audio.state,
                baseline: self.audio.baseline().clone(),
            },
            actions,
            factors,
        });

        TickOutput {
            snapshot,
            transition,
            node_changes,
        }
    }
}
