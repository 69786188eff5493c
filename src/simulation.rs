//! Deterministic corridor scenarios.
//!
//! Generates node readings and heartbeats tick by tick for the `simulate`
//! command, the demo and tests. Every scenario opens with a quiet lead-in
//! so the startup audio calibration sees an empty corridor.

use crate::config::EngineConfig;
use crate::core::zones::ZoneId;
use crate::engine::{Engine, EngineError, TickOutput};
use crate::ingest::types::{Heartbeat, IngressMessage, NodeReading};
use chrono::{DateTime, Duration, Utc};
use std::str::FromStr;

/// Ticks of empty, quiet corridor before the scenario proper starts.
pub const LEAD_IN_TICKS: u64 = 20;

/// Ticks over which the building scenario ramps from normal to surge.
const BUILD_UP_TICKS: u64 = 120;

/// Heartbeat cadence in ticks.
const HEARTBEAT_EVERY: u64 = 20;

/// Named scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Nobody in the corridor
    Empty,
    /// Light pedestrian traffic
    Normal,
    /// Normal traffic that ramps into a surge
    Building,
    /// Dense, agitated, loud crowd
    Surge,
    /// A static object parked in front of the CENTER sensor
    Obstruction,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Empty,
        Scenario::Normal,
        Scenario::Building,
        Scenario::Surge,
        Scenario::Obstruction,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Empty => "empty",
            Scenario::Normal => "normal",
            Scenario::Building => "building",
            Scenario::Surge => "surge",
            Scenario::Obstruction => "obstruction",
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|sc| sc.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let names: Vec<&str> = Scenario::ALL.iter().map(|sc| sc.name()).collect();
                format!("unknown scenario '{s}', expected one of: {}", names.join(", "))
            })
    }
}

/// Signal shape of one zone.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ZoneProfile {
    base_cm: f64,
    /// Alternating offset around the base
    swing_cm: f64,
    /// Fraction of samples with PIR motion
    motion: f64,
}

impl ZoneProfile {
    const EMPTY: ZoneProfile = ZoneProfile {
        base_cm: 390.0,
        swing_cm: 0.0,
        motion: 0.0,
    };

    fn lerp(a: ZoneProfile, b: ZoneProfile, t: f64) -> ZoneProfile {
        let mix = |x: f64, y: f64| x + (y - x) * t;
        ZoneProfile {
            base_cm: mix(a.base_cm, b.base_cm),
            swing_cm: mix(a.swing_cm, b.swing_cm),
            motion: mix(a.motion, b.motion),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Profile {
    entry: ZoneProfile,
    center: ZoneProfile,
    exit: ZoneProfile,
    mic_rms: f64,
}

impl Profile {
    const QUIET: Profile = Profile {
        entry: ZoneProfile::EMPTY,
        center: ZoneProfile::EMPTY,
        exit: ZoneProfile::EMPTY,
        mic_rms: 50.0,
    };

    const NORMAL: Profile = Profile {
        entry: ZoneProfile {
            base_cm: 200.0,
            swing_cm: 3.0,
            motion: 0.3,
        },
        center: ZoneProfile {
            base_cm: 120.0,
            swing_cm: 3.0,
            motion: 0.3,
        },
        exit: ZoneProfile {
            base_cm: 250.0,
            swing_cm: 3.0,
            motion: 0.2,
        },
        mic_rms: 150.0,
    };

    const SURGE: Profile = Profile {
        entry: ZoneProfile {
            base_cm: 90.0,
            swing_cm: 40.0,
            motion: 0.8,
        },
        center: ZoneProfile {
            base_cm: 110.0,
            swing_cm: 70.0,
            motion: 0.9,
        },
        exit: ZoneProfile {
            base_cm: 120.0,
            swing_cm: 50.0,
            motion: 0.7,
        },
        mic_rms: 900.0,
    };

    const OBSTRUCTION: Profile = Profile {
        center: ZoneProfile {
            base_cm: 20.0,
            swing_cm: 0.0,
            motion: 0.0,
        },
        ..Profile::QUIET
    };

    fn zone(&self, id: ZoneId) -> ZoneProfile {
        match id {
            ZoneId::Entry => self.entry,
            ZoneId::Center => self.center,
            ZoneId::Exit => self.exit,
        }
    }
}

/// Produces one tick's worth of messages at a time.
pub struct ScenarioGenerator {
    scenario: Scenario,
    config: EngineConfig,
    start: DateTime<Utc>,
    tick: u64,
}

impl ScenarioGenerator {
    pub fn new(scenario: Scenario, config: EngineConfig, start: DateTime<Utc>) -> Self {
        Self {
            scenario,
            config,
            start,
            tick: 0,
        }
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    fn tick_duration(&self) -> Duration {
        Duration::from_std(self.config.tick_interval)
            .unwrap_or_else(|_| Duration::milliseconds(500))
    }

    fn profile(&self, tick: u64) -> Profile {
        if tick < LEAD_IN_TICKS {
            return Profile::QUIET;
        }
        let t = tick - LEAD_IN_TICKS;
        match self.scenario {
            Scenario::Empty => Profile::QUIET,
            Scenario::Normal => Profile::NORMAL,
            Scenario::Surge => Profile::SURGE,
            Scenario::Obstruction => Profile::OBSTRUCTION,
            Scenario::Building => {
                let k = (t as f64 / BUILD_UP_TICKS as f64).min(1.0);
                let (a, b) = (Profile::NORMAL, Profile::SURGE);
                Profile {
                    entry: ZoneProfile::lerp(a.entry, b.entry, k),
                    center: ZoneProfile::lerp(a.center, b.center, k),
                    exit: ZoneProfile::lerp(a.exit, b.exit, k),
                    mic_rms: a.mic_rms + (b.mic_rms - a.mic_rms) * k,
                }
            }
        }
    }

    /// Timestamp and messages of the next tick.
    pub fn next_tick(&mut self) -> (DateTime<Utc>, Vec<IngressMessage>) {
        let tick = self.tick;
        self.tick += 1;

        let now = self.start + self.tick_duration() * tick as i32;
        let profile = self.profile(tick);
        let mut messages: Vec<IngressMessage> = Vec::new();

        for (slot, zone) in self.config.zones.iter().enumerate() {
            let shape = profile.zone(zone.id);
            for node in &zone.nodes {
                if tick % HEARTBEAT_EVERY == 0 {
                    let uptime = (self.tick_duration() * tick as i32).num_seconds().max(0) as u64;
                    messages.push(Heartbeat::new(node.clone(), now, uptime).into());
                }

                let swing = if tick % 2 == 0 { shape.swing_cm } else { -shape.swing_cm };
                // spread motion evenly: 7 is coprime with 10
                let phase = (tick * 7 + slot as u64 * 3) % 10;
                let motion = (phase as f64) < shape.motion * 10.0;

                let mut reading = NodeReading::new(node.clone(), now)
                    .with_distance((shape.base_cm + swing).max(0.0))
                    .with_motion(motion);
                if self.config.audio.microphone_node.as_deref() == Some(node.as_str()) {
                    reading = reading.with_audio(profile.mic_rms);
                }
                messages.push(reading.into());
            }
        }

        (now, messages)
    }
}

/// Run a scenario through a fresh engine and collect every tick's output.
pub fn run_scenario(
    config: EngineConfig,
    scenario: Scenario,
    ticks: u64,
    start: DateTime<Utc>,
) -> Result<Vec<TickOutput>, EngineError> {
    let mut engine = Engine::new(config.clone())?;
    let mut generator = ScenarioGenerator::new(scenario, config, start);
    let mut outputs = Vec::with_capacity(ticks as usize);

    for _ in 0..ticks {
        let (now, messages) = generator.next_tick();
        for message in messages {
            // scenario nodes are always configured nodes
            let _ = engine.ingest(message, now);
        }
        outputs.push(engine.tick(now));
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alert::AlertLevel;
    use crate::core::features::DetectionType;

    fn run(scenario: Scenario, ticks: u64) -> Vec<TickOutput> {
        run_scenario(EngineConfig::default(), scenario, ticks, Utc::now()).unwrap()
    }

    fn peak(outputs: &[TickOutput]) -> AlertLevel {
        outputs
            .iter()
            .map(|o| o.snapshot.alert.level)
            .max()
            .unwrap_or_default()
    }

    #[test]
    fn test_parse_scenario_names() {
        assert_eq!("surge".parse::<Scenario>(), Ok(Scenario::Surge));
        assert_eq!(" Building ".parse::<Scenario>(), Ok(Scenario::Building));
        assert!("stampede".parse::<Scenario>().is_err());
    }

    #[test]
    fn test_generator_emits_heartbeats_and_mic() {
        let mut generator =
            ScenarioGenerator::new(Scenario::Normal, EngineConfig::default(), Utc::now());
        let (_, messages) = generator.next_tick();
        let heartbeats = messages
            .iter()
            .filter(|m| matches!(m, IngressMessage::Heartbeat(_)))
            .count();
        assert_eq!(heartbeats, 3);
        let with_audio = messages
            .iter()
            .filter(|m| matches!(m, IngressMessage::Reading(r) if r.audio_rms.is_some()))
            .count();
        assert_eq!(with_audio, 1);
    }

    #[test]
    fn test_empty_corridor_stays_safe() {
        let outputs = run(Scenario::Empty, 80);
        assert_eq!(peak(&outputs), AlertLevel::Safe);
        let last = &outputs[outputs.len() - 1].snapshot;
        assert_eq!(
            last.zone(ZoneId::Center).map(|z| z.detection_type),
            Some(DetectionType::Clear)
        );
    }

    #[test]
    fn test_obstruction_is_not_a_crowd() {
        let outputs = run(Scenario::Obstruction, 80);
        let last = &outputs[outputs.len() - 1].snapshot;
        assert_eq!(
            last.zone(ZoneId::Center).map(|z| z.detection_type),
            Some(DetectionType::StaticObject)
        );
        assert!(peak(&outputs) <= AlertLevel::Low);
    }

    #[test]
    fn test_surge_escalates() {
        let outputs = run(Scenario::Surge, 80);
        assert!(peak(&outputs) >= AlertLevel::High);
    }
}
