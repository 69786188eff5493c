//! Stampede Shield - crowd-crush risk fusion for instrumented corridors.
//!
//! Sensor nodes along a corridor report ultrasonic distance, PIR motion and
//! microphone RMS. The engine fuses them into per-zone density and motion
//! scores, an audio agitation score and a single Crowd Pressure Index,
//! drives a hysteretic alert level from it and recommends operator actions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Stampede Shield                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Ingest    │──▶│ Zone windows│──▶│  Features   │       │
//! │  │ (UDP/HTTP)  │   │ (20 samples)│   │  + audio    │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         │                                    │              │
//! │         ▼                                    ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │ Node health │   │ Alert level │◀──│  Composite  │       │
//! │  │ (heartbeat) │   │ + forecast  │   │    (CPI)    │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stampede_shield::{Engine, EngineConfig, NodeReading};
//! use chrono::Utc;
//!
//! let mut engine = Engine::new(EngineConfig::default()).expect("valid config");
//! let now = Utc::now();
//! let reading = NodeReading::new("NODE_C", now)
//!     .with_distance(80.0)
//!     .with_motion(true);
//! engine.ingest(reading.into(), now).expect("known node");
//!
//! let output = engine.tick(now);
//! println!("{}", output.snapshot.alert.level);
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod firmware;
pub mod ingest;
pub mod notify;
pub mod runtime;
pub mod simulation;
pub mod snapshot;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, EngineConfig, NetworkConfig, NotifyConfig};
pub use core::{AlertLevel, CpiSnapshot, DetectionType, ZoneId, ZoneStatus};
pub use engine::{Engine, EngineError, IngestOutcome, TickOutput};
pub use ingest::{Heartbeat, IngestError, IngressMessage, NodeReading};
pub use runtime::{EngineClient, EngineHandle, RuntimeOptions};
pub use simulation::{Scenario, ScenarioGenerator};
pub use snapshot::EngineSnapshot;
pub use stats::{SharedStats, StatsSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Notice shown to operators when the engine starts.
pub const ADVISORY_NOTICE: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║              STAMPEDE SHIELD - OPERATOR ADVISORY                 ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  Risk levels and actions are ADVISORY. They support, and never   ║
║  replace, trained stewards watching the crowd.                   ║
║                                                                  ║
║  ✓ WHAT IS MEASURED:                                             ║
║    • Distance to the nearest object per zone (no images)         ║
║    • Whether PIR motion is present                               ║
║    • Microphone loudness (RMS only, no recording)                ║
║                                                                  ║
║  ✗ WHAT IS NEVER CAPTURED:                                       ║
║    • Audio content or speech                                     ║
║    • Identities, faces or device identifiers                     ║
║                                                                  ║
║  Calibrate the audio baseline while the venue is quiet:          ║
║    POST /api/calibrate                                           ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_notice_contents() {
        assert!(ADVISORY_NOTICE.contains("ADVISORY"));
        assert!(ADVISORY_NOTICE.contains("NEVER CAPTURED"));
        assert!(ADVISORY_NOTICE.contains("/api/calibrate"));
    }
}
