//! Fusion core of the Stampede Shield engine.
//!
//! This module contains:
//! - Per-zone windows, feature extraction and zone tracking
//! - Audio scoring against a calibrated baseline
//! - The composite pressure index and its history
//! - The alert state machine and forecast
//! - Operator recommendations
//! - Node liveness tracking

pub mod alert;
pub mod audio;
pub mod composite;
pub mod features;
pub mod health;
pub mod recommend;
pub mod windowing;
pub mod zones;

// Re-export commonly used types
pub use alert::{AlertLevel, AlertMachine, Forecast, Transition};
pub use audio::{AudioScorer, AudioState, Baseline, CalibrationError};
pub use composite::{Component, CompositeScorer, CpiComponents, CpiSnapshot};
pub use features::{DetectionType, ZoneFeatures, ZoneStatus};
pub use health::{NodeHealth, NodeHealthMonitor};
pub use recommend::Action;
pub use windowing::{InsertOutcome, ZoneWindow};
pub use zones::{ZoneId, ZoneTracker};
