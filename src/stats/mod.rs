//! Operational statistics for the engine.

pub mod counters;

pub use counters::{
    create_shared_stats, create_shared_stats_with_persistence, Counter, IngestStats, SharedStats,
    StatsSnapshot,
};
