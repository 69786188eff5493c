//! Demonstration of the Stampede Shield engine on a synthetic crowd.
//!
//! This example shows how to:
//! 1. Start the engine on its own thread
//! 2. Feed it node messages from the scenario generator
//! 3. Follow alert transitions as they happen
//! 4. Read the latest snapshot, actions and forecast
//!
//! Run with: cargo run --example scenario_demo [scenario]
//!
//! Scenarios: empty, normal, building (default), surge, obstruction

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stampede_shield::{
    config::EngineConfig,
    engine::Engine,
    runtime::{EngineHandle, RuntimeOptions},
    simulation::{Scenario, ScenarioGenerator},
    stats::create_shared_stats,
    ADVISORY_NOTICE,
};

/// Demo ticks run five times faster than the field cadence.
const DEMO_TICK_MS: u64 = 100;
const DEMO_TICKS: u64 = 300;

fn main() {
    println!("Stampede Shield - Scenario Demo");
    println!("===============================");
    println!();
    println!("{ADVISORY_NOTICE}");

    let scenario = match std::env::args().nth(1) {
        Some(name) => match name.parse::<Scenario>() {
            Ok(s) => s,
            Err(e) => {
                eprintln!("{e}");
                return;
            }
        },
        None => Scenario::Building,
    };

    let config = EngineConfig {
        tick_interval: Duration::from_millis(DEMO_TICK_MS),
        ..EngineConfig::default()
    };

    let engine = match Engine::new(config.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {e}");
            return;
        }
    };
    println!("Instance ID: {}", engine.instance_id());

    let stats = create_shared_stats();
    let handle = match EngineHandle::spawn(
        engine,
        RuntimeOptions {
            queue_capacity: 1024,
            stats: stats.clone(),
            broadcaster: None,
            baseline_path: None,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error starting engine: {e}");
            return;
        }
    };

    println!();
    println!("Replaying '{scenario}' for {DEMO_TICKS} ticks ({DEMO_TICK_MS}ms each)...");
    println!();

    // Set up stop flag
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }

    let client = handle.client();
    let mut transitions = handle.subscribe();
    let mut generator = ScenarioGenerator::new(scenario, config, Utc::now());

    for tick in 0..DEMO_TICKS {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let (_, messages) = generator.next_tick();
        for message in messages {
            if let Err(e) = client.submit(message) {
                eprintln!("  Message not queued: {e}");
            }
        }
        std::thread::sleep(Duration::from_millis(DEMO_TICK_MS));

        while let Ok(t) = transitions.try_recv() {
            println!(
                "  [{}] {} -> {} (score {:.1})",
                t.at.format("%H:%M:%S%.3f"),
                t.from,
                t.to,
                t.score
            );
        }

        if tick % 50 == 49 {
            let snapshot = client.latest();
            println!();
            println!("=== Tick {} ===", tick + 1);
            println!(
                "  Level: {} | CPI {:.1} | confidence {:.0}%",
                snapshot.alert.level, snapshot.cpi.value, snapshot.cpi.confidence
            );
            println!(
                "  Breakdown: motion {:.1}, audio {:.1}, trend {:.1}, density {:.1}",
                snapshot.cpi.breakdown.motion,
                snapshot.cpi.breakdown.audio,
                snapshot.cpi.breakdown.trend,
                snapshot.cpi.breakdown.density
            );
            println!(
                "  Forecast: 30s {} | 60s {} | 120s {}",
                snapshot.timeline.in_30s, snapshot.timeline.in_60s, snapshot.timeline.in_120s
            );
            for (id, zone) in &snapshot.zones {
                println!(
                    "  {}: {} ({})",
                    id, zone.status, zone.detection_type
                );
            }
            for action in &snapshot.actions {
                println!("  -> [{}] {}: {}", action.priority, action.action, action.reason);
            }
            println!();
        }
    }

    println!("Stopping engine...");
    let last = handle.shutdown();
    println!("Final level: {}", last.alert.level);
    println!();
    println!("{}", stats.summary());
}
