//! Stampede Shield CLI
//!
//! Crowd-crush risk fusion engine for instrumented corridors.

use chrono::Utc;
use clap::{Parser, Subcommand};
use stampede_shield::{
    config::Config,
    core::{AlertLevel, Baseline},
    engine::Engine,
    firmware::{AlertBroadcaster, UdpAlertPublisher},
    ingest::UdpIngress,
    runtime::{EngineHandle, RuntimeOptions},
    simulation::{self, Scenario},
    stats::create_shared_stats_with_persistence,
    ADVISORY_NOTICE, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::oneshot;

#[cfg(feature = "server")]
use stampede_shield::server::{self, ServerConfig};

#[derive(Parser)]
#[command(name = "stampede-shield")]
#[command(version = VERSION)]
#[command(about = "Crowd-crush risk fusion engine", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine with UDP ingress and the dashboard API
    Run {
        /// UDP port for node readings
        #[arg(long)]
        udp_port: Option<u16>,

        /// HTTP port for the dashboard API
        #[arg(long)]
        http_port: Option<u16>,

        /// Tick interval in milliseconds
        #[arg(long)]
        tick_ms: Option<u64>,

        /// Do not send alert levels back to the nodes
        #[arg(long)]
        no_firmware: bool,
    },

    /// Replay a synthetic scenario through a fresh engine
    Simulate {
        /// Scenario: empty, normal, building, surge or obstruction
        #[arg(long, default_value = "building")]
        scenario: Scenario,

        /// Number of ticks to run
        #[arg(long, default_value = "200")]
        ticks: u64,

        /// Print every snapshot as JSON lines instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration and exit
    Check,

    /// Show the effective configuration
    Config,

    /// Display the operator advisory
    Advisory,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            udp_port,
            http_port,
            tick_ms,
            no_firmware,
        } => {
            cmd_run(cli.config.as_deref(), udp_port, http_port, tick_ms, no_firmware);
        }
        Commands::Simulate {
            scenario,
            ticks,
            json,
        } => {
            cmd_simulate(cli.config.as_deref(), scenario, ticks, json);
        }
        Commands::Check => {
            cmd_check(cli.config.as_deref());
        }
        Commands::Config => {
            cmd_config(cli.config.as_deref());
        }
        Commands::Advisory => {
            println!("{ADVISORY_NOTICE}");
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Load the configuration or exit with a readable message.
fn load_config(path: Option<&Path>) -> Config {
    let result = match path {
        Some(p) => Config::load_from(p),
        None => Config::load(),
    };
    match result {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    }
}

/// Replace the port of a `host:port` bind string.
fn with_port(bind: &str, port: u16) -> String {
    match bind.rsplit_once(':') {
        Some((host, _)) => format!("{host}:{port}"),
        None => format!("{bind}:{port}"),
    }
}

fn cmd_run(
    config_path: Option<&Path>,
    udp_port: Option<u16>,
    http_port: Option<u16>,
    tick_ms: Option<u64>,
    no_firmware: bool,
) {
    init_tracing();
    println!("Stampede Shield v{VERSION}");
    println!("{ADVISORY_NOTICE}");

    let mut config = load_config(config_path);
    if let Some(port) = udp_port {
        config.network.udp_bind = with_port(&config.network.udp_bind, port);
    }
    if let Some(port) = http_port {
        config.network.http_bind = with_port(&config.network.http_bind, port);
    }
    if let Some(ms) = tick_ms {
        config.engine.tick_interval = Duration::from_millis(ms);
    }
    if no_firmware {
        config.network.firmware_command_addr = None;
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        eprintln!("Refusing to start. Run 'stampede-shield check' for details.");
        std::process::exit(1);
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let stats = create_shared_stats_with_persistence(config.data_path.join("stats.json"));

    let broadcaster = match config.network.firmware_command_addr.as_deref() {
        Some(addr) => match UdpAlertPublisher::new(addr) {
            Ok(publisher) => {
                println!("  Alert commands: {}", publisher.target());
                Some(AlertBroadcaster::new(
                    Box::new(publisher),
                    config.network.rebroadcast_ticks,
                ))
            }
            Err(e) => {
                eprintln!("Warning: Alert commands disabled: {e}");
                None
            }
        },
        None => {
            println!("  Alert commands: disabled");
            None
        }
    };

    let mut engine = match Engine::new(config.engine.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    println!("Instance ID: {}", engine.instance_id());
    println!("  Tick interval: {}ms", config.engine.tick_interval.as_millis());

    let baseline_path = config.data_path.join("calibration.json");
    match Baseline::load(&baseline_path) {
        Ok(Some(baseline)) => match engine.restore_baseline(baseline) {
            Ok(()) => println!("  Calibration: restored from {}", baseline_path.display()),
            Err(e) => eprintln!("Warning: Ignoring saved calibration: {e}"),
        },
        Ok(None) => println!("  Calibration: automatic from the first microphone samples"),
        Err(e) => eprintln!("Warning: Could not read saved calibration: {e}"),
    }

    let handle = match EngineHandle::spawn(
        engine,
        RuntimeOptions {
            queue_capacity: config.network.queue_capacity,
            stats: stats.clone(),
            broadcaster,
            baseline_path: Some(baseline_path),
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error starting engine thread: {e}");
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error creating async runtime: {e}");
            std::process::exit(1);
        }
    };

    let mut shutdowns: Vec<oneshot::Sender<()>> = Vec::new();

    let udp = rt.block_on(UdpIngress::bind(&config.network.udp_bind));
    match udp {
        Ok(ingress) => {
            if let Ok(addr) = ingress.local_addr() {
                println!("  UDP ingress: {addr}");
            }
            let (tx, rx) = oneshot::channel();
            rt.spawn(ingress.run(handle.client(), rx));
            shutdowns.push(tx);
        }
        Err(e) => {
            eprintln!("Error binding UDP {}: {e}", config.network.udp_bind);
            std::process::exit(1);
        }
    }

    #[cfg(feature = "server")]
    {
        let bind = match config.network.http_bind.parse() {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: invalid http_bind {}: {e}", config.network.http_bind);
                std::process::exit(1);
            }
        };
        match rt.block_on(server::run(ServerConfig::new(bind), handle.client())) {
            Ok((addr, tx)) => {
                println!("  Dashboard API: http://{addr}");
                shutdowns.push(tx);
            }
            Err(e) => {
                eprintln!("Error starting dashboard API: {e}");
                std::process::exit(1);
            }
        }
    }

    #[cfg(feature = "notify")]
    if config.notify.url.is_some() {
        use stampede_shield::notify::{run_notifier, CooldownGate, WebhookNotifier};
        match WebhookNotifier::new(&config.notify) {
            Ok(notifier) => {
                println!("  Webhook notifications: {} and above", config.notify.min_level);
                let gate = CooldownGate::new(config.notify.min_level, config.notify.cooldown);
                rt.spawn(run_notifier(notifier, gate, handle.client()));
            }
            Err(e) => eprintln!("Warning: Webhook notifications disabled: {e}"),
        }
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let mut transitions = handle.subscribe();
    while running.load(Ordering::SeqCst) {
        match transitions.try_recv() {
            Ok(t) => {
                let marker = if t.is_escalation() { "▲" } else { "▼" };
                println!(
                    "[{}] {marker} {} -> {} (score {:.1})",
                    t.at.format("%H:%M:%S"),
                    t.from,
                    t.to,
                    t.score
                );
            }
            Err(TryRecvError::Lagged(n)) => {
                eprintln!("Warning: {n} alert transitions not shown");
            }
            Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(100)),
            Err(TryRecvError::Closed) => {
                eprintln!("Engine stopped unexpectedly");
                break;
            }
        }
    }

    println!();
    println!("Shutting down...");
    for tx in shutdowns {
        let _ = tx.send(());
    }
    let last = handle.shutdown();
    rt.shutdown_timeout(Duration::from_secs(2));

    let export_path = config.data_path.join(format!(
        "snapshot_{}.json",
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    match last.to_json() {
        Ok(json) => {
            if let Err(e) = std::fs::write(&export_path, json) {
                eprintln!("Error writing final snapshot: {e}");
            } else {
                println!("Final snapshot ({}) written to {:?}", last.alert.level, export_path);
            }
        }
        Err(e) => eprintln!("Error serializing final snapshot: {e}"),
    }

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save statistics: {e}");
    }

    println!();
    println!("{}", stats.summary());
}

fn cmd_simulate(config_path: Option<&Path>, scenario: Scenario, ticks: u64, json: bool) {
    let config = load_config(config_path);

    let outputs = match simulation::run_scenario(config.engine.clone(), scenario, ticks, Utc::now())
    {
        Ok(outputs) => outputs,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if json {
        for output in &outputs {
            match serde_json::to_string(&output.snapshot) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("Error serializing snapshot: {e}"),
            }
        }
        return;
    }

    println!("Scenario '{scenario}' over {ticks} ticks");
    println!("=================================");
    println!();

    for output in &outputs {
        if let Some(ref t) = output.transition {
            println!(
                "  tick {:>4}: {} -> {} (score {:.1})",
                output.snapshot.sequence, t.from, t.to, t.score
            );
        }
    }

    let peak = outputs
        .iter()
        .map(|o| o.snapshot.alert.level)
        .max()
        .unwrap_or(AlertLevel::Safe);
    let Some(last) = outputs.last().map(|o| &o.snapshot) else {
        println!("No ticks run.");
        return;
    };

    println!();
    println!("Peak level: {peak}");
    println!(
        "Final: {} | CPI {:.1} | confidence {:.0}%",
        last.alert.level, last.cpi.value, last.cpi.confidence
    );
    for (id, zone) in &last.zones {
        println!(
            "  {:<6} {:<7} {:<13} density {:>5.1} motion {:>5.1}",
            id.to_string(),
            zone.status.to_string(),
            zone.detection_type.to_string(),
            zone.density,
            zone.motion
        );
    }
    if !last.actions.is_empty() {
        println!();
        println!("Recommended actions:");
        for action in &last.actions {
            println!("  [{}] {}: {}", action.priority, action.action, action.reason);
        }
    }
}

fn cmd_check(config_path: Option<&Path>) {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_path);
    let config = load_config(Some(&path));

    println!("Checking {:?}", path);
    if !path.exists() {
        println!("  (file not found, checking defaults)");
    }

    match config.validate() {
        Ok(()) => {
            println!("Configuration OK ✓");
            println!("  Zones: {}", config.engine.zones.len());
            println!(
                "  Nodes: {}",
                config.engine.zones.iter().map(|z| z.nodes.len()).sum::<usize>()
            );
            println!("  Weight sum: {:.2}", config.engine.composite.weights.sum());
        }
        Err(e) => {
            eprintln!("Configuration invalid ✗");
            eprintln!("  {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_config(config_path: Option<&Path>) {
    let config = load_config(config_path);

    println!("Configuration");
    println!("=============");
    println!();
    println!(
        "Config file: {:?}",
        config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Config::config_path)
    );
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_port() {
        assert_eq!(with_port("0.0.0.0:4444", 5000), "0.0.0.0:5000");
        assert_eq!(with_port("[::1]:8000", 9000), "[::1]:9000");
        assert_eq!(with_port("localhost", 80), "localhost:80");
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::parse_from([
            "stampede-shield",
            "simulate",
            "--scenario",
            "surge",
            "--ticks",
            "10",
        ]);
        match cli.command {
            Commands::Simulate { scenario, ticks, .. } => {
                assert_eq!(scenario, Scenario::Surge);
                assert_eq!(ticks, 10);
            }
            _ => panic!("expected simulate"),
        }
    }
}
