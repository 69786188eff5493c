//! Single-writer runtime for the engine.
//!
//! The engine lives on its own thread and is only ever touched by that
//! thread. Ingress and calibration requests arrive over a bounded queue;
//! the tick runs on a fixed deadline whether or not anything arrived.
//! Every tick publishes a fresh `Arc<EngineSnapshot>`.

use crate::core::alert::Transition;
use crate::core::audio::{Baseline, CalibrationError};
use crate::engine::{Engine, IngestOutcome};
use crate::firmware::AlertBroadcaster;
use crate::ingest::types::{parse_message, IngestError, IngressMessage};
use crate::snapshot::EngineSnapshot;
use crate::stats::{Counter, SharedStats};
use chrono::Utc;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TrySendError};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

/// Capacity of the transition fan-out channel.
const TRANSITION_CAPACITY: usize = 64;

type CalibrationReply = oneshot::Sender<Result<Baseline, CalibrationError>>;

/// Messages handled by the engine thread.
pub enum EngineCommand {
    Ingest(IngressMessage),
    Calibrate(CalibrationReply),
    Shutdown,
}

/// Runtime options.
pub struct RuntimeOptions {
    pub queue_capacity: usize,
    pub stats: SharedStats,
    /// Pushes the alert level to the nodes each tick
    pub broadcaster: Option<AlertBroadcaster>,
    /// Where successful calibrations are saved
    pub baseline_path: Option<PathBuf>,
}

/// Cloneable access to a running engine.
#[derive(Clone)]
pub struct EngineClient {
    tx: Sender<EngineCommand>,
    snapshots: watch::Receiver<Arc<EngineSnapshot>>,
    transitions: broadcast::Sender<Transition>,
    stats: SharedStats,
}

impl EngineClient {
    /// Queue a message without blocking. A full queue drops it.
    pub fn submit(&self, message: IngressMessage) -> Result<(), IngestError> {
        match self.tx.try_send(EngineCommand::Ingest(message)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.stats.record(Counter::QueueOverflow);
                debug!("Engine queue full, message dropped");
                Err(IngestError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(IngestError::Stopped),
        }
    }

    /// Decode and queue a raw payload. Malformed payloads are counted.
    pub fn submit_bytes(&self, bytes: &[u8]) -> Result<(), IngestError> {
        match parse_message(bytes) {
            Ok(message) => self.submit(message),
            Err(e) => {
                self.stats.record(Counter::Malformed);
                debug!("Dropped malformed message: {e}");
                Err(e)
            }
        }
    }

    /// Latest published snapshot.
    pub fn latest(&self) -> Arc<EngineSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Watch channel that changes on every tick.
    pub fn snapshots(&self) -> watch::Receiver<Arc<EngineSnapshot>> {
        self.snapshots.clone()
    }

    /// Alert level transitions as they happen.
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Ask the engine to re-sample the audio baseline.
    pub async fn calibrate(&self) -> Result<Baseline, CalibrationRequestError> {
        let rx = self.request_calibration()?;
        rx.await
            .map_err(|_| CalibrationRequestError::Stopped)?
            .map_err(CalibrationRequestError::Failed)
    }

    /// Blocking variant of [`EngineClient::calibrate`]. Must not be called
    /// from inside an async runtime.
    pub fn calibrate_blocking(&self) -> Result<Baseline, CalibrationRequestError> {
        let rx = self.request_calibration()?;
        rx.blocking_recv()
            .map_err(|_| CalibrationRequestError::Stopped)?
            .map_err(CalibrationRequestError::Failed)
    }

    fn request_calibration(
        &self,
    ) -> Result<oneshot::Receiver<Result<Baseline, CalibrationError>>, CalibrationRequestError>
    {
        let (reply, rx) = oneshot::channel();
        match self.tx.try_send(EngineCommand::Calibrate(reply)) {
            Ok(()) => Ok(rx),
            Err(TrySendError::Full(_)) => Err(CalibrationRequestError::Busy),
            Err(TrySendError::Disconnected(_)) => Err(CalibrationRequestError::Stopped),
        }
    }
}

/// Failure of a calibration request.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationRequestError {
    Failed(CalibrationError),
    /// The engine queue is full; retry later
    Busy,
    Stopped,
}

impl std::fmt::Display for CalibrationRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationRequestError::Failed(e) => write!(f, "calibration failed: {e}"),
            CalibrationRequestError::Busy => write!(f, "engine queue is full"),
            CalibrationRequestError::Stopped => write!(f, "engine is not running"),
        }
    }
}

impl std::error::Error for CalibrationRequestError {}

/// Owner of the engine thread.
pub struct EngineHandle {
    client: EngineClient,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Start the engine thread. The first tick runs before this returns so
    /// a snapshot is always available.
    pub fn spawn(mut engine: Engine, options: RuntimeOptions) -> std::io::Result<Self> {
        let (tx, rx) = bounded(options.queue_capacity.max(1));
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);

        let first = engine.tick(Utc::now());
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(first.snapshot));

        let stats = options.stats;
        let client = EngineClient {
            tx,
            snapshots: snapshot_rx,
            transitions: transitions.clone(),
            stats: stats.clone(),
        };

        let mut worker = Worker {
            engine,
            stats,
            snapshots: snapshot_tx,
            transitions,
            broadcaster: options.broadcaster,
            baseline_path: options.baseline_path,
        };

        let thread = thread::Builder::new()
            .name("stampede-engine".to_string())
            .spawn(move || worker.run(rx))?;

        Ok(Self {
            client,
            thread: Some(thread),
        })
    }

    pub fn client(&self) -> EngineClient {
        self.client.clone()
    }

    pub fn submit(&self, message: IngressMessage) -> Result<(), IngestError> {
        self.client.submit(message)
    }

    pub fn latest(&self) -> Arc<EngineSnapshot> {
        self.client.latest()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.client.subscribe()
    }

    /// Stop the engine after a final tick and return the final snapshot.
    pub fn shutdown(mut self) -> Arc<EngineSnapshot> {
        self.stop();
        self.client.latest()
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.client.tx.send(EngineCommand::Shutdown);
            if thread.join().is_err() {
                warn!("Engine thread panicked during shutdown");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    engine: Engine,
    stats: SharedStats,
    snapshots: watch::Sender<Arc<EngineSnapshot>>,
    transitions: broadcast::Sender<Transition>,
    broadcaster: Option<AlertBroadcaster>,
    baseline_path: Option<PathBuf>,
}

impl Worker {
    fn run(&mut self, rx: crossbeam_channel::Receiver<EngineCommand>) {
        let interval = self.engine.config().tick_interval;
        let mut next_tick = Instant::now() + interval;
        info!("Engine loop started ({}ms ticks)", interval.as_millis());

        loop {
            let wait = next_tick.saturating_duration_since(Instant::now());
            match rx.recv_timeout(wait) {
                Ok(EngineCommand::Ingest(message)) => self.ingest(message),
                Ok(EngineCommand::Calibrate(reply)) => {
                    let result = self.engine.calibrate(Utc::now());
                    match result {
                        Ok(ref baseline) => {
                            self.stats.record(Counter::CalibrationsOk);
                            self.persist(baseline);
                        }
                        Err(_) => self.stats.record(Counter::CalibrationsFailed),
                    }
                    let _ = reply.send(result);
                }
                Ok(EngineCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    self.tick();
                    info!("Engine loop stopped");
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            let now = Instant::now();
            if now >= next_tick {
                self.tick();
                next_tick += interval;
                if next_tick <= now {
                    // fell behind; skip the missed ticks
                    next_tick = now + interval;
                }
            }
        }
    }

    fn persist(&self, baseline: &Baseline) {
        let Some(ref path) = self.baseline_path else {
            return;
        };
        match baseline.save(path) {
            Ok(()) => debug!("Baseline saved to {}", path.display()),
            Err(e) => warn!("Failed to save baseline to {}: {e}", path.display()),
        }
    }

    fn ingest(&mut self, message: IngressMessage) {
        match self.engine.ingest(message, Utc::now()) {
            Ok(IngestOutcome::Accepted) => self.stats.record(Counter::ReadingsAccepted),
            Ok(IngestOutcome::Duplicate) => self.stats.record(Counter::Duplicates),
            Ok(IngestOutcome::TooOld) => self.stats.record(Counter::TooOld),
            Ok(IngestOutcome::Heartbeat) => self.stats.record(Counter::Heartbeats),
            Err(IngestError::UnknownNode(id)) => {
                self.stats.record(Counter::UnknownNode);
                debug!("Dropped message from unknown node {id}");
            }
            Err(e) => {
                self.stats.record(Counter::Malformed);
                debug!("Dropped message: {e}");
            }
        }
    }

    fn tick(&mut self) {
        let output = self.engine.tick(Utc::now());
        self.stats.record(Counter::Ticks);

        if let Some(ref mut broadcaster) = self.broadcaster {
            broadcaster.on_tick(output.snapshot.alert.level);
        }
        self.snapshots.send_replace(Arc::new(output.snapshot));
        self.stats.record(Counter::SnapshotsPublished);

        // subscribers read the snapshot that carries this transition
        if let Some(transition) = output.transition {
            let _ = self.transitions.send(transition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ingest::types::NodeReading;
    use crate::stats::create_shared_stats;
    use std::time::Duration;

    fn spawn(tick_ms: u64, queue_capacity: usize) -> EngineHandle {
        let config = EngineConfig {
            tick_interval: Duration::from_millis(tick_ms),
            ..EngineConfig::default()
        };
        EngineHandle::spawn(
            Engine::new(config).unwrap(),
            RuntimeOptions {
                queue_capacity,
                stats: create_shared_stats(),
                broadcaster: None,
                baseline_path: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_snapshot_available_immediately() {
        let handle = spawn(50, 16);
        assert_eq!(handle.latest().sequence, 1);
    }

    #[test]
    fn test_ticks_without_traffic() {
        let handle = spawn(20, 16);
        std::thread::sleep(Duration::from_millis(200));
        assert!(handle.latest().sequence > 2);
    }

    #[test]
    fn test_ingest_and_shutdown_flushes_final_snapshot() {
        let handle = spawn(1000, 16);
        let client = handle.client();
        let reading = NodeReading::new("NODE_A", Utc::now())
            .with_distance(120.0)
            .with_motion(true);
        client.submit(reading.into()).unwrap();

        let last = handle.shutdown();
        assert!(last.nodes["NODE_A"].online);
        assert_eq!(client.stats().get(Counter::ReadingsAccepted), 1);
        assert_eq!(client.submit_bytes(br#"{"id":"NODE_A","pir":1}"#), Err(IngestError::Stopped));
    }

    #[test]
    fn test_malformed_bytes_counted() {
        let handle = spawn(1000, 16);
        let client = handle.client();
        assert!(client.submit_bytes(b"{garbage").is_err());
        assert_eq!(client.stats().get(Counter::Malformed), 1);
    }

    #[test]
    fn test_calibration_failure_reported() {
        let handle = spawn(1000, 16);
        let result = handle.client().calibrate_blocking();
        assert_eq!(
            result,
            Err(CalibrationRequestError::Failed(CalibrationError::NoSamples))
        );
        assert_eq!(handle.client().stats().get(Counter::CalibrationsFailed), 1);
    }

    #[test]
    fn test_successful_calibration_is_saved() {
        let path = std::env::temp_dir().join(format!(
            "stampede-shield-runtime-{}.json",
            uuid::Uuid::new_v4()
        ));
        let handle = EngineHandle::spawn(
            Engine::new(EngineConfig::default()).unwrap(),
            RuntimeOptions {
                queue_capacity: 16,
                stats: create_shared_stats(),
                broadcaster: None,
                baseline_path: Some(path.clone()),
            },
        )
        .unwrap();
        let client = handle.client();
        for _ in 0..3 {
            let reading = NodeReading::new("NODE_C", Utc::now())
                .with_distance(390.0)
                .with_audio(80.0);
            client.submit(reading.into()).unwrap();
        }

        let baseline = client.calibrate_blocking().unwrap();
        assert!((baseline.audio_baseline - 80.0).abs() < 1e-9);
        assert_eq!(Baseline::load(&path).unwrap(), Some(baseline));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_calibration_on_full_queue_is_busy() {
        let (tx, _rx) = bounded(1);
        let first = Engine::new(EngineConfig::default())
            .unwrap()
            .tick(Utc::now());
        let (_snapshot_tx, snapshots) = watch::channel(Arc::new(first.snapshot));
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let client = EngineClient {
            tx,
            snapshots,
            transitions,
            stats: create_shared_stats(),
        };

        client.tx.try_send(EngineCommand::Shutdown).unwrap();
        assert_eq!(
            client.calibrate_blocking(),
            Err(CalibrationRequestError::Busy)
        );
    }
}
