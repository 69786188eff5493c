//! Alert-level commands sent back to the sensor nodes.
//!
//! Nodes mirror whatever level they last received, so commands are
//! idempotent and are re-sent periodically to cover lost datagrams.

use crate::core::alert::AlertLevel;
use serde::Serialize;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::{debug, warn};

/// Errors from the firmware command channel.
#[derive(Debug)]
pub enum FirmwareError {
    Io(String),
    Encode(String),
    InvalidAddress(String),
}

impl std::fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FirmwareError::Io(e) => write!(f, "IO error: {e}"),
            FirmwareError::Encode(e) => write!(f, "Encode error: {e}"),
            FirmwareError::InvalidAddress(a) => write!(f, "Invalid address: {a}"),
        }
    }
}

impl std::error::Error for FirmwareError {}

/// Command understood by the node firmware.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetStateCommand {
    pub cmd: &'static str,
    pub level: AlertLevel,
}

impl SetStateCommand {
    pub fn new(level: AlertLevel) -> Self {
        Self {
            cmd: "SET_STATE",
            level,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FirmwareError> {
        serde_json::to_vec(self).map_err(|e| FirmwareError::Encode(e.to_string()))
    }
}

/// Delivers alert levels to the nodes.
pub trait AlertPublisher: Send {
    fn publish(&mut self, level: AlertLevel) -> Result<(), FirmwareError>;
}

/// Sends `SET_STATE` datagrams to a (usually broadcast) address.
pub struct UdpAlertPublisher {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpAlertPublisher {
    pub fn new(target: &str) -> Result<Self, FirmwareError> {
        let target = target
            .to_socket_addrs()
            .map_err(|e| FirmwareError::InvalidAddress(format!("{target}: {e}")))?
            .next()
            .ok_or_else(|| FirmwareError::InvalidAddress(target.to_string()))?;

        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| FirmwareError::Io(e.to_string()))?;
        socket
            .set_broadcast(true)
            .map_err(|e| FirmwareError::Io(e.to_string()))?;

        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl AlertPublisher for UdpAlertPublisher {
    fn publish(&mut self, level: AlertLevel) -> Result<(), FirmwareError> {
        let payload = SetStateCommand::new(level).to_bytes()?;
        self.socket
            .send_to(&payload, self.target)
            .map_err(|e| FirmwareError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Decides when to push the level: on every change and every
/// `rebroadcast_ticks` ticks otherwise.
pub struct AlertBroadcaster {
    publisher: Box<dyn AlertPublisher>,
    rebroadcast_ticks: u64,
    since_last: u64,
    last: Option<AlertLevel>,
}

impl AlertBroadcaster {
    pub fn new(publisher: Box<dyn AlertPublisher>, rebroadcast_ticks: u64) -> Self {
        Self {
            publisher,
            rebroadcast_ticks: rebroadcast_ticks.max(1),
            since_last: 0,
            last: None,
        }
    }

    /// Called once per tick with the current level. Returns whether a
    /// command was sent.
    pub fn on_tick(&mut self, level: AlertLevel) -> bool {
        self.since_last += 1;
        let changed = self.last != Some(level);
        if !changed && self.since_last < self.rebroadcast_ticks {
            return false;
        }

        match self.publisher.publish(level) {
            Ok(()) => debug!("Sent {} to nodes", level),
            // nodes keep their last level; retried on the next rebroadcast
            Err(e) => warn!("Failed to send alert level to nodes: {e}"),
        }
        self.last = Some(level);
        self.since_last = 0;
        true
    }
}
