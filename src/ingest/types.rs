//! Wire types for messages arriving from corridor sensor nodes.
//!
//! Nodes send compact JSON datagrams. Both the short firmware keys
//! (`id`, `dist`, `pir`, `mic`, `uptime`) and the long field names are
//! accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One sample from a sensor node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReading {
    /// Id of the reporting node
    #[serde(alias = "id")]
    pub node_id: String,
    /// Sample time; stamped on arrival when the node omits it
    #[serde(default = "Utc::now", alias = "ts")]
    pub timestamp: DateTime<Utc>,
    /// Ultrasonic distance in centimetres, absent on a failed echo
    #[serde(default, alias = "dist")]
    pub distance_cm: Option<f64>,
    /// PIR motion flag
    #[serde(alias = "pir", deserialize_with = "flag::deserialize")]
    pub motion_active: bool,
    /// Raw microphone RMS, only present on the microphone node
    #[serde(default, alias = "mic", skip_serializing_if = "Option::is_none")]
    pub audio_rms: Option<f64>,
}

impl NodeReading {
    pub fn new(node_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.into(),
            timestamp,
            distance_cm: None,
            motion_active: false,
            audio_rms: None,
        }
    }

    pub fn with_distance(mut self, distance_cm: f64) -> Self {
        self.distance_cm = Some(distance_cm);
        self
    }

    pub fn with_motion(mut self, motion_active: bool) -> Self {
        self.motion_active = motion_active;
        self
    }

    pub fn with_audio(mut self, audio_rms: f64) -> Self {
        self.audio_rms = Some(audio_rms);
        self
    }

    /// Drop physically impossible values.
    ///
    /// Returns the cleaned reading and whether the distance was discarded
    /// as a sensor fault.
    pub fn sanitized(mut self, max_range_cm: f64) -> (Self, bool) {
        let mut fault = false;
        if let Some(d) = self.distance_cm {
            if !d.is_finite() || d < 0.0 || d > max_range_cm {
                self.distance_cm = None;
                fault = true;
            }
        }
        if let Some(a) = self.audio_rms {
            if !a.is_finite() || a < 0.0 {
                self.audio_rms = None;
            }
        }
        (self, fault)
    }
}

/// Periodic liveness message from a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(alias = "id")]
    pub node_id: String,
    #[serde(default = "Utc::now", alias = "ts")]
    pub timestamp: DateTime<Utc>,
    /// Seconds since the node booted
    #[serde(alias = "uptime")]
    pub uptime_secs: u64,
}

impl Heartbeat {
    pub fn new(node_id: impl Into<String>, timestamp: DateTime<Utc>, uptime_secs: u64) -> Self {
        Self {
            node_id: node_id.into(),
            timestamp,
            uptime_secs,
        }
    }
}

/// Any message a node may send.
///
/// A datagram carrying a motion flag is a reading; one carrying only an
/// uptime is a heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IngressMessage {
    Reading(NodeReading),
    Heartbeat(Heartbeat),
}

impl IngressMessage {
    pub fn node_id(&self) -> &str {
        match self {
            IngressMessage::Reading(r) => &r.node_id,
            IngressMessage::Heartbeat(h) => &h.node_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            IngressMessage::Reading(r) => r.timestamp,
            IngressMessage::Heartbeat(h) => h.timestamp,
        }
    }
}

impl From<NodeReading> for IngressMessage {
    fn from(reading: NodeReading) -> Self {
        IngressMessage::Reading(reading)
    }
}

impl From<Heartbeat> for IngressMessage {
    fn from(heartbeat: Heartbeat) -> Self {
        IngressMessage::Heartbeat(heartbeat)
    }
}

/// Errors raised while decoding or routing an ingress message.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    /// The payload is not a valid node message
    Malformed(String),
    /// The node id is not bound to any zone
    UnknownNode(String),
    /// The engine queue is full and the message was dropped
    QueueFull,
    /// The engine has shut down
    Stopped,
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Malformed(e) => write!(f, "malformed message: {e}"),
            IngestError::UnknownNode(id) => write!(f, "unknown node: {id}"),
            IngestError::QueueFull => write!(f, "engine queue is full"),
            IngestError::Stopped => write!(f, "engine is not running"),
        }
    }
}

impl std::error::Error for IngestError {}

/// Decode a raw datagram or request body.
pub fn parse_message(bytes: &[u8]) -> Result<IngressMessage, IngestError> {
    let message: IngressMessage =
        serde_json::from_slice(bytes).map_err(|e| IngestError::Malformed(e.to_string()))?;

    if message.node_id().trim().is_empty() {
        return Err(IngestError::Malformed("empty node id".to_string()));
    }

    Ok(message)
}

/// Accepts the PIR flag either as a JSON bool or as 0/1.
mod flag {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Flag::deserialize(deserializer)? {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        })
    }
}
