//! Ingress from the sensor nodes.
//!
//! Nodes publish JSON datagrams over UDP. The same payloads are accepted
//! over HTTP when the `server` feature is enabled.

pub mod types;
pub mod udp;

pub use types::{parse_message, Heartbeat, IngestError, IngressMessage, NodeReading};
pub use udp::UdpIngress;
