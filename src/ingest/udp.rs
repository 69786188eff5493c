//! UDP ingress for sensor node datagrams.

use crate::runtime::EngineClient;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Largest datagram a node sends, with headroom.
const MAX_DATAGRAM: usize = 2048;

/// Bound UDP listener feeding the engine.
pub struct UdpIngress {
    socket: UdpSocket,
}

impl UdpIngress {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("UDP listening on {} for node readings", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive datagrams until `shutdown` fires or its sender is dropped.
    pub async fn run(self, client: EngineClient, mut shutdown: oneshot::Receiver<()>) {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("UDP ingress stopped");
                    return;
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, src)) => {
                        if let Err(e) = client.submit_bytes(&buf[..len]) {
                            debug!("Datagram from {src} not queued: {e}");
                        }
                    }
                    Err(e) => warn!("UDP receive error: {e}"),
                },
            }
        }
    }
}
