//! UDP adapter: one datagram is one request, answered with one datagram to
//! the sender.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::dispatch::{ConnectionInfo, Context, Engine, Inbound, Protocol, ResponseSink};
use crate::server::{Adapter, ListenOptions, Shutdown};

/// Largest datagram received.
pub const MAX_DATAGRAM: usize = 65_535;

#[derive(Default)]
pub struct UdpAdapter {
    shutdown: Shutdown,
}

impl UdpAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Adapter for UdpAdapter {
    async fn listen(&self, engine: Arc<Engine>, port: u16, options: &ListenOptions) -> anyhow::Result<SocketAddr> {
        engine.install_write_back();

        let socket = Arc::new(UdpSocket::bind((options.host.as_str(), port)).await?);
        let addr = socket.local_addr()?;
        let mut signal = self.shutdown.subscribe();

        tokio::spawn(async move {
            info!(protocol = "udp", %addr, "Listening");
            let mut buf = vec![0u8; MAX_DATAGRAM];

            loop {
                let (len, peer) = tokio::select! {
                    received = socket.recv_from(&mut buf) => match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(protocol = "udp", error = %e, "Receive failed");
                            continue;
                        }
                    },
                    _ = signal.recv() => break,
                };

                let payload = Bytes::copy_from_slice(&buf[..len]);
                let sink: Arc<dyn ResponseSink> = Arc::new(UdpSink {
                    socket: Arc::clone(&socket),
                    peer,
                });
                let info = ConnectionInfo {
                    peer,
                    local: Some(addr),
                };
                let engine = Arc::clone(&engine);

                tokio::spawn(async move {
                    if let Err(e) = engine
                        .handle_request(Protocol::Udp, Inbound::payload(payload), Some(sink), Some(info))
                        .await
                    {
                        debug!(protocol = "udp", %peer, error = %e, "Datagram not handled");
                    }
                });
            }

            info!(protocol = "udp", "Listener stopped");
        });

        Ok(addr)
    }

    fn close(&self) {
        self.shutdown.trigger();
    }
}

/// Sends the response body as a single datagram back to the sender.
pub struct UdpSink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

#[async_trait]
impl ResponseSink for UdpSink {
    async fn send(&self, ctx: &Context) -> anyhow::Result<()> {
        self.socket
            .send_to(ctx.response_body.as_bytes(), self.peer)
            .await?;
        Ok(())
    }
}
