//! Length-framed TCP adapter.
//!
//! Each message is `[u32 big-endian length][payload]`. Reads extend a
//! per-connection buffer and every complete frame in it is dispatched, in
//! arrival order, before the next read. A trailing partial frame stays in the
//! buffer.

pub mod codec;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::dispatch::{ConnectionInfo, Context, Engine, Inbound, Protocol, ResponseSink};
use crate::error::DispatchError;
use crate::server::{Adapter, ListenOptions, SharedWriter, Shutdown, ShutdownSignal, bind, spawn_accept_loop};

pub use codec::LengthDelimited;

#[derive(Default)]
pub struct TcpAdapter {
    shutdown: Shutdown,
}

impl TcpAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Adapter for TcpAdapter {
    async fn listen(&self, engine: Arc<Engine>, port: u16, options: &ListenOptions) -> anyhow::Result<SocketAddr> {
        engine.install_write_back();

        let listener = bind(&options.host, port).await?;
        let addr = listener.local_addr()?;
        let codec = LengthDelimited::new(options.max_frame_len);
        let framed = options.frame_responses;

        spawn_accept_loop(listener, &self.shutdown, "tcp", move |socket, peer, signal| {
            let engine = Arc::clone(&engine);
            serve_connection(engine, socket, peer, signal, codec, framed)
        });

        Ok(addr)
    }

    fn close(&self) {
        self.shutdown.trigger();
    }
}

/// Writes the response body, length-prefixed unless raw writes were asked for.
pub struct TcpSink {
    writer: SharedWriter,
    codec: Option<LengthDelimited>,
}

impl TcpSink {
    pub fn new(writer: SharedWriter, codec: Option<LengthDelimited>) -> Self {
        Self { writer, codec }
    }
}

#[async_trait]
impl ResponseSink for TcpSink {
    async fn send(&self, ctx: &Context) -> anyhow::Result<()> {
        let body = ctx.response_body.as_bytes();

        let mut writer = self.writer.lock().await;
        match &self.codec {
            Some(codec) => {
                let mut out = BytesMut::new();
                codec.encode(body, &mut out)?;
                writer.write_all(&out).await?;
            }
            None => writer.write_all(body).await?,
        }
        writer.flush().await?;
        Ok(())
    }
}

async fn serve_connection(
    engine: Arc<Engine>,
    socket: TcpStream,
    peer: SocketAddr,
    signal: ShutdownSignal,
    codec: LengthDelimited,
    framed: bool,
) -> anyhow::Result<()> {
    let info = ConnectionInfo {
        peer,
        local: socket.local_addr().ok(),
    };
    let (reader, writer) = socket.into_split();
    let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));
    let sink: Arc<dyn ResponseSink> = Arc::new(TcpSink::new(writer, framed.then_some(codec)));

    let mut scratch = engine.pool().acquire_buffer()?;
    let result = read_frames(&engine, reader, &mut scratch, signal, codec, sink, info).await;
    engine.pool().release_buffer(scratch);
    result
}

async fn read_frames(
    engine: &Engine,
    mut reader: tokio::net::tcp::OwnedReadHalf,
    scratch: &mut BytesMut,
    mut signal: ShutdownSignal,
    codec: LengthDelimited,
    sink: Arc<dyn ResponseSink>,
    info: ConnectionInfo,
) -> anyhow::Result<()> {
    let mut buffer = BytesMut::new();

    loop {
        // Drain every complete frame before reading again
        loop {
            let frame = match codec.decode(&mut buffer) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(protocol = "tcp", peer = %info.peer, error = %e, "Closing connection");
                    return Err(e.into());
                }
            };

            debug!(protocol = "tcp", peer = %info.peer, len = frame.len(), "Frame received");
            match engine
                .handle_request(Protocol::Tcp, Inbound::payload(frame), Some(Arc::clone(&sink)), Some(info))
                .await
            {
                Ok(()) => {}
                Err(DispatchError::CircuitOpen) => {
                    debug!(protocol = "tcp", peer = %info.peer, "Frame dropped, circuit open");
                }
                Err(DispatchError::Pipeline(e)) => {
                    // The frame is abandoned; later frames are still served
                    warn!(protocol = "tcp", peer = %info.peer, error = %e, "Frame abandoned");
                }
            }
        }

        if signal.is_triggered() {
            break;
        }

        let n = tokio::select! {
            read = reader.read_buf(&mut *scratch) => read?,
            _ = signal.recv() => break,
        };

        if n == 0 {
            if !buffer.is_empty() {
                debug!(protocol = "tcp", peer = %info.peer, pending = buffer.len(), "Peer closed mid-frame");
            }
            break;
        }

        buffer.extend_from_slice(&scratch[..]);
        scratch.clear();
    }

    Ok(())
}
