//! WebSocket adapter.
//!
//! Connections start as HTTP/1. An `Upgrade: websocket` request completes
//! the handshake and the connection becomes a frame session: text and binary
//! frames are dispatched one at a time in arrival order, control frames are
//! answered here and never reach the dispatch core.

pub mod frame;
pub mod handshake;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::dispatch::{ConnectionInfo, Context, Engine, Inbound, Protocol, ResponseSink};
use crate::error::DispatchError;
use crate::http::connection::{Connection, Upgrade};
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::server::{Adapter, ListenOptions, SharedWriter, Shutdown, ShutdownSignal, bind, spawn_accept_loop};

pub use frame::{Frame, Opcode};

/// Close status sent when the server shuts down.
const GOING_AWAY: u16 = 1001;
/// Close status sent after a malformed frame.
const PROTOCOL_ERROR: u16 = 1002;

#[derive(Default)]
pub struct WebSocketAdapter {
    shutdown: Shutdown,
}

impl WebSocketAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Adapter for WebSocketAdapter {
    async fn listen(&self, engine: Arc<Engine>, port: u16, options: &ListenOptions) -> anyhow::Result<SocketAddr> {
        engine.install_write_back();

        let listener = bind(&options.host, port).await?;
        let addr = listener.local_addr()?;
        let max_frame_len = options.max_frame_len;

        spawn_accept_loop(listener, &self.shutdown, "ws", move |socket, peer, signal| {
            let engine = Arc::clone(&engine);
            serve_connection(engine, socket, peer, signal, max_frame_len)
        });

        Ok(addr)
    }

    fn close(&self) {
        self.shutdown.trigger();
    }
}

async fn serve_connection(
    engine: Arc<Engine>,
    socket: TcpStream,
    peer: SocketAddr,
    signal: ShutdownSignal,
    max_frame_len: usize,
) -> anyhow::Result<()> {
    let conn = Connection::new(Arc::clone(&engine), socket, peer, signal.clone())?
        .with_upgrade()
        .max_body(max_frame_len);

    let Some(upgrade) = conn.run().await? else {
        return Ok(());
    };

    let Some(accept) = handshake::accept_for(&upgrade.request) else {
        debug!(protocol = "ws", %peer, "Upgrade without a valid key");
        write_response(&upgrade.writer, &Response::bad_request()).await?;
        engine.pool().release_buffer(upgrade.scratch);
        return Ok(());
    };

    write_response(&upgrade.writer, &Response::switching_protocols(&accept)).await?;
    info!(protocol = "ws", %peer, path = %upgrade.request.path, "Upgraded");

    Session::new(engine, upgrade, signal, max_frame_len).run().await
}

async fn write_response(writer: &SharedWriter, response: &Response) -> anyhow::Result<()> {
    let mut writer = writer.lock().await;
    ResponseWriter::new(response).write_to_stream(&mut *writer).await
}

async fn write_frame(writer: &SharedWriter, frame: &Frame) -> anyhow::Result<()> {
    let mut out = BytesMut::new();
    frame::encode(frame, &mut out);

    let mut writer = writer.lock().await;
    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}

/// Replies to a data frame with a frame of the same opcode.
pub struct WsSink {
    writer: SharedWriter,
    opcode: Opcode,
}

#[async_trait]
impl ResponseSink for WsSink {
    async fn send(&self, ctx: &Context) -> anyhow::Result<()> {
        // Messages need not be answered
        if ctx.response_body.is_empty() {
            return Ok(());
        }
        let frame = Frame::new(self.opcode, ctx.response_body.to_bytes());
        write_frame(&self.writer, &frame).await
    }
}

/// Post-handshake frame loop.
struct Session {
    engine: Arc<Engine>,
    upgrade: Upgrade,
    signal: ShutdownSignal,
    max_frame_len: usize,
}

enum Flow {
    Continue,
    Close,
}

impl Session {
    fn new(engine: Arc<Engine>, upgrade: Upgrade, signal: ShutdownSignal, max_frame_len: usize) -> Self {
        Self {
            engine,
            upgrade,
            signal,
            max_frame_len,
        }
    }

    async fn run(mut self) -> anyhow::Result<()> {
        let result = self.read_frames().await;
        self.engine.pool().release_buffer(self.upgrade.scratch);
        result
    }

    async fn read_frames(&mut self) -> anyhow::Result<()> {
        let peer = self.upgrade.info.peer;

        loop {
            loop {
                let frame = match frame::decode(&mut self.upgrade.buffer, self.max_frame_len) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(protocol = "ws", %peer, error = %e, "Closing session");
                        let _ = write_frame(&self.upgrade.writer, &Frame::close(PROTOCOL_ERROR)).await;
                        return Err(e.into());
                    }
                };

                if let Flow::Close = self.on_frame(frame).await? {
                    return Ok(());
                }
            }

            if self.signal.is_triggered() {
                return self.going_away().await;
            }

            let n = tokio::select! {
                read = self.upgrade.reader.read_buf(&mut self.upgrade.scratch) => read?,
                _ = self.signal.recv() => return self.going_away().await,
            };

            if n == 0 {
                debug!(protocol = "ws", %peer, "Peer closed");
                return Ok(());
            }

            self.upgrade.buffer.extend_from_slice(&self.upgrade.scratch[..]);
            self.upgrade.scratch.clear();
        }
    }

    async fn on_frame(&self, frame: Frame) -> anyhow::Result<Flow> {
        let peer = self.upgrade.info.peer;

        match frame.opcode {
            Opcode::Text | Opcode::Binary if frame.fin => {
                self.dispatch(frame).await?;
            }
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                debug!(protocol = "ws", %peer, "Dropping fragmented message");
            }
            Opcode::Ping => {
                write_frame(&self.upgrade.writer, &Frame::new(Opcode::Pong, frame.payload)).await?;
            }
            Opcode::Pong => {}
            Opcode::Close => {
                write_frame(&self.upgrade.writer, &Frame::new(Opcode::Close, frame.payload)).await?;
                debug!(protocol = "ws", %peer, "Close handshake");
                return Ok(Flow::Close);
            }
        }

        Ok(Flow::Continue)
    }

    async fn dispatch(&self, frame: Frame) -> anyhow::Result<()> {
        let sink: Arc<dyn ResponseSink> = Arc::new(WsSink {
            writer: Arc::clone(&self.upgrade.writer),
            opcode: frame.opcode,
        });
        let info: ConnectionInfo = self.upgrade.info;

        match self
            .engine
            .handle_request(Protocol::WebSocket, Inbound::payload(frame.payload), Some(sink), Some(info))
            .await
        {
            Ok(()) => Ok(()),
            Err(DispatchError::CircuitOpen) => {
                debug!(protocol = "ws", peer = %info.peer, "Message dropped, circuit open");
                Ok(())
            }
            Err(DispatchError::Pipeline(e)) => {
                warn!(protocol = "ws", peer = %info.peer, error = %e, "Message abandoned");
                Ok(())
            }
        }
    }

    async fn going_away(&self) -> anyhow::Result<()> {
        write_frame(&self.upgrade.writer, &Frame::close(GOING_AWAY)).await
    }
}
