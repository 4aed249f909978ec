use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;

use crate::dispatch::{ConnectionInfo, Context, Engine, Protocol, ResponseSink};
use crate::error::DispatchError;
use crate::http::parser::{ParseError, parse_http_request_limited};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::server::{DEFAULT_MAX_FRAME_LEN, SharedWriter, ShutdownSignal};

/// Writes the context's response as an HTTP/1.1 message.
pub struct Http1Sink {
    writer: SharedWriter,
    keep_alive: bool,
    sent: AtomicBool,
}

impl Http1Sink {
    pub fn new(writer: SharedWriter, keep_alive: bool) -> Self {
        Self {
            writer,
            keep_alive,
            sent: AtomicBool::new(false),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResponseSink for Http1Sink {
    async fn send(&self, ctx: &Context) -> anyhow::Result<()> {
        let mut response = Response::from_context(ctx, self.keep_alive);
        if ctx.method.as_deref() == Some("HEAD") {
            response.body.clear();
        }

        let mut writer = self.writer.lock().await;
        ResponseWriter::new(&response)
            .write_to_stream(&mut *writer)
            .await?;
        self.sent.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A connection whose request asked to switch to WebSocket, handed over with
/// every byte read past the upgrade request.
pub struct Upgrade {
    pub request: Request,
    pub reader: OwnedReadHalf,
    pub writer: SharedWriter,
    pub buffer: BytesMut,
    pub scratch: BytesMut,
    pub info: ConnectionInfo,
}

pub enum ConnectionState {
    Reading,
    Dispatching(Request),
    Closed,
}

pub struct Connection {
    engine: Arc<Engine>,
    reader: OwnedReadHalf,
    writer: SharedWriter,
    buffer: BytesMut,
    scratch: BytesMut,
    info: ConnectionInfo,
    shutdown: ShutdownSignal,
    upgrade: bool,
    max_body: usize,
    state: ConnectionState,
}

impl Connection {
    pub fn new(engine: Arc<Engine>, stream: TcpStream, peer: SocketAddr, shutdown: ShutdownSignal) -> anyhow::Result<Self> {
        let scratch = engine.pool().acquire_buffer()?;
        let info = ConnectionInfo {
            peer,
            local: stream.local_addr().ok(),
        };
        let (reader, writer) = stream.into_split();

        Ok(Self {
            engine,
            reader,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            buffer: BytesMut::with_capacity(4096),
            scratch,
            info,
            shutdown,
            upgrade: false,
            max_body: DEFAULT_MAX_FRAME_LEN,
            state: ConnectionState::Reading,
        })
    }

    /// Hands `Upgrade: websocket` requests back to the caller instead of
    /// dispatching them.
    pub fn with_upgrade(mut self) -> Self {
        self.upgrade = true;
        self
    }

    pub fn max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    pub async fn run(mut self) -> anyhow::Result<Option<Upgrade>> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);
            self.state = match state {
                ConnectionState::Reading => match self.read_request().await? {
                    Some(req) => ConnectionState::Dispatching(req),
                    None => ConnectionState::Closed,
                },

                ConnectionState::Dispatching(req) => {
                    if self.upgrade && req.is_websocket_upgrade() {
                        return Ok(Some(self.into_upgrade(req)));
                    }
                    self.dispatch(req).await
                }

                ConnectionState::Closed => break,
            };
        }

        self.engine.pool().release_buffer(self.scratch);
        Ok(None)
    }

    pub async fn read_request(&mut self) -> anyhow::Result<Option<Request>> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request_limited(&self.buffer, self.max_body) {
                Ok((request, consumed)) => {
                    self.buffer.advance(consumed);
                    return Ok(Some(request));
                }

                Err(ParseError::BodyTooLarge(len)) => {
                    self.reject(Response::bad_request()).await;
                    return Err(anyhow::anyhow!("HTTP body of {} bytes exceeds {}", len, self.max_body));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => {
                    self.reject(Response::bad_request()).await;
                    return Err(anyhow::anyhow!("HTTP parse error: {:?}", e));
                }
            }

            let n = tokio::select! {
                read = self.reader.read_buf(&mut self.scratch) => read?,
                _ = self.shutdown.recv() => return Ok(None),
            };

            if n == 0 {
                // Client closed connection
                return Ok(None);
            }

            self.buffer.extend_from_slice(&self.scratch);
            self.scratch.clear();
        }
    }

    async fn dispatch(&mut self, req: Request) -> ConnectionState {
        let keep_alive = req.keep_alive();
        let sink = Arc::new(Http1Sink::new(Arc::clone(&self.writer), keep_alive));

        let result = self
            .engine
            .handle_request(
                Protocol::Http1,
                req.into_inbound(),
                Some(Arc::clone(&sink) as Arc<dyn ResponseSink>),
                Some(self.info),
            )
            .await;

        match result {
            Ok(()) if sink.is_sent() && keep_alive && !self.shutdown.is_triggered() => {
                ConnectionState::Reading
            }
            Ok(()) => ConnectionState::Closed,
            Err(DispatchError::CircuitOpen) => {
                self.reject(Response::service_unavailable()).await;
                ConnectionState::Closed
            }
            Err(DispatchError::Pipeline(_)) => ConnectionState::Closed,
        }
    }

    /// Best-effort write of an adapter-generated response.
    async fn reject(&self, response: Response) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = ResponseWriter::new(&response).write_to_stream(&mut *writer).await {
            tracing::debug!(peer = %self.info.peer, error = %e, "Failed to write rejection");
        }
    }

    fn into_upgrade(self, request: Request) -> Upgrade {
        Upgrade {
            request,
            reader: self.reader,
            writer: self.writer,
            buffer: self.buffer,
            scratch: self.scratch,
            info: self.info,
        }
    }
}
