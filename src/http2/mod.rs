//! HTTP/2 adapter over `h2`.
//!
//! Every accepted socket runs one `h2` server connection. Each stream is
//! served on its own task: the body is collected, the request dispatched,
//! and the response written back from the write-back hook. The stream's
//! `SendResponse` is shared between the sink and the push handle.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use h2::RecvStream;
use h2::server::SendResponse;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::dispatch::{ConnectionInfo, Context, Engine, Inbound, Protocol, PushHandle, ResponseSink};
use crate::error::DispatchError;
use crate::server::{Adapter, ListenOptions, Shutdown, ShutdownSignal, bind, spawn_accept_loop};

type SharedRespond = Arc<Mutex<SendResponse<Bytes>>>;

/// Headers that are connection-specific in HTTP/1 and forbidden in HTTP/2.
const HOP_BY_HOP: [&str; 5] = ["connection", "keep-alive", "proxy-connection", "transfer-encoding", "upgrade"];

#[derive(Default)]
pub struct Http2Adapter {
    shutdown: Shutdown,
}

impl Http2Adapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Adapter for Http2Adapter {
    async fn listen(&self, engine: Arc<Engine>, port: u16, options: &ListenOptions) -> anyhow::Result<SocketAddr> {
        engine.install_write_back();

        let listener = bind(&options.host, port).await?;
        let addr = listener.local_addr()?;
        let max_body = options.max_frame_len;

        spawn_accept_loop(listener, &self.shutdown, "http2", move |socket, peer, signal| {
            let engine = Arc::clone(&engine);
            serve_connection(engine, socket, peer, signal, max_body)
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
    mut signal: ShutdownSignal,
    max_body: usize,
) -> anyhow::Result<()> {
    let info = ConnectionInfo {
        peer,
        local: socket.local_addr().ok(),
    };
    let mut conn = h2::server::handshake(socket).await?;
    let mut draining = false;

    loop {
        tokio::select! {
            next = conn.accept() => match next {
                Some(Ok((request, respond))) => {
                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move {
                        if let Err(e) = serve_stream(engine, request, respond, info, max_body).await {
                            debug!(protocol = "http2", %peer, error = %e, "Stream error");
                        }
                    });
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            _ = signal.recv(), if !draining => {
                // GOAWAY; in-flight streams keep running until they finish
                conn.graceful_shutdown();
                draining = true;
            }
        }
    }

    Ok(())
}

async fn serve_stream(
    engine: Arc<Engine>,
    request: ::http::Request<RecvStream>,
    respond: SendResponse<Bytes>,
    info: ConnectionInfo,
    max_body: usize,
) -> anyhow::Result<()> {
    let (parts, mut stream) = request.into_parts();

    let mut body = BytesMut::new();
    while let Some(chunk) = stream.data().await {
        let chunk = chunk?;
        stream.flow_control().release_capacity(chunk.len())?;
        if body.len() + chunk.len() > max_body {
            anyhow::bail!("HTTP/2 request body exceeds {max_body} bytes");
        }
        body.extend_from_slice(&chunk);
    }

    let headers: HashMap<String, String> = parts
        .headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let authority = parts
        .uri
        .authority()
        .map(|a| a.as_str().to_string())
        .or_else(|| headers.get("host").cloned())
        .unwrap_or_else(|| info.local.map(|a| a.to_string()).unwrap_or_default());

    let respond: SharedRespond = Arc::new(Mutex::new(respond));
    let push = H2Push {
        respond: Arc::clone(&respond),
        scheme: parts.uri.scheme_str().unwrap_or("http").to_string(),
        authority,
    };
    let sink = H2Sink {
        respond: Arc::clone(&respond),
    };

    let inbound = Inbound {
        method: Some(parts.method.as_str().to_string()),
        path: Some(path),
        headers,
        body: body.freeze(),
        push: Some(Arc::new(push)),
    };

    match engine
        .handle_request(Protocol::Http2, inbound, Some(Arc::new(sink)), Some(info))
        .await
    {
        Ok(()) => Ok(()),
        Err(DispatchError::CircuitOpen) => {
            let response = ::http::Response::builder().status(503).body(())?;
            respond.lock().send_response(response, true)?;
            Ok(())
        }
        Err(DispatchError::Pipeline(e)) => {
            respond.lock().send_reset(h2::Reason::INTERNAL_ERROR);
            Err(e)
        }
    }
}

fn response_head(status: u16, headers: &HashMap<String, String>) -> anyhow::Result<::http::Response<()>> {
    let mut builder = ::http::Response::builder().status(status);
    for (k, v) in headers {
        if HOP_BY_HOP.iter().any(|h| k.eq_ignore_ascii_case(h)) {
            continue;
        }
        builder = builder.header(k.as_str(), v.as_str());
    }
    Ok(builder.body(())?)
}

/// Sends the context's response on its stream.
pub struct H2Sink {
    respond: SharedRespond,
}

#[async_trait]
impl ResponseSink for H2Sink {
    async fn send(&self, ctx: &Context) -> anyhow::Result<()> {
        let head = response_head(ctx.status, &ctx.response_headers)?;
        let body = ctx.response_body.to_bytes();
        let end_of_stream = body.is_empty() || ctx.method.as_deref() == Some("HEAD");

        let mut respond = self.respond.lock();
        let mut send = respond.send_response(head, end_of_stream)?;
        if !end_of_stream {
            send.send_data(body, true)?;
        }
        Ok(())
    }
}

/// Server push for the stream a request arrived on.
///
/// Pushes must be issued before the response itself is sent, which holds for
/// any push made from a handler or a request-received hook.
pub struct H2Push {
    respond: SharedRespond,
    scheme: String,
    authority: String,
}

impl PushHandle for H2Push {
    fn push(&self, path: &str, headers: &HashMap<String, String>, body: Bytes) -> anyhow::Result<()> {
        let uri = format!("{}://{}{}", self.scheme, self.authority, path);
        let request = ::http::Request::builder()
            .method(::http::Method::GET)
            .uri(uri)
            .body(())?;

        let mut pushed = match self.respond.lock().push_request(request) {
            Ok(pushed) => pushed,
            Err(e) => {
                warn!(protocol = "http2", path, error = %e, "Push rejected");
                return Err(e.into());
            }
        };

        let head = response_head(200, headers)?;
        let end_of_stream = body.is_empty();
        let mut send = pushed.send_response(head, end_of_stream)?;
        if !end_of_stream {
            send.send_data(body, true)?;
        }
        Ok(())
    }
}
