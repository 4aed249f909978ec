use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

/// Wire transport a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http1,
    Http2,
    Tcp,
    Udp,
    WebSocket,
}

impl Protocol {
    /// Registry name of the transport (`"http"`, `"http2"`, `"tcp"`, `"udp"`, `"ws"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http1 => "http",
            Protocol::Http2 => "http2",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::WebSocket => "ws",
        }
    }

    /// Whether the transport carries a method, a path and headers of its own.
    pub fn is_header_bearing(&self) -> bool {
        matches!(self, Protocol::Http1 | Protocol::Http2)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response body set by handlers and hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Text(s) => s.is_empty(),
            Body::Bytes(b) => b.is_empty(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Empty => &[],
            Body::Text(s) => s.as_bytes(),
            Body::Bytes(b) => b,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            Body::Bytes(b) => b.clone(),
        }
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Text(s.to_string())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Text(s)
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Bytes(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(b))
    }
}

/// Addresses of the connection a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub peer: SocketAddr,
    pub local: Option<SocketAddr>,
}

/// Writes the response fields of a context back on the originating connection.
///
/// Implemented by every adapter. The dispatch core never calls a sink itself;
/// the write happens from a response-ready hook.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn send(&self, ctx: &Context) -> anyhow::Result<()>;
}

/// Server push capability (HTTP/2 only).
pub trait PushHandle: Send + Sync {
    fn push(&self, path: &str, headers: &HashMap<String, String>, body: Bytes) -> anyhow::Result<()>;
}

/// Normalized request handed by an adapter to [`Engine::handle_request`].
///
/// [`Engine::handle_request`]: crate::dispatch::Engine::handle_request
#[derive(Default)]
pub struct Inbound {
    pub method: Option<String>,
    pub path: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub push: Option<Arc<dyn PushHandle>>,
}

impl Inbound {
    /// Request carrying only a payload (TCP, UDP and WebSocket messages).
    pub fn payload(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }
}

/// Per-request mutable record.
///
/// Owned by the dispatch core for the duration of one request and lent to
/// hooks and handlers as `&mut Context`. Records are recycled through the
/// [`ContextPool`](crate::dispatch::ContextPool).
pub struct Context {
    pub sink: Option<Arc<dyn ResponseSink>>,
    pub connection: Option<ConnectionInfo>,
    pub push: Option<Arc<dyn PushHandle>>,
    /// Captured path-parameter values, left to right.
    pub params: Vec<String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
    pub protocol: Option<Protocol>,
    pub method: Option<String>,
    /// Request target as received, query component included.
    pub path: Option<String>,
    pub headers: HashMap<String, String>,
    pub status: u16,
    pub response_headers: HashMap<String, String>,
    pub response_body: Body,
    pub fault: Option<anyhow::Error>,
    pub extensions: ::http::Extensions,
    generation: u64,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            sink: None,
            connection: None,
            push: None,
            params: Vec::new(),
            query: HashMap::new(),
            body: Bytes::new(),
            protocol: None,
            method: None,
            path: None,
            headers: HashMap::new(),
            status: 200,
            response_headers: HashMap::new(),
            response_body: Body::Empty,
            fault: None,
            extensions: ::http::Extensions::new(),
            generation: 0,
        }
    }

    /// Number of times this record has been reset for reuse.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Restores every field to its default, keeping allocated capacity.
    pub fn reset(&mut self) {
        self.sink = None;
        self.connection = None;
        self.push = None;
        self.params.clear();
        self.query.clear();
        self.body = Bytes::new();
        self.protocol = None;
        self.method = None;
        self.path = None;
        self.headers.clear();
        self.status = 200;
        self.response_headers.clear();
        self.response_body = Body::Empty;
        self.fault = None;
        self.extensions.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    /// Whether every mutable field holds its default value.
    pub fn is_pristine(&self) -> bool {
        self.sink.is_none()
            && self.connection.is_none()
            && self.push.is_none()
            && self.params.is_empty()
            && self.query.is_empty()
            && self.body.is_empty()
            && self.protocol.is_none()
            && self.method.is_none()
            && self.path.is_none()
            && self.headers.is_empty()
            && self.status == 200
            && self.response_headers.is_empty()
            && self.response_body == Body::Empty
            && self.fault.is_none()
            && self.extensions.is_empty()
    }

    /// Path without its query component.
    pub fn route_path(&self) -> Option<&str> {
        self.path
            .as_deref()
            .map(|p| p.split_once('?').map_or(p, |(path, _)| path))
    }

    /// Case-insensitive request header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.response_headers.insert(key.into(), value.into());
        self
    }

    pub fn set_body(&mut self, body: impl Into<Body>) -> &mut Self {
        self.response_body = body.into();
        self
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("protocol", &self.protocol)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("status", &self.status)
            .field("fault", &self.fault)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
