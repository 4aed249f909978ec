//! Adapter contract shared by every transport.
//!
//! # Responsibilities
//! - Bind a listener and run its accept or receive loop
//! - Translate the wire format into an [`Inbound`] plus a [`ResponseSink`]
//! - Call [`Engine::handle_request`] once per request
//! - Stop accepting and let connection tasks finish on [`Adapter::close`]
//!
//! [`Inbound`]: crate::dispatch::Inbound
//! [`ResponseSink`]: crate::dispatch::ResponseSink

pub mod listener;
pub mod shutdown;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::tcp::OwnedWriteHalf;

use crate::dispatch::{Context, Engine, Hook};

pub use listener::{bind, spawn_accept_loop};
pub use shutdown::{Shutdown, ShutdownSignal};

/// Default largest frame or body accepted from a peer (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 << 20;

/// Write half of a TCP connection shared between the read loop and its sinks.
pub type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenOptions {
    /// Address to bind.
    pub host: String,
    /// Largest frame (TCP, WebSocket) or body (HTTP) accepted.
    pub max_frame_len: usize,
    /// Prefix TCP responses with the same 4-byte length header as requests.
    pub frame_responses: bool,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            frame_responses: true,
        }
    }
}

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Binds `options.host:port`, starts serving and returns the bound address.
    async fn listen(&self, engine: Arc<Engine>, port: u16, options: &ListenOptions) -> anyhow::Result<SocketAddr>;

    /// Stops accepting. Open connections finish their current request and end.
    fn close(&self);
}

/// Response-ready hook handing the context to its sink.
///
/// The sink is taken out of the context, so a response is written at most
/// once per request.
pub struct WriteBack;

#[async_trait]
impl Hook for WriteBack {
    async fn call(&self, ctx: &mut Context) -> anyhow::Result<()> {
        let Some(sink) = ctx.sink.take() else {
            return Ok(());
        };
        sink.send(ctx).await
    }
}
