//! HTTP/1.1 adapter.
//!
//! # Architecture
//!
//! - **`connection`**: per-connection request/response state machine
//! - **`parser`**: parses requests out of an accumulating byte buffer
//! - **`request`**: parsed request plus normalization into an [`Inbound`]
//! - **`response`**: response representation with builder
//! - **`writer`**: serializes and writes responses to the client
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for a complete request
//!        └──────┬──────┘
//!               │ Request parsed
//!               ▼
//!        ┌──────────────────┐
//!        │   Dispatching    │ ← Engine pipeline; the write-back hook
//!        └──────┬───────────┘   writes the response through the sink
//!               │
//!               ├─ Keep-Alive and response sent → Reading
//!               └─ Otherwise → Closed
//! ```
//!
//! [`Inbound`]: crate::dispatch::Inbound

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatch::Engine;
use crate::http::connection::Connection;
use crate::server::{Adapter, ListenOptions, Shutdown, bind, spawn_accept_loop};

#[derive(Default)]
pub struct Http1Adapter {
    shutdown: Shutdown,
}

impl Http1Adapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Adapter for Http1Adapter {
    async fn listen(&self, engine: Arc<Engine>, port: u16, options: &ListenOptions) -> anyhow::Result<SocketAddr> {
        engine.install_write_back();

        let listener = bind(&options.host, port).await?;
        let addr = listener.local_addr()?;
        let max_body = options.max_frame_len;

        spawn_accept_loop(listener, &self.shutdown, "http", move |socket, peer, signal| {
            let engine = Arc::clone(&engine);
            async move {
                Connection::new(engine, socket, peer, signal)?
                    .max_body(max_body)
                    .run()
                    .await?;
                Ok(())
            }
        });

        Ok(addr)
    }

    fn close(&self) {
        self.shutdown.trigger();
    }
}
