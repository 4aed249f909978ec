//! Junction - protocol-agnostic request dispatch core
//!
//! One router, one hook pipeline and one context pool serving HTTP/1,
//! HTTP/2, length-framed TCP, UDP datagrams and WebSocket frames.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod http2;
pub mod router;
pub mod server;
pub mod tcp;
pub mod udp;
pub mod websocket;

pub use crate::config::Config;
pub use crate::dispatch::{Body, Context, Engine, Inbound, Protocol, Stage};
pub use crate::error::DispatchError;
