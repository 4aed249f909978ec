//! Dispatch core.
//!
//! # Data Flow
//! ```text
//! Adapter (http / http2 / tcp / udp / ws)
//!     → engine.rs (breaker check, pipeline)
//!     → pool.rs (acquire Context)
//!     → hooks.rs (request-received)
//!     → router (lookup + handler)
//!     → hooks.rs (response-ready, adapter sink writes the reply)
//!     → pool.rs (release Context)
//! ```

pub mod breaker;
pub mod context;
pub mod engine;
pub mod hooks;
pub mod plugin;
pub mod pool;

pub use breaker::CircuitBreaker;
pub use context::{Body, ConnectionInfo, Context, Inbound, Protocol, PushHandle, ResponseSink};
pub use engine::{Completion, Engine};
pub use hooks::{Hook, HookMode, HookPipeline, Stage, hook_fn};
pub use plugin::{Bundle, Plugin};
pub use pool::ContextPool;
