//! Error types shared across the dispatch core and the adapters.

use thiserror::Error;

/// Outcome of a rejected or abandoned dispatch, surfaced to the adapter only.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The circuit breaker is open; no context was acquired.
    #[error("circuit breaker open")]
    CircuitOpen,

    /// A fault escaped the per-request pipeline.
    #[error("pipeline fault: {0}")]
    Pipeline(anyhow::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    #[error("context pool is closed")]
    Closed,
}

/// Errors raised by the stream framing codecs.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds limit of {max}")]
    TooLarge { len: u64, max: usize },

    #[error("protocol error: {0}")]
    Protocol(String),
}
