//! Top-level error taxonomy.
//!
//! Per-packet and per-block conditions (protocol errors, expected loss,
//! backpressure, starvation) are *not* represented here — per the error
//! handling design, those are local to a packet/block boundary and surface
//! only as stats-registry counters and log lines. This enum covers only the
//! conditions that are fatal at `init()` or that abort a single blocking
//! call (socket bind, tunnel handshake, config parse).

use std::net::AddrParseError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid address: {0}")]
    Address(#[from] AddrParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tunnel error: {0}")]
    Tunnel(String),

    #[error("audio device error: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, Error>;
