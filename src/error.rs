//! Error types for the relay.

use std::io;

use thiserror::Error;

/// Errors that can occur while acquiring sockets or running the relay.
///
/// Bind and connect failures are fatal for the mandatory startup sockets and
/// recoverable for dynamically acquired legs; accept and mid-relay I/O
/// failures only ever degrade the affected session.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error("server leg lost")]
    ServerLegLost,

    #[error("config error: {0}")]
    Config(String),
}
