use shared::CodecError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by the server.
///
/// Only `Bind` is fatal. Everything else is scoped to one connection or one
/// message and is logged by the caller.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("a connection from {0} is already open")]
    DuplicateAddress(SocketAddr),
    #[error("no client with id {0}")]
    UnknownClient(String),
    #[error("outbound channel for client {0} is closed")]
    ChannelClosed(String),
    #[error("outbound queue for client {0} is full")]
    QueueFull(String),
}
