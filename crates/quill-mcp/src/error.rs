//! Error types for tool-server sessions.

use std::sync::Arc;
use thiserror::Error;

/// Errors from tool-server transport and lifecycle operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// One protocol line failed to parse. The line is dropped and the
    /// session survives; this never propagates past the transport.
    #[error("malformed protocol line: {reason}")]
    Frame { reason: String },

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bundled runtime '{runtime}' is not available")]
    MissingRuntime { runtime: &'static str },

    #[error("handshake with '{server}' failed: {reason}")]
    Handshake { server: String, reason: String },

    /// Send or request on a transport with no live process behind it.
    #[error("transport is not connected")]
    NotConnected,

    /// Wraps the underlying cause for registry callers.
    #[error("failed to start server '{identity}': {source}")]
    Start {
        identity: String,
        #[source]
        source: Arc<McpError>,
    },

    #[error("server '{identity}' is not configured")]
    UnknownServer { identity: String },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("config store error: {0}")]
    Store(#[from] quill_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
