//! Tool-server transport and lifecycle core.
//!
//! Servers are declared in a persisted config document and reach runtime as
//! at-most-one session per identity. A session wraps an [`McpClient`], which
//! speaks line-delimited JSON-RPC to a child process or plain JSON-RPC over
//! HTTP. The [`McpManager`] reconciles the declared list against live
//! sessions, caches what each server advertises, and disables servers that
//! fail to start or exit unexpectedly.

pub mod capability;
pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod http;
pub mod import;
pub mod jsonrpc;
pub mod launch;
pub mod manager;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use capability::{CapabilityCache, CapabilitySnapshot};
pub use client::{McpClient, ToolCallResult, ToolContent, ToolInfo};
pub use config::{CONFIG_KEY, InstallKind, InstallMetadata, ServerConfig, TransportConfig};
pub use error::McpError;
pub use import::{ImportedServer, parse_import};
pub use launch::{LaunchPlan, ResolvedCommand, Runtime, RuntimeLocator, SystemLocator};
pub use manager::{McpManager, ProbeReport, ReconcileOutcome};
pub use registry::{Session, SessionRegistry};
