//! Declarative tool-server configuration.
//!
//! The full server list is persisted as one JSON document under
//! [`CONFIG_KEY`], read and written whole; concurrent edits resolve
//! last-writer-wins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Store key holding the whole server list.
pub const CONFIG_KEY: &str = "mcp_servers";

/// One configured tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Opaque unique id; the server's identity.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether reconciliation should keep a session running.
    pub enabled: bool,
    #[serde(flatten)]
    pub transport: TransportConfig,
    /// Provenance from the marketplace installer, if installed that way.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallMetadata>,
}

/// Connection parameters, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    pub fn is_stdio(&self) -> bool {
        matches!(self, TransportConfig::Stdio { .. })
    }
}

/// Marketplace install provenance. Never sent to the server itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallMetadata {
    pub slug: String,
    pub kind: InstallKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Entitlement status string, e.g. "free" or "subscription".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallKind {
    Package,
    File,
    Url,
}
