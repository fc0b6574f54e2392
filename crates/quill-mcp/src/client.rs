//! Client handle for one tool-server session.
//!
//! Runs the protocol handshake (initialize + initialized notification) over
//! either transport, correlates requests with responses, and exposes
//! capability discovery and invocation calls.

use crate::capability::CapabilitySnapshot;
use crate::config::TransportConfig;
use crate::error::McpError;
use crate::http::HttpTransport;
use crate::jsonrpc::{self, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, MessageKind};
use crate::launch::{LaunchPlan, RuntimeLocator};
use crate::transport::{ProcessTransport, TransportEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot, watch};

/// Protocol version we advertise during the handshake.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// A tool advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Result of calling a tool.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

/// A content item in a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

#[derive(Debug)]
enum Wire {
    Stdio(ProcessTransport),
    Http(HttpTransport),
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Live connection to one tool server.
#[derive(Debug)]
pub struct McpClient {
    name: String,
    wire: Wire,
    next_id: AtomicU64,
    pending: PendingMap,
    closed_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
}

#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolInfo>,
}

#[derive(Deserialize)]
struct ResourcesListResult {
    #[serde(default)]
    resources: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct ResourceTemplatesListResult {
    #[serde(default, rename = "resourceTemplates")]
    resource_templates: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct PromptsListResult {
    #[serde(default)]
    prompts: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct ToolCallRaw {
    content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

impl McpClient {
    /// Connect to a server: build the transport and run the handshake.
    ///
    /// A server that spawns but fails the handshake is torn down before the
    /// error is returned.
    pub async fn connect(
        name: &str,
        transport: &TransportConfig,
        locator: &dyn RuntimeLocator,
    ) -> Result<Self, McpError> {
        let (closed_tx, closed_rx) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let wire = match transport {
            TransportConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let resolved = LaunchPlan::for_command(command, args).resolve(locator)?;
                let (process, events) =
                    ProcessTransport::spawn(&resolved, env, cwd.as_deref().map(Path::new))?;
                Self::spawn_router(events, Arc::clone(&pending), Arc::clone(&closed_tx));
                Wire::Stdio(process)
            }
            TransportConfig::Http { url, headers } => Wire::Http(HttpTransport::new(url, headers)?),
        };

        let client = Self {
            name: name.to_string(),
            wire,
            next_id: AtomicU64::new(1),
            pending,
            closed_tx,
            closed_rx,
        };

        if let Err(e) = client.handshake().await {
            client.close().await;
            return Err(McpError::Handshake {
                server: client.name.clone(),
                reason: e.to_string(),
            });
        }

        Ok(client)
    }

    /// Router task: dispatches transport events until `Closed`, which is
    /// always the final event.
    fn spawn_router(
        mut events: mpsc::Receiver<TransportEvent>,
        pending: PendingMap,
        closed_tx: Arc<watch::Sender<bool>>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Message(message) => match jsonrpc::classify(&message) {
                        MessageKind::Response => {
                            let response: JsonRpcResponse = match serde_json::from_value(message) {
                                Ok(r) => r,
                                Err(e) => {
                                    tracing::warn!("discarding unparseable response: {}", e);
                                    continue;
                                }
                            };
                            if let Some(id) = response.id {
                                if let Some(tx) = pending.lock().await.remove(&id) {
                                    let _ = tx.send(response);
                                }
                            }
                        }
                        // Server-initiated traffic is outside the bootstrap
                        // surface; drop it.
                        MessageKind::Request | MessageKind::Notification => {
                            tracing::debug!("ignoring server-initiated message");
                        }
                    },
                    TransportEvent::Error(e) => tracing::warn!("transport error: {}", e),
                    TransportEvent::Closed => break,
                }
            }
            // Process gone: fail anything still waiting, then flag closure.
            pending.lock().await.clear();
            let _ = closed_tx.send(true);
        });
    }

    async fn handshake(&self) -> Result<(), McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "quill",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let response = self.request("initialize", Some(params)).await?;
        self.expect_result(response)?;
        self.notify("notifications/initialized", None).await
    }

    /// Send a request and wait for its response.
    ///
    /// No transport-level timeout is imposed; callers bring their own. If
    /// the process dies mid-flight the wait fails with `NotConnected`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        if self.is_closed() {
            return Err(McpError::NotConnected);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);

        match &self.wire {
            Wire::Http(http) => http.round_trip(&request).await,
            Wire::Stdio(process) => {
                let (tx, rx) = oneshot::channel();
                self.pending.lock().await.insert(id, tx);

                let message = serde_json::to_value(&request)?;
                if let Err(e) = process.send(&message).await {
                    self.pending.lock().await.remove(&id);
                    return Err(e);
                }

                rx.await.map_err(|_| McpError::NotConnected)
            }
        }
    }

    /// Send a notification (fire-and-forget).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        if self.is_closed() {
            return Err(McpError::NotConnected);
        }
        let notification = JsonRpcNotification::new(method, params);
        match &self.wire {
            Wire::Http(http) => http.notify(&notification).await,
            Wire::Stdio(process) => process.send(&serde_json::to_value(&notification)?).await,
        }
    }

    fn expect_result(&self, response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
        if let Some(err) = response.error {
            return Err(McpError::JsonRpc {
                server: self.name.clone(),
                code: err.code,
                message: err.message,
            });
        }
        response
            .result
            .ok_or_else(|| McpError::Protocol("response has neither result nor error".to_string()))
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        let result = self.expect_result(self.request("tools/list", None).await?)?;
        let list: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/list response: {e}")))?;
        Ok(list.tools)
    }

    pub async fn list_resources(&self) -> Result<Vec<serde_json::Value>, McpError> {
        let result = self.expect_result(self.request("resources/list", None).await?)?;
        let list: ResourcesListResult = serde_json::from_value(result).map_err(|e| {
            McpError::Protocol(format!("failed to parse resources/list response: {e}"))
        })?;
        Ok(list.resources)
    }

    pub async fn list_resource_templates(&self) -> Result<Vec<serde_json::Value>, McpError> {
        let result = self.expect_result(self.request("resources/templates/list", None).await?)?;
        let list: ResourceTemplatesListResult = serde_json::from_value(result).map_err(|e| {
            McpError::Protocol(format!("failed to parse templates response: {e}"))
        })?;
        Ok(list.resource_templates)
    }

    pub async fn list_prompts(&self) -> Result<Vec<serde_json::Value>, McpError> {
        let result = self.expect_result(self.request("prompts/list", None).await?)?;
        let list: PromptsListResult = serde_json::from_value(result).map_err(|e| {
            McpError::Protocol(format!("failed to parse prompts/list response: {e}"))
        })?;
        Ok(list.prompts)
    }

    /// Discover everything the server advertises.
    ///
    /// `tools/list` is mandatory; the optional capabilities degrade to empty
    /// lists when the server answers them with an error.
    pub async fn fetch_capabilities(&self) -> Result<CapabilitySnapshot, McpError> {
        let tools = self.list_tools().await?;
        let resources = match self.list_resources().await {
            Ok(resources) => resources,
            Err(e) => {
                tracing::debug!("resources/list unavailable: {}", e);
                Vec::new()
            }
        };
        let resource_templates = match self.list_resource_templates().await {
            Ok(templates) => templates,
            Err(e) => {
                tracing::debug!("resources/templates/list unavailable: {}", e);
                Vec::new()
            }
        };
        let prompts = match self.list_prompts().await {
            Ok(prompts) => prompts,
            Err(e) => {
                tracing::debug!("prompts/list unavailable: {}", e);
                Vec::new()
            }
        };
        Ok(CapabilitySnapshot {
            tools,
            resources,
            resource_templates,
            prompts,
        })
    }

    /// Call a tool on this server.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        let params = serde_json::json!({
            "name": tool,
            "arguments": arguments,
        });
        let result = self.expect_result(self.request("tools/call", Some(params)).await?)?;
        let raw: ToolCallRaw = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/call result: {e}")))?;
        Ok(ToolCallResult {
            content: raw.content,
            is_error: raw.is_error,
        })
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<serde_json::Value, McpError> {
        let params = serde_json::json!({"uri": uri});
        self.expect_result(self.request("resources/read", Some(params)).await?)
    }

    /// Fetch a prompt, optionally with arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments.unwrap_or_else(|| serde_json::json!({})),
        });
        self.expect_result(self.request("prompts/get", Some(params)).await?)
    }

    pub fn server_name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolves once the underlying transport has closed.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Force-close the session. Idempotent; never fails.
    pub async fn close(&self) {
        if let Wire::Stdio(process) = &self.wire {
            process.close().await;
        }
        self.pending.lock().await.clear();
        let _ = self.closed_tx.send(true);
    }
}
