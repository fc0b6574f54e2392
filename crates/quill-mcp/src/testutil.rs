//! Shared helpers for in-crate tests: shell-scripted mock servers.

use crate::config::{ServerConfig, TransportConfig};
use std::collections::HashMap;
use std::time::Duration;

/// Minimal line-delimited JSON-RPC server in plain sh. Answers the
/// handshake and tool calls; optional discovery calls get a method-not-found
/// error; `shutdown/crash` makes it exit without replying.
const MOCK_SCRIPT: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"shutdown/crash"'*) exit 7 ;;
    *'"initialize"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"mock","version":"0.0.0"}}}\n' "$id" ;;
    *'"tools/list"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo back","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"tools/call"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ok"}],"isError":false}}\n' "$id" ;;
    *) printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"Method not found"}}\n' "$id" ;;
  esac
done
"#;

/// Server that rejects the handshake with a JSON-RPC error.
const REJECTING_SCRIPT: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32600,"message":"go away"}}\n' "$id"
done
"#;

fn script_transport(script: &str) -> TransportConfig {
    TransportConfig::Stdio {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        env: HashMap::new(),
        cwd: None,
    }
}

/// Transport for a well-behaved mock server.
pub fn mock_server() -> TransportConfig {
    script_transport(MOCK_SCRIPT)
}

/// Transport for a server whose handshake fails.
pub fn rejecting_server() -> TransportConfig {
    script_transport(REJECTING_SCRIPT)
}

/// A full config around the well-behaved mock.
pub fn mock_config(id: &str, enabled: bool) -> ServerConfig {
    ServerConfig {
        id: id.to_string(),
        name: format!("mock-{id}"),
        enabled,
        transport: mock_server(),
        install: None,
    }
}

/// A config whose start always fails (the command does not exist).
pub fn broken_config(id: &str, enabled: bool) -> ServerConfig {
    ServerConfig {
        id: id.to_string(),
        name: format!("broken-{id}"),
        enabled,
        transport: TransportConfig::Stdio {
            command: "this_command_does_not_exist_xyz123".to_string(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
        },
        install: None,
    }
}

/// Poll `check` until it returns true or the timeout elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
