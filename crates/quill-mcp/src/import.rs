//! Import of server definitions from pasted JSON config snippets.
//!
//! Accepts the common wrapper shapes found in editor configs
//! (`{"mcpServers": {...}}`, `{"servers": {...}}`) as well as a single
//! direct object, tolerating comments and loosely-typed env values.

use crate::config::{ServerConfig, TransportConfig};
use crate::error::McpError;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// A server definition parsed from an import snippet, not yet configured.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedServer {
    pub name: String,
    pub transport: TransportConfig,
}

impl ImportedServer {
    /// Whether an existing config already describes this server.
    pub fn matches(&self, existing: &ServerConfig) -> bool {
        if existing.name != self.name {
            return false;
        }
        match (&existing.transport, &self.transport) {
            (TransportConfig::Http { url: a, .. }, TransportConfig::Http { url: b, .. }) => a == b,
            (
                TransportConfig::Stdio {
                    command: ca,
                    args: aa,
                    ..
                },
                TransportConfig::Stdio {
                    command: cb,
                    args: ab,
                    ..
                },
            ) => ca == cb && aa == ab,
            _ => false,
        }
    }

    /// Promote to a full config with a fresh identity.
    pub fn into_config(self, enabled: bool) -> ServerConfig {
        ServerConfig {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            enabled,
            transport: self.transport,
            install: None,
        }
    }
}

/// Parse an import snippet into zero or more server definitions.
///
/// Entries without a usable name, command, or URL are silently skipped; a
/// snippet that is valid JSON but contains no servers yields an empty list.
pub fn parse_import(input: &str) -> Result<Vec<ImportedServer>, McpError> {
    let data: Value = serde_json::from_str(&strip_json_comments(input))?;

    for wrapper in ["mcpServers", "servers"] {
        if let Some(map) = data.get(wrapper).and_then(Value::as_object) {
            let servers = normalize_entries(map.iter().map(|(name, cfg)| (name.clone(), cfg)));
            if !servers.is_empty() {
                return Ok(servers);
            }
        }
    }

    // Direct form: one object carrying its own name.
    if data.is_object() {
        let name = data
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Ok(normalize_entries(std::iter::once((name, &data))));
    }

    Ok(Vec::new())
}

fn normalize_entries<'a>(
    entries: impl Iterator<Item = (String, &'a Value)>,
) -> Vec<ImportedServer> {
    let mut out = Vec::new();

    for (name, cfg) in entries {
        let name = name.trim().to_string();
        if name.is_empty() {
            continue;
        }

        let is_http =
            cfg.get("type").and_then(Value::as_str) == Some("http") || cfg.get("url").is_some();
        if is_http {
            let url = cfg
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            if url.is_empty() {
                continue;
            }
            out.push(ImportedServer {
                name,
                transport: TransportConfig::Http {
                    url,
                    headers: normalize_string_map(cfg.get("headers")),
                },
            });
            continue;
        }

        let mut command = cfg
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        let mut args: Vec<String> = cfg
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().map(value_to_string).collect())
            .unwrap_or_default();

        // A lone command-line string gets shell-split into command + args.
        if args.is_empty() {
            let (split_command, split_args) = split_command_line(&command);
            if !split_command.is_empty() {
                command = split_command;
                args = split_args;
            }
        }
        if command.is_empty() {
            continue;
        }

        out.push(ImportedServer {
            name,
            transport: TransportConfig::Stdio {
                command,
                args,
                env: normalize_string_map(cfg.get("env")),
                cwd: cfg.get("cwd").and_then(Value::as_str).map(str::to_string),
            },
        });
    }

    out
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn normalize_string_map(value: Option<&Value>) -> HashMap<String, String> {
    let Some(map) = value.and_then(Value::as_object) else {
        return HashMap::new();
    };
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), value_to_string(v)))
        .collect()
}

/// Remove `//` and `/* */` comments while leaving string contents intact.
pub fn strip_json_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' => match chars.peek() {
                Some('/') => {
                    while let Some(&next) = chars.peek() {
                        if next == '\n' {
                            break;
                        }
                        chars.next();
                    }
                }
                Some('*') => {
                    chars.next();
                    let mut prev = '\0';
                    for next in chars.by_ref() {
                        if prev == '*' && next == '/' {
                            break;
                        }
                        prev = next;
                    }
                }
                _ => out.push(c),
            },
            _ => out.push(c),
        }
    }

    out
}

/// Split a command line into command and arguments, honoring single and
/// double quotes and backslash escapes inside double quotes.
pub fn split_command_line(input: &str) -> (String, Vec<String>) {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = input.trim().chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' && in_double {
            if let Some(&next) = chars.peek() {
                if next == '"' || next == '\\' {
                    current.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        if c == '\'' && !in_double {
            in_single = !in_single;
            continue;
        }
        if c == '"' && !in_single {
            in_double = !in_double;
            continue;
        }
        if !in_single && !in_double && c.is_whitespace() {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current);
    }

    let mut iter = parts.into_iter();
    let command = iter.next().unwrap_or_default();
    (command, iter.collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_and_block_comments() {
        let input = r#"{
            // filesystem access
            "a": 1, /* inline */ "b": "http://x" // trailing
        }"#;
        let parsed: Value = serde_json::from_str(&strip_json_comments(input)).unwrap();
        assert_eq!(parsed["a"], 1);
        assert_eq!(parsed["b"], "http://x");
    }

    #[test]
    fn comment_markers_inside_strings_survive() {
        let input = r#"{"url": "https://example.com/path", "note": "a // b /* c */"}"#;
        let stripped = strip_json_comments(input);
        let parsed: Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(parsed["url"], "https://example.com/path");
        assert_eq!(parsed["note"], "a // b /* c */");
    }

    #[test]
    fn split_plain_words() {
        let (command, args) = split_command_line("npx -y server-filesystem /home");
        assert_eq!(command, "npx");
        assert_eq!(args, vec!["-y", "server-filesystem", "/home"]);
    }

    #[test]
    fn split_respects_quotes() {
        let (command, args) = split_command_line(r#"node "my server.js" 'a b'"#);
        assert_eq!(command, "node");
        assert_eq!(args, vec!["my server.js", "a b"]);
    }

    #[test]
    fn split_handles_escapes_in_double_quotes() {
        let (command, args) = split_command_line(r#"run "say \"hi\"""#);
        assert_eq!(command, "run");
        assert_eq!(args, vec![r#"say "hi""#]);
    }

    #[test]
    fn split_empty_input() {
        let (command, args) = split_command_line("   ");
        assert_eq!(command, "");
        assert!(args.is_empty());
    }

    #[test]
    fn parses_mcp_servers_wrapper() {
        let input = r#"{
            "mcpServers": {
                "filesystem": {
                    "command": "npx",
                    "args": ["-y", "server-filesystem"],
                    "env": {"DEBUG": 1}
                }
            }
        }"#;
        let servers = parse_import(input).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "filesystem");
        match &servers[0].transport {
            TransportConfig::Stdio { command, args, env, .. } => {
                assert_eq!(command, "npx");
                assert_eq!(args, &["-y", "server-filesystem"]);
                assert_eq!(env["DEBUG"], "1");
            }
            _ => panic!("expected stdio"),
        }
    }

    #[test]
    fn parses_servers_wrapper_and_detects_http_by_url() {
        let input = r#"{"servers": {"remote": {"url": "https://h/mcp", "headers": {"X": "y"}}}}"#;
        let servers = parse_import(input).unwrap();
        assert_eq!(servers.len(), 1);
        match &servers[0].transport {
            TransportConfig::Http { url, headers } => {
                assert_eq!(url, "https://h/mcp");
                assert_eq!(headers["X"], "y");
            }
            _ => panic!("expected http"),
        }
    }

    #[test]
    fn parses_direct_object() {
        let input = r#"{"name": "one", "command": "uvx some-tool"}"#;
        let servers = parse_import(input).unwrap();
        assert_eq!(servers.len(), 1);
        match &servers[0].transport {
            TransportConfig::Stdio { command, args, .. } => {
                assert_eq!(command, "uvx");
                assert_eq!(args, &["some-tool"]);
            }
            _ => panic!("expected stdio"),
        }
    }

    #[test]
    fn entries_without_command_or_url_are_skipped() {
        let input = r#"{"mcpServers": {"empty": {}, "ok": {"command": "deno"}}}"#;
        let servers = parse_import(input).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "ok");
    }

    #[test]
    fn matches_dedupes_by_name_and_command_line() {
        let imported = parse_import(r#"{"name": "fs", "command": "npx -y x"}"#)
            .unwrap()
            .remove(0);
        let existing = imported.clone().into_config(false);

        assert!(imported.matches(&existing));

        let other = parse_import(r#"{"name": "fs", "command": "npx -y y"}"#)
            .unwrap()
            .remove(0);
        assert!(!other.matches(&existing));
    }

    #[test]
    fn into_config_assigns_unique_ids() {
        let imported = parse_import(r#"{"name": "fs", "command": "deno"}"#)
            .unwrap()
            .remove(0);
        let a = imported.clone().into_config(true);
        let b = imported.into_config(true);
        assert_ne!(a.id, b.id);
        assert!(a.enabled);
    }
}
