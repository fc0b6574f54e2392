//! HTTP transport for network-addressable tool servers.
//!
//! Framing is delegated entirely to request/response semantics: one POST
//! per JSON-RPC call, the reply body is the response.

use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;

/// Transport for a server reachable at a URL.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Build a transport for `url`, applying `headers` to every request.
    pub fn new(url: &str, headers: &HashMap<String, String>) -> Result<Self, McpError> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| McpError::Protocol(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| McpError::Protocol(format!("invalid header value: {e}")))?;
            header_map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Send one request and return its response.
    pub async fn round_trip(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<JsonRpcResponse>().await?)
    }

    /// Send a notification; any response body is ignored.
    pub async fn notify(&self, notification: &JsonRpcNotification) -> Result<(), McpError> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_custom_headers() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer token".to_string());
        headers.insert("X-Api-Key".to_string(), "k".to_string());

        assert!(HttpTransport::new("http://localhost:9999/rpc", &headers).is_ok());
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "v".to_string());

        let err = HttpTransport::new("http://localhost:9999/rpc", &headers).unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }

    #[test]
    fn invalid_header_value_is_rejected() {
        let mut headers = HashMap::new();
        headers.insert("X-Thing".to_string(), "bad\nvalue".to_string());

        let err = HttpTransport::new("http://localhost:9999/rpc", &headers).unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }
}
