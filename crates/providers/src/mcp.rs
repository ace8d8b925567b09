//! Minimal MCP (Model Context Protocol) client over streamable HTTP.
//!
//! Speaks JSON-RPC 2.0: `initialize`, `tools/list`, `tools/call`.
//! The session id handed out by the server in `Mcp-Session-Id` is echoed
//! on every later request. Responses may come back as plain JSON or as a
//! single-event SSE body.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyi_core::error::ProviderError;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{check_status, http_client, network_error};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SESSION_HEADER: &str = "mcp-session-id";

/// A tool advertised by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: serde_json::Value,
}

/// One content item of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum McpContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// All text parts joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                McpContent::Text { text } => Some(text.as_str()),
                McpContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// MCP client bound to one server endpoint.
pub struct McpClient {
    endpoint: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
    initialized: OnceCell<()>,
}

impl McpClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: HashMap::new(),
            client: http_client(Duration::from_secs(60)),
            next_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
            initialized: OnceCell::new(),
        }
    }

    /// Add a header sent with every request (e.g. `Authorization`).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current session id, once the server has assigned one.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|s| s.clone())
    }

    /// Perform the `initialize` handshake once per client.
    pub async fn initialize(&self) -> Result<(), ProviderError> {
        self.initialized
            .get_or_try_init(|| async {
                let result = self
                    .request(
                        "initialize",
                        serde_json::json!({
                            "protocolVersion": PROTOCOL_VERSION,
                            "capabilities": {},
                            "clientInfo": {
                                "name": "anyi",
                                "version": env!("CARGO_PKG_VERSION"),
                            },
                        }),
                    )
                    .await?;
                info!(
                    endpoint = %self.endpoint,
                    server = %result["serverInfo"]["name"],
                    "MCP session initialized"
                );
                self.notify("notifications/initialized").await
            })
            .await
            .map(|_| ())
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>, ProviderError> {
        self.initialize().await?;
        let result = self.request("tools/list", serde_json::json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .unwrap_or_else(|| serde_json::json!([]));
        serde_json::from_value(tools)
            .map_err(|e| ProviderError::InvalidResponse(format!("Invalid tools/list result: {e}")))
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, ProviderError> {
        self.initialize().await?;
        debug!(endpoint = %self.endpoint, tool = name, "Calling MCP tool");
        let result = self
            .request(
                "tools/call",
                serde_json::json!({ "name": name, "arguments": arguments }),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| ProviderError::InvalidResponse(format!("Invalid tools/call result: {e}")))
    }

    fn post(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }
        request
    }

    fn remember_session(&self, response: &reqwest::Response) {
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut guard) = self.session_id.lock() {
                *guard = Some(session.to_string());
            }
        }
    }

    async fn notify(&self, method: &str) -> Result<(), ProviderError> {
        let body = serde_json::json!({ "jsonrpc": "2.0", "method": method });
        let response = self.post(&body).send().await.map_err(network_error)?;
        check_status("mcp", response).await?;
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.post(&body).send().await.map_err(network_error)?;
        let response = check_status("mcp", response).await?;
        self.remember_session(&response);

        let is_sse = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        let text = response.text().await.map_err(network_error)?;

        let payload = if is_sse {
            sse_payload(&text, id)?
        } else {
            serde_json::from_str(&text)
                .map_err(|e| ProviderError::InvalidResponse(format!("Invalid JSON-RPC body: {e}")))?
        };

        rpc_result(payload)
    }
}

/// Pick the JSON-RPC response with `id` out of an SSE body.
fn sse_payload(body: &str, id: u64) -> Result<serde_json::Value, ProviderError> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<serde_json::Value>(data.trim()).ok())
        .find(|v| v.get("id").and_then(|i| i.as_u64()) == Some(id))
        .ok_or_else(|| {
            ProviderError::InvalidResponse(format!("No JSON-RPC response for id {id} in stream"))
        })
}

fn rpc_result(payload: serde_json::Value) -> Result<serde_json::Value, ProviderError> {
    if let Some(error) = payload.get("error") {
        return Err(ProviderError::InvalidResponse(format!(
            "JSON-RPC error {}: {}",
            error["code"],
            error["message"].as_str().unwrap_or("unknown error")
        )));
    }
    payload
        .get("result")
        .cloned()
        .ok_or_else(|| ProviderError::InvalidResponse("JSON-RPC response has no result".into()))
}
