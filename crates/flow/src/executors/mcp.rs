//! MCP executor: call one tool on an MCP server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyi_core::{ExecutorError, FlowContext, StepEnv, StepExecutor, render};
use anyi_providers::McpClient;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::parse_config;

#[derive(Debug, Deserialize)]
struct McpConfig {
    endpoint: String,
    tool: String,
    #[serde(default)]
    arguments: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    output_variable: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Calls `tool` with arguments whose string values are rendered as
/// templates. The tool's text content goes into `output_variable`, or
/// replaces `text`.
pub struct McpExecutor {
    client: Arc<McpClient>,
    tool: String,
    arguments: serde_json::Map<String, serde_json::Value>,
    output_variable: Option<String>,
}

impl McpExecutor {
    pub fn new(client: Arc<McpClient>, tool: impl Into<String>) -> Self {
        Self {
            client,
            tool: tool.into(),
            arguments: serde_json::Map::new(),
            output_variable: None,
        }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ExecutorError> {
        let cfg: McpConfig = parse_config("mcp", config)?;
        let mut client = McpClient::new(cfg.endpoint);
        for (name, value) in cfg.headers {
            client = client.with_header(name, value);
        }
        if let Some(secs) = cfg.timeout_secs {
            client = client.with_timeout(Duration::from_secs(secs));
        }
        let mut executor = Self::new(Arc::new(client), cfg.tool);
        executor.arguments = cfg.arguments;
        executor.output_variable = cfg.output_variable;
        Ok(executor)
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn with_output_variable(mut self, name: impl Into<String>) -> Self {
        self.output_variable = Some(name.into());
        self
    }
}

/// Render string leaves of `value` against the context.
fn render_value(
    value: &serde_json::Value,
    ctx: &FlowContext,
) -> Result<serde_json::Value, ExecutorError> {
    Ok(match value {
        serde_json::Value::String(s) => serde_json::Value::String(render(s, ctx)?),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| render_value(v, ctx))
                .collect::<Result<_, _>>()?,
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_value(v, ctx)?)))
                .collect::<Result<_, ExecutorError>>()?,
        ),
        other => other.clone(),
    })
}

#[async_trait]
impl StepExecutor for McpExecutor {
    fn kind(&self) -> &str {
        "mcp"
    }

    async fn run(&self, input: &FlowContext, env: &StepEnv) -> Result<FlowContext, ExecutorError> {
        let mut arguments = serde_json::Map::new();
        for (name, value) in &self.arguments {
            arguments.insert(name.clone(), render_value(value, input)?);
        }

        debug!(
            step = %env.step_name,
            endpoint = self.client.endpoint(),
            tool = %self.tool,
            "Calling MCP tool"
        );
        let result = self
            .client
            .call_tool(&self.tool, serde_json::Value::Object(arguments))
            .await?;

        let text = result.text();
        if result.is_error {
            return Err(ExecutorError::Tool(format!("{}: {text}", self.tool)));
        }

        let mut output = input.clone();
        match &self.output_variable {
            Some(var) => output.set_variable(var.clone(), text),
            None => output.text = text,
        }
        Ok(output)
    }
}
