//! Anthropic native chat client.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Extended thinking, surfaced as a leading `<think>` block

use std::time::Duration;

use anyi_core::client::{
    ChatClient, ChatOptions, ChatResponse, FunctionDefinition, ResponseFormat, ResponseInfo,
};
use anyi_core::error::ProviderError;
use anyi_core::message::{Message, MessageToolCall, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{check_status, http_client, network_error};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub(crate) const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API client.
pub struct AnthropicClient {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: u32,
    client: reqwest::Client,
    /// Budget tokens for extended thinking, when enabled.
    thinking_budget: Option<u32>,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            // Anthropic can be slow with thinking
            client: http_client(Duration::from_secs(300)),
            thinking_budget: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    /// Enable extended thinking.
    pub fn with_extended_thinking(mut self, budget_tokens: u32) -> Self {
        self.thinking_budget = Some(budget_tokens);
        self
    }

    /// Extract system messages from the message list.
    /// Anthropic puts system prompt as a top-level field, not in messages.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to Anthropic API format with content blocks.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        let mut result = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => result.push(AnthropicMessage {
                    role: "user".into(),
                    content: AnthropicContent::Text(msg.content.clone()),
                }),
                Role::Assistant if msg.tool_calls.is_empty() => result.push(AnthropicMessage {
                    role: "assistant".into(),
                    content: AnthropicContent::Text(msg.content.clone()),
                }),
                Role::Assistant => {
                    let mut blocks: Vec<ContentBlock> = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: msg.content.clone(),
                        });
                    }
                    for tc in &msg.tool_calls {
                        let input: serde_json::Value =
                            serde_json::from_str(&tc.arguments).unwrap_or_default();
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input,
                        });
                    }
                    result.push(AnthropicMessage {
                        role: "assistant".into(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
                Role::Tool => result.push(AnthropicMessage {
                    role: "user".into(),
                    content: AnthropicContent::Blocks(vec![ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    }]),
                }),
                Role::System => {} // handled separately
            }
        }

        result
    }

    fn to_api_tools(functions: &[FunctionDefinition]) -> Vec<AnthropicTool> {
        functions
            .iter()
            .map(|f| AnthropicTool {
                name: f.name.clone(),
                description: f.description.clone(),
                input_schema: f.to_json_schema(),
            })
            .collect()
    }

    fn build_body(
        &self,
        messages: &[Message],
        functions: &[FunctionDefinition],
        options: &ChatOptions,
    ) -> serde_json::Value {
        let (system, messages) = Self::extract_system(messages);
        let model = options.model.as_deref().unwrap_or(&self.model);

        let mut body = serde_json::json!({
            "model": model,
            "messages": Self::to_api_messages(&messages),
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
        });

        if let Some(temperature) = options.temperature.or(self.temperature) {
            body["temperature"] = serde_json::json!(temperature);
        }

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        if !functions.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(functions));
        }

        if let Some(budget) = self.thinking_budget {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget
            });
        }

        for (key, value) in &options.extra {
            body[key.as_str()] = value.clone();
        }

        body
    }

    async fn send(
        &self,
        body: serde_json::Value,
        format: ResponseFormat,
    ) -> Result<ChatResponse, ProviderError> {
        if format == ResponseFormat::Json {
            // No native JSON mode; the prompt has to ask for it.
            debug!(client = %self.name, "JSON response format is not enforced by Anthropic");
        }

        debug!(client = %self.name, model = %body["model"], "Sending messages request");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status(&self.name, response).await?;

        let api_resp: AnthropicResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse Anthropic response: {e}"))
        })?;

        Ok(Self::to_chat_response(api_resp))
    }

    fn to_chat_response(resp: AnthropicResponse) -> ChatResponse {
        let mut thinking = String::new();
        let mut text_content = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text_content.is_empty() {
                        text_content.push('\n');
                    }
                    text_content.push_str(&text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(MessageToolCall {
                        id,
                        name,
                        arguments: input.to_string(),
                    });
                }
                ResponseContentBlock::Thinking { thinking: t } => thinking.push_str(&t),
                ResponseContentBlock::Other => {}
            }
        }

        if !thinking.is_empty() {
            text_content = format!("<think>{thinking}</think>\n{text_content}");
        }

        ChatResponse {
            message: Message {
                role: Role::Assistant,
                content: text_content,
                tool_calls,
                tool_call_id: None,
            },
            usage: ResponseInfo {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
            },
        }
    }
}

#[async_trait]
impl ChatClient for AnthropicClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> std::result::Result<ChatResponse, ProviderError> {
        self.send(self.build_body(messages, &[], options), options.format)
            .await
    }

    async fn chat_with_functions(
        &self,
        messages: &[Message],
        functions: &[FunctionDefinition],
        options: &ChatOptions,
    ) -> std::result::Result<ChatResponse, ProviderError> {
        self.send(self.build_body(messages, functions, options), options.format)
            .await
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor() {
        let client = AnthropicClient::new("sk-ant-test", "claude-sonnet-4-20250514");
        assert_eq!(client.name(), "anthropic");
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
        assert_eq!(client.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn constructor_with_base_url() {
        let client = AnthropicClient::new("k", "m").with_base_url("http://localhost:8080/");
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn system_is_hoisted() {
        let client = AnthropicClient::new("k", "claude");
        let body = client.build_body(
            &[
                Message::system("Be terse."),
                Message::system("Answer in English."),
                Message::user("Hi"),
            ],
            &[],
            &ChatOptions::default(),
        );
        assert_eq!(body["system"], "Be terse.\n\nAnswer in English.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn tool_messages_become_blocks() {
        let mut assistant = Message::assistant("");
        assistant.tool_calls.push(MessageToolCall {
            id: "tu_1".into(),
            name: "lookup".into(),
            arguments: r#"{"q":"x"}"#.into(),
        });
        let result = Message::tool_result("tu_1", "found");
        let api = AnthropicClient::to_api_messages(&[&assistant, &result]);
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json[0]["content"][0]["type"], "tool_use");
        assert_eq!(json[0]["content"][0]["input"]["q"], "x");
        assert_eq!(json[1]["role"], "user");
        assert_eq!(json[1]["content"][0]["type"], "tool_result");
        assert_eq!(json[1]["content"][0]["tool_use_id"], "tu_1");
    }

    #[test]
    fn response_blocks_are_flattened() {
        let data = r#"{
            "id": "msg_1", "model": "claude",
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "s"},
                {"type": "text", "text": "Hello"},
                {"type": "tool_use", "id": "tu_1", "name": "lookup", "input": {"q": 1}}
            ],
            "usage": {"input_tokens": 7, "output_tokens": 2}
        }"#;
        let parsed: AnthropicResponse = serde_json::from_str(data).unwrap();
        let response = AnthropicClient::to_chat_response(parsed);
        assert_eq!(response.message.content, "<think>hmm</think>\nHello");
        assert_eq!(response.message.tool_calls[0].arguments, r#"{"q":1}"#);
        assert_eq!(response.usage.prompt_tokens, 7);
        assert_eq!(response.usage.completion_tokens, 2);
    }

    #[test]
    fn unknown_blocks_are_ignored() {
        let data = r#"{
            "content": [
                {"type": "redacted_thinking", "data": "xyz"},
                {"type": "text", "text": "ok"}
            ],
            "usage": {"input_tokens": 1, "output_tokens": 1}
        }"#;
        let parsed: AnthropicResponse = serde_json::from_str(data).unwrap();
        assert_eq!(AnthropicClient::to_chat_response(parsed).message.content, "ok");
    }
}
