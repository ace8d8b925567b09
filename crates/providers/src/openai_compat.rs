//! OpenAI-compatible chat client.
//!
//! Works with: OpenAI, Azure OpenAI, Ollama, DeepSeek, DashScope (Qwen),
//! Zhipu (GLM), SiliconCloud, and any other `/chat/completions` endpoint.
//!
//! Supports:
//! - Chat completions (non-streaming)
//! - JSON response format
//! - Function calling through `tools`

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

/// How requests are addressed and authenticated.
#[derive(Debug, Clone)]
enum Endpoint {
    /// `{base}/chat/completions` with a Bearer token
    Bearer { base_url: String },
    /// Azure deployment URL with an `api-key` header
    Azure {
        base_url: String,
        deployment: String,
        api_version: String,
    },
}

/// An OpenAI-compatible chat client.
pub struct OpenAiCompatClient {
    name: String,
    endpoint: Endpoint,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Create a new client for any OpenAI-compatible endpoint.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: Endpoint::Bearer {
                base_url: base_url.into().trim_end_matches('/').to_string(),
            },
            api_key: api_key.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
            client: http_client(Duration::from_secs(120)),
        }
    }

    /// Create an Azure OpenAI client bound to one deployment.
    pub fn azure(
        name: impl Into<String>,
        base_url: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let deployment = deployment.into();
        Self {
            name: name.into(),
            endpoint: Endpoint::Azure {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                deployment: deployment.clone(),
                api_version: api_version.into(),
            },
            api_key: api_key.into(),
            model: deployment,
            temperature: None,
            max_tokens: None,
            client: http_client(Duration::from_secs(120)),
        }
    }

    /// Create an OpenAI client (convenience constructor).
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key, model)
    }

    /// Create an Ollama client (convenience constructor).
    pub fn ollama(base_url: Option<&str>, model: impl Into<String>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "", // Ollama doesn't need a key
            model,
        )
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        match &self.endpoint {
            Endpoint::Bearer { base_url } => format!("{base_url}/chat/completions"),
            Endpoint::Azure {
                base_url,
                deployment,
                api_version,
            } => format!(
                "{base_url}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
            ),
        }
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().into(),
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert function definitions to OpenAI API format.
    fn to_api_tools(functions: &[FunctionDefinition]) -> Vec<ApiToolDefinition> {
        functions
            .iter()
            .map(|f| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: f.name.clone(),
                    description: f.description.clone(),
                    parameters: f.to_json_schema(),
                },
            })
            .collect()
    }

    fn build_body(
        &self,
        messages: &[Message],
        functions: &[FunctionDefinition],
        options: &ChatOptions,
    ) -> serde_json::Value {
        let model = options.model.as_deref().unwrap_or(&self.model);
        let mut body = serde_json::json!({
            "model": model,
            "messages": Self::to_api_messages(messages),
            "stream": false,
        });

        if let Some(temperature) = options.temperature.or(self.temperature) {
            body["temperature"] = serde_json::json!(temperature);
        }

        if let Some(max_tokens) = options.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if options.format == ResponseFormat::Json {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        if !functions.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(functions));
        }

        for (key, value) in &options.extra {
            body[key.as_str()] = value.clone();
        }

        body
    }

    async fn send(&self, body: serde_json::Value) -> Result<ChatResponse, ProviderError> {
        let mut request = self
            .client
            .post(self.url())
            .header("Content-Type", "application/json");

        request = match &self.endpoint {
            Endpoint::Azure { .. } => request.header("api-key", &self.api_key),
            Endpoint::Bearer { .. } if !self.api_key.is_empty() => {
                request.header("Authorization", format!("Bearer {}", self.api_key))
            }
            Endpoint::Bearer { .. } => request,
        };

        debug!(client = %self.name, model = %body["model"], "Sending chat request");

        let response = request.json(&body).send().await.map_err(network_error)?;
        let response = check_status(&self.name, response).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        Self::to_chat_response(api_response)
    }

    fn to_chat_response(api_response: ApiResponse) -> Result<ChatResponse, ProviderError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        let tool_calls: Vec<MessageToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let message = Message {
            role: Role::Assistant,
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            tool_call_id: None,
        };

        let usage = api_response
            .usage
            .map(|u| ResponseInfo {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(ChatResponse { message, usage })
    }
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> std::result::Result<ChatResponse, ProviderError> {
        self.send(self.build_body(messages, &[], options)).await
    }

    async fn chat_with_functions(
        &self,
        messages: &[Message],
        functions: &[FunctionDefinition],
        options: &ChatOptions,
    ) -> std::result::Result<ChatResponse, ProviderError> {
        self.send(self.build_body(messages, functions, options)).await
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyi_core::client::FunctionParam;

    #[test]
    fn ollama_constructor() {
        let client = OpenAiCompatClient::ollama(None, "llama3.2");
        assert_eq!(client.name(), "ollama");
        assert_eq!(client.url(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn azure_url_includes_deployment_and_version() {
        let client = OpenAiCompatClient::azure(
            "az",
            "https://res.openai.azure.com/",
            "gpt4o",
            "2024-06-01",
            "key",
        );
        assert_eq!(
            client.url(),
            "https://res.openai.azure.com/openai/deployments/gpt4o/chat/completions?api-version=2024-06-01"
        );
        assert_eq!(client.model(), "gpt4o");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatClient::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn message_conversion_tool_response() {
        let msg = Message::tool_result("call_1", "result data");
        let api_msgs = OpenAiCompatClient::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn json_format_sets_response_format() {
        let client = OpenAiCompatClient::openai("sk", "gpt-4o").with_temperature(0.2);
        let body = client.build_body(&[Message::user("hi")], &[], &ChatOptions::json());
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["model"], "gpt-4o");
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn options_override_and_passthrough() {
        let client = OpenAiCompatClient::openai("sk", "gpt-4o").with_max_tokens(100);
        let mut options = ChatOptions {
            model: Some("gpt-4o-mini".into()),
            max_tokens: Some(10),
            ..ChatOptions::default()
        };
        options.extra.insert("seed".into(), serde_json::json!(7));
        let body = client.build_body(&[Message::user("hi")], &[], &options);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 10);
        assert_eq!(body["seed"], 7);
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn functions_become_tools() {
        let client = OpenAiCompatClient::openai("sk", "gpt-4o");
        let functions = vec![FunctionDefinition {
            name: "lookup".into(),
            description: "Look something up".into(),
            params: vec![FunctionParam {
                name: "q".into(),
                kind: "string".into(),
                description: "query".into(),
                required: true,
                enum_values: vec![],
            }],
        }];
        let body = client.build_body(&[Message::user("hi")], &functions, &ChatOptions::default());
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "lookup");
        assert_eq!(body["tools"][0]["function"]["parameters"]["required"][0], "q");
    }

    #[test]
    fn parse_response_with_tool_calls() {
        let data = r#"{
            "choices": [{"message": {"role": "assistant", "content": null,
                "tool_calls": [{"id": "call_1", "type": "function",
                    "function": {"name": "lookup", "arguments": "{\"q\":\"rust\"}"}}]}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        let response = OpenAiCompatClient::to_chat_response(parsed).unwrap();
        assert_eq!(response.message.content, "");
        assert_eq!(response.message.tool_calls[0].name, "lookup");
        assert_eq!(response.usage.prompt_tokens, 12);
        assert_eq!(response.usage.total_tokens(), 15);
    }

    #[test]
    fn empty_choices_is_invalid_response() {
        let parsed: ApiResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        let err = OpenAiCompatClient::to_chat_response(parsed).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }
}
