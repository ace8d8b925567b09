//! Chat client trait: the abstraction over LLM backends.
//!
//! A `ChatClient` knows how to send a list of messages to a model and get one
//! message back. Executors only ever see this trait; which provider sits
//! behind it is decided by configuration.
//!
//! Implementations: OpenAI-compatible family (OpenAI, Azure, Ollama,
//! DashScope, Zhipu, SiliconCloud, DeepSeek) and Anthropic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// Response format hint passed to the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// Per-call options. Anything a provider understands beyond the recognized
/// fields goes into `extra` and is passed through verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Response format hint
    #[serde(default)]
    pub format: ResponseFormat,

    /// Model override (falls back to the client's configured model)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Provider-specific passthrough fields, merged into the request body
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatOptions {
    pub fn json() -> Self {
        Self {
            format: ResponseFormat::Json,
            ..Self::default()
        }
    }
}

/// Token accounting for one chat call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl ResponseInfo {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A complete response from a chat client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    #[serde(default)]
    pub usage: ResponseInfo,
}

/// One parameter of a callable function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionParam {
    pub name: String,

    /// JSON Schema type name ("string", "number", "boolean", ...)
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

/// A function the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub params: Vec<FunctionParam>,
}

impl FunctionDefinition {
    /// JSON Schema object describing the parameters, as providers expect it.
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for param in &self.params {
            let mut prop = serde_json::json!({
                "type": param.kind,
                "description": param.description,
            });
            if !param.enum_values.is_empty() {
                prop["enum"] = serde_json::json!(param.enum_values);
            }
            properties.insert(param.name.clone(), prop);
            if param.required {
                required.push(param.name.clone());
            }
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// The core chat capability.
///
/// Every provider adapter implements this trait. Executors call `chat()`
/// without knowing which provider is behind it.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// A human-readable name for this client (usually its config name).
    fn name(&self) -> &str;

    /// Send messages and get a single response message back.
    async fn chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> std::result::Result<ChatResponse, ProviderError>;

    /// Like `chat()`, but the model may answer with function calls.
    ///
    /// Default implementation reports that function calling isn't supported.
    async fn chat_with_functions(
        &self,
        _messages: &[Message],
        _functions: &[FunctionDefinition],
        _options: &ChatOptions,
    ) -> std::result::Result<ChatResponse, ProviderError> {
        Err(ProviderError::NotSupported {
            provider: self.name().to_string(),
            operation: "function calling".into(),
        })
    }
}
