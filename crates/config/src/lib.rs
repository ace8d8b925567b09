//! Configuration loading, validation, and env expansion for Anyi.
//!
//! A config file declares the chat clients a process can use and the flows
//! built from them. TOML and JSON are both accepted; the format is picked
//! from the file extension.
//!
//! ```toml
//! default_client = "gpt"
//!
//! [[clients]]
//! name = "gpt"
//! type = "openai"
//! model = "gpt-4o-mini"
//! api_key = "${OPENAI_API_KEY}"
//!
//! [[flows]]
//! name = "summarize"
//!
//! [[flows.steps]]
//! name = "draft"
//! max_retry_times = 2
//! executor = { type = "llm", config = { template = "Summarize: {{.Text}}" } }
//! validator = { type = "json" }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnyiConfig {
    /// Client used by flows that don't name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_client: Option<String>,

    /// Chat client definitions
    #[serde(default)]
    pub clients: Vec<ClientConfig>,

    /// Flow definitions
    #[serde(default)]
    pub flows: Vec<FlowConfig>,
}

/// Which provider adapter a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    #[serde(alias = "open_ai")]
    OpenAi,
    #[serde(alias = "azure", alias = "azure_openai")]
    AzureOpenAi,
    Ollama,
    DashScope,
    Zhipu,
    #[serde(alias = "silicon_cloud")]
    SiliconCloud,
    DeepSeek,
    Anthropic,
}

impl ClientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::OpenAi => "openai",
            ClientKind::AzureOpenAi => "azureopenai",
            ClientKind::Ollama => "ollama",
            ClientKind::DashScope => "dashscope",
            ClientKind::Zhipu => "zhipu",
            ClientKind::SiliconCloud => "siliconcloud",
            ClientKind::DeepSeek => "deepseek",
            ClientKind::Anthropic => "anthropic",
        }
    }

    /// Conventional environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ClientKind::OpenAi => Some("OPENAI_API_KEY"),
            ClientKind::AzureOpenAi => Some("AZURE_OPENAI_API_KEY"),
            ClientKind::Ollama => None,
            ClientKind::DashScope => Some("DASHSCOPE_API_KEY"),
            ClientKind::Zhipu => Some("ZHIPU_API_KEY"),
            ClientKind::SiliconCloud => Some("SILICONCLOUD_API_KEY"),
            ClientKind::DeepSeek => Some("DEEPSEEK_API_KEY"),
            ClientKind::Anthropic => Some("ANTHROPIC_API_KEY"),
        }
    }

    /// Model used when the client config doesn't name one.
    pub fn default_model(&self) -> &'static str {
        match self {
            ClientKind::OpenAi | ClientKind::AzureOpenAi => "gpt-4o-mini",
            ClientKind::Ollama => "llama3.2",
            ClientKind::DashScope => "qwen-max",
            ClientKind::Zhipu => "glm-4-flash",
            ClientKind::SiliconCloud => "Qwen/Qwen2.5-7B-Instruct",
            ClientKind::DeepSeek => "deepseek-chat",
            ClientKind::Anthropic => "claude-3-5-haiku-latest",
        }
    }
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat client.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Registry name
    pub name: String,

    /// Provider adapter
    #[serde(rename = "type")]
    pub kind: ClientKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// API key; `${VAR}` references are expanded at load time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Endpoint override; `${VAR}` references are expanded at load time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Azure deployment name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,

    /// Azure `api-version` query parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Anthropic extended-thinking budget in tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    /// HTTP timeout for one request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Smallest extended-thinking budget Anthropic accepts.
const MIN_THINKING_BUDGET: u32 = 1024;

fn default_timeout_secs() -> u64 {
    120
}

impl ClientConfig {
    /// A minimal client definition with defaults for everything else.
    pub fn new(name: impl Into<String>, kind: ClientKind) -> Self {
        Self {
            name: name.into(),
            kind,
            model: None,
            api_key: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
            deployment: None,
            api_version: None,
            thinking_budget: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    /// The configured model, or the provider default.
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(self.kind.default_model())
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .field("thinking_budget", &self.thinking_budget)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// What a flow does when a step's validator rejects its final attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnValidationFailure {
    /// Stop the flow and report the failure
    #[default]
    Fail,
    /// Log a warning and carry on with the unvalidated output
    Continue,
}

/// One flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    pub name: String,

    /// Default client for the flow's steps
    #[serde(default, alias = "client_name", skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,

    #[serde(default)]
    pub on_validation_failure: OnValidationFailure,

    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// One step of a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Diagnostic name; defaults to `step-<index>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<ComponentConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<ComponentConfig>,

    /// Per-step client override
    #[serde(default, alias = "client_name", skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,

    #[serde(default)]
    pub max_retry_times: u32,
}

impl StepConfig {
    /// The step name, or a positional fallback.
    pub fn display_name(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("step-{index}"))
    }
}

/// A typed executor or validator reference with its free-form settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Registered type name (e.g. "llm", "json") or instance name
    #[serde(rename = "type")]
    pub kind: String,

    /// Type-specific settings
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

impl ComponentConfig {
    pub fn new(kind: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            config,
        }
    }
}

impl AnyiConfig {
    /// Load configuration from `$ANYI_CONFIG`, else `./anyi.toml`.
    ///
    /// A missing default file yields an empty configuration.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("ANYI_CONFIG") {
            return Self::load_from(Path::new(&path));
        }

        let path = PathBuf::from("anyi.toml");
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific file; format follows the extension.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let parsed = match extension.as_deref() {
            Some("toml") | None => Self::parse_toml(&content),
            Some("json") => Self::parse_json(&content),
            Some(other) => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        let mut config = parsed.map_err(|reason| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason,
        })?;

        config.expand_env(|name| std::env::var(name).ok());
        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            clients = config.clients.len(),
            flows = config.flows.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate a TOML document (no env expansion).
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config = Self::parse_toml(content).map_err(|reason| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            reason,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document (no env expansion).
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config = Self::parse_json(content).map_err(|reason| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            reason,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn parse_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    fn parse_json(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| e.to_string())
    }

    /// Expand `${VAR}` references in client secrets and endpoints, then fill
    /// missing API keys from each provider's conventional variable.
    pub fn expand_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for client in &mut self.clients {
            if let Some(key) = client.api_key.as_mut() {
                *key = expand_vars(key, &lookup);
            }
            if let Some(url) = client.base_url.as_mut() {
                *url = expand_vars(url, &lookup);
            }
            if client.api_key.as_deref().is_none_or(str::is_empty) {
                client.api_key = client.kind.api_key_env().and_then(&lookup);
            }
        }
    }

    pub fn client(&self, name: &str) -> Option<&ClientConfig> {
        self.clients.iter().find(|c| c.name == name)
    }

    pub fn flow(&self, name: &str) -> Option<&FlowConfig> {
        self.flows.iter().find(|f| f.name == name)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut client_names = HashSet::new();
        for client in &self.clients {
            if client.name.trim().is_empty() {
                return Err(ConfigError::ValidationError("client name must not be empty".into()));
            }
            if !client_names.insert(client.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate client name '{}'",
                    client.name
                )));
            }
            if let Some(t) = client.temperature {
                if !(0.0..=2.0).contains(&t) {
                    return Err(ConfigError::ValidationError(format!(
                        "client '{}': temperature must be between 0.0 and 2.0",
                        client.name
                    )));
                }
            }
            if let Some(budget) = client.thinking_budget {
                if client.kind != ClientKind::Anthropic {
                    return Err(ConfigError::ValidationError(format!(
                        "client '{}': thinking_budget is only supported by anthropic",
                        client.name
                    )));
                }
                if client.max_tokens.is_some_and(|max| max <= budget) {
                    return Err(ConfigError::ValidationError(format!(
                        "client '{}': max_tokens must exceed thinking_budget",
                        client.name
                    )));
                }
                if budget < MIN_THINKING_BUDGET {
                    return Err(ConfigError::ValidationError(format!(
                        "client '{}': thinking_budget must be at least {MIN_THINKING_BUDGET}",
                        client.name
                    )));
                }
            }
            if client.kind == ClientKind::AzureOpenAi
                && (client.base_url.is_none() || client.deployment.is_none())
            {
                return Err(ConfigError::ValidationError(format!(
                    "client '{}': azureopenai requires base_url and deployment",
                    client.name
                )));
            }
        }

        // Clients may also be registered programmatically, so only names
        // declared here are checked against references below when the file
        // declares any clients at all.
        let check_client = |reference: &str, owner: &str| -> Result<(), ConfigError> {
            if !self.clients.is_empty() && !client_names.contains(reference) {
                return Err(ConfigError::ValidationError(format!(
                    "{owner} references unknown client '{reference}'"
                )));
            }
            Ok(())
        };

        if let Some(default) = &self.default_client {
            check_client(default, "default_client")?;
        }

        let mut flow_names = HashSet::new();
        for flow in &self.flows {
            if flow.name.trim().is_empty() {
                return Err(ConfigError::ValidationError("flow name must not be empty".into()));
            }
            if !flow_names.insert(flow.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate flow name '{}'",
                    flow.name
                )));
            }
            if flow.steps.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "flow '{}' has no steps",
                    flow.name
                )));
            }
            if let Some(client) = &flow.client {
                check_client(client, &format!("flow '{}'", flow.name))?;
            }
            for (index, step) in flow.steps.iter().enumerate() {
                let step_name = step.display_name(index);
                match &step.executor {
                    Some(executor) if !executor.kind.trim().is_empty() => {}
                    _ => {
                        return Err(ConfigError::ValidationError(format!(
                            "flow '{}', step '{}': executor type is required",
                            flow.name, step_name
                        )));
                    }
                }
                if step.validator.as_ref().is_some_and(|v| v.kind.trim().is_empty()) {
                    return Err(ConfigError::ValidationError(format!(
                        "flow '{}', step '{}': validator type must not be empty",
                        flow.name, step_name
                    )));
                }
                if let Some(client) = &step.client {
                    check_client(client, &format!("flow '{}', step '{}'", flow.name, step_name))?;
                }
            }
        }

        Ok(())
    }
}

/// Replace every `${NAME}` with the looked-up value (empty when unset).
fn expand_vars(input: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => tracing::warn!(
                        var = %name,
                        "Environment variable referenced in config is not set"
                    ),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Unsupported config format '.{0}' (expected .toml or .json)")]
    UnsupportedFormat(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
