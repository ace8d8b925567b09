//! Build chat clients from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyi_config::{ClientConfig, ClientKind};
use anyi_core::client::ChatClient;
use anyi_core::error::ProviderError;
use tracing::{debug, warn};

use crate::anthropic::{self, AnthropicClient};
use crate::openai_compat::OpenAiCompatClient;

const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

/// Get the default base URL for a provider kind.
///
/// Azure has no default; every resource has its own endpoint.
pub fn default_base_url(kind: ClientKind) -> Option<&'static str> {
    match kind {
        ClientKind::OpenAi => Some("https://api.openai.com/v1"),
        ClientKind::AzureOpenAi => None,
        ClientKind::Ollama => Some("http://localhost:11434/v1"),
        ClientKind::DashScope => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
        ClientKind::Zhipu => Some("https://open.bigmodel.cn/api/paas/v4"),
        ClientKind::SiliconCloud => Some("https://api.siliconflow.cn/v1"),
        ClientKind::DeepSeek => Some("https://api.deepseek.com/v1"),
        ClientKind::Anthropic => Some(anthropic::DEFAULT_BASE_URL),
    }
}

/// Build one chat client from its configuration.
pub fn build_client(config: &ClientConfig) -> Result<Arc<dyn ChatClient>, ProviderError> {
    let api_key = config.api_key.clone().unwrap_or_default();
    if api_key.is_empty() && config.kind.api_key_env().is_some() {
        warn!(
            client = %config.name,
            kind = %config.kind,
            "No API key configured; requests will likely be rejected"
        );
    }

    let timeout = Duration::from_secs(config.timeout_secs);
    let model = config.model_or_default().to_string();

    debug!(client = %config.name, kind = %config.kind, model = %model, "Building chat client");

    let client: Arc<dyn ChatClient> = match config.kind {
        ClientKind::Anthropic => {
            let mut client = AnthropicClient::new(api_key, model)
                .with_name(&config.name)
                .with_timeout(timeout);
            if let Some(ref base_url) = config.base_url {
                client = client.with_base_url(base_url);
            }
            if let Some(temperature) = config.temperature {
                client = client.with_temperature(temperature);
            }
            if let Some(max_tokens) = config.max_tokens {
                client = client.with_max_tokens(max_tokens);
            }
            if let Some(budget) = config.thinking_budget {
                client = client.with_extended_thinking(budget);
            }
            Arc::new(client)
        }
        ClientKind::AzureOpenAi => {
            let base_url = config.base_url.as_deref().ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "client '{}': azureopenai requires base_url",
                    config.name
                ))
            })?;
            let deployment = config.deployment.as_deref().ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "client '{}': azureopenai requires deployment",
                    config.name
                ))
            })?;
            let api_version = config
                .api_version
                .as_deref()
                .unwrap_or(DEFAULT_AZURE_API_VERSION);
            let client =
                OpenAiCompatClient::azure(&config.name, base_url, deployment, api_version, api_key)
                    .with_timeout(timeout);
            Arc::new(apply_sampling(client, config))
        }
        kind => {
            let base_url = config
                .base_url
                .as_deref()
                .or_else(|| default_base_url(kind))
                .ok_or_else(|| {
                    ProviderError::NotConfigured(format!(
                        "client '{}': no base_url for {kind}",
                        config.name
                    ))
                })?;
            let client = OpenAiCompatClient::new(&config.name, base_url, api_key, model)
                .with_timeout(timeout);
            Arc::new(apply_sampling(client, config))
        }
    };

    Ok(client)
}

fn apply_sampling(mut client: OpenAiCompatClient, config: &ClientConfig) -> OpenAiCompatClient {
    if let Some(temperature) = config.temperature {
        client = client.with_temperature(temperature);
    }
    if let Some(max_tokens) = config.max_tokens {
        client = client.with_max_tokens(max_tokens);
    }
    client
}
