//! Chat client implementations for Anyi.
//!
//! All clients implement the `anyi_core::ChatClient` trait.
//! [`build_client`] turns a `ClientConfig` into the right adapter.

pub mod anthropic;
pub mod factory;
pub mod mcp;
pub mod openai_compat;

pub use anthropic::AnthropicClient;
pub use factory::{build_client, default_base_url};
pub use mcp::{CallToolResult, McpClient, McpContent, McpTool};
pub use openai_compat::OpenAiCompatClient;

use anyi_core::ProviderError;
use std::time::Duration;
use tracing::warn;

/// Build the shared HTTP client for an adapter.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build configured HTTP client, using defaults");
            reqwest::Client::new()
        })
}

/// Map non-success HTTP statuses onto `ProviderError`.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(format!(
            "{provider}: invalid API key or insufficient permissions"
        )));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(provider, status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

pub(crate) fn network_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}
