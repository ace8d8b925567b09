//! Error types for the Anyi domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each layer (provider, template, executor, flow, registry) has its own enum;
//! [`Error`] aggregates them for callers that don't care which layer failed.

use thiserror::Error;

/// The top-level error type for all Anyi operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Template errors ---
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    // --- Executor errors ---
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    // --- Flow errors ---
    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    // --- Registry errors ---
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Layer errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Operation not supported by {provider}: {operation}")]
    NotSupported { provider: String, operation: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Failures while parsing or rendering a text template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template syntax error at byte {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("template path '{path}' could not be resolved")]
    Unresolved { path: String },
}

/// Anything an executor can report. Propagated untouched by the step layer.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("no chat client available for step '{step}'")]
    NoClient { step: String },

    #[error("invalid {kind} executor configuration: {reason}")]
    InvalidConfig { kind: String, reason: String },

    #[error("tool call failed: {0}")]
    Tool(String),

    #[error("command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// The engine's error taxonomy.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("step '{step}' failed on attempt {attempt}: {source}")]
    Executor {
        step: String,
        attempt: u32,
        #[source]
        source: ExecutorError,
    },

    #[error("step '{step}' output rejected by validator after {attempts} attempt(s)")]
    ValidationExhausted { step: String, attempts: u32 },
}

impl FlowError {
    /// Name of the step the error refers to, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            FlowError::Configuration(_) => None,
            FlowError::Executor { step, .. } | FlowError::ValidationExhausted { step, .. } => {
                Some(step)
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} '{name}' is already registered")]
    Duplicate { kind: &'static str, name: String },

    #[error("failed to build {kind} '{name}': {reason}")]
    Build {
        kind: &'static str,
        name: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn executor_failure_names_step_and_attempt() {
        let err = FlowError::Executor {
            step: "summarize".into(),
            attempt: 2,
            source: ExecutorError::Tool("boom".into()),
        };
        let text = err.to_string();
        assert!(text.contains("summarize"));
        assert!(text.contains("attempt 2"));
        assert!(text.contains("boom"));
        assert_eq!(err.step(), Some("summarize"));
    }

    #[test]
    fn template_error_is_transparent_through_executor() {
        let err = ExecutorError::from(TemplateError::Unresolved {
            path: ".Variables.x".into(),
        });
        assert!(err.to_string().contains(".Variables.x"));
    }

    #[test]
    fn registry_not_found_message() {
        let err = RegistryError::NotFound {
            kind: "client",
            name: "gpt".into(),
        };
        assert_eq!(err.to_string(), "client 'gpt' not found");
    }
}
