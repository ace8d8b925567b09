//! Built-in step executors.
//!
//! Each executor has a `from_config` constructor taking the `config` table of
//! a step's `executor` entry; the registry maps the type name to it.

pub mod command;
pub mod llm;
pub mod mcp;
pub mod set_variables;
pub mod switch;
pub mod template;
pub mod think_filter;

pub use command::CommandExecutor;
pub use llm::LlmExecutor;
pub use mcp::McpExecutor;
pub use set_variables::SetVariablesExecutor;
pub use switch::SwitchExecutor;
pub use template::TemplateExecutor;
pub use think_filter::ThinkFilterExecutor;

use anyi_core::ExecutorError;
use serde::de::DeserializeOwned;

/// Deserialize an executor config, treating a missing table as empty.
pub(crate) fn parse_config<T: DeserializeOwned>(
    kind: &str,
    config: &serde_json::Value,
) -> Result<T, ExecutorError> {
    let value = if config.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        config.clone()
    };
    serde_json::from_value(value).map_err(|e| ExecutorError::InvalidConfig {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a template, reporting syntax errors as invalid configuration.
pub(crate) fn parse_template(
    kind: &str,
    field: &str,
    source: &str,
) -> Result<anyi_core::Template, ExecutorError> {
    anyi_core::Template::parse(source).map_err(|e| ExecutorError::InvalidConfig {
        kind: kind.to_string(),
        reason: format!("{field}: {e}"),
    })
}
