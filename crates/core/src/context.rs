//! The execution context threaded through a flow.
//!
//! A [`FlowContext`] carries the current text payload, a variable store, and
//! an optional opaque [`Memory`] value from one step to the next. Executors
//! get the context by shared reference and hand back a new one, so a retried
//! step always starts from exactly the same input.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::template::Template;

/// A structured value a pipeline designer carries across steps.
///
/// Stored as a type tag plus a serialized payload; executors that know the
/// concrete shape decode it, the engine never looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Free-form type tag (e.g. "task_analysis")
    pub kind: String,

    /// Serialized payload
    pub value: serde_json::Value,
}

impl Memory {
    /// Serialize `value` under the given type tag.
    pub fn new<T: Serialize>(
        kind: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: kind.into(),
            value: serde_json::to_value(value)?,
        })
    }

    /// Decode the payload back into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

/// Text, variables and memory passed between steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowContext {
    /// Current textual payload: the latest step output, or the flow input
    #[serde(default)]
    pub text: String,

    /// Named inputs and outputs
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,

    /// Optional domain state, opaque to the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,
}

impl FlowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose only content is `text`.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// A context whose only content is `variables`; text stays empty.
    pub fn with_variables(variables: HashMap<String, serde_json::Value>) -> Self {
        Self {
            variables,
            ..Self::default()
        }
    }

    pub fn with_memory(mut self, memory: Memory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Builder-style variable insertion.
    pub fn with_variable(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.set_variable(key, value);
        self
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.variables.insert(key.into(), value.into());
    }

    pub fn variable(&self, key: &str) -> Option<&serde_json::Value> {
        self.variables.get(key)
    }

    /// The variable coerced to a string, or `fallback` when absent or not
    /// coercible. Strings, numbers and booleans coerce; null, arrays and
    /// objects do not.
    pub fn get_variable_string(&self, key: &str, fallback: &str) -> String {
        match self.variables.get(key) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::Bool(b)) => b.to_string(),
            _ => fallback.to_string(),
        }
    }

    /// Decode the memory payload, if any.
    pub fn memory_as<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.memory.as_ref().map(Memory::decode)
    }

    /// Render a template string against this context.
    pub fn render(&self, template: &str) -> Result<String, TemplateError> {
        Template::parse(template)?.render(self)
    }
}
