//! Strip `<think>` blocks emitted by reasoning models.

use anyi_core::{ExecutorError, FlowContext, StepEnv, StepExecutor};
use async_trait::async_trait;
use serde::Deserialize;

use super::parse_config;

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

#[derive(Debug, Default, Deserialize)]
struct ThinkFilterConfig {
    #[serde(default)]
    output_variable: Option<String>,
}

/// Removes every `<think>…</think>` block from `text`. The collected
/// thoughts can be kept in a variable.
#[derive(Debug, Default)]
pub struct ThinkFilterExecutor {
    output_variable: Option<String>,
}

impl ThinkFilterExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ExecutorError> {
        let cfg: ThinkFilterConfig = parse_config("think_filter", config)?;
        Ok(Self {
            output_variable: cfg.output_variable,
        })
    }

    /// Keep the stripped thoughts in this variable.
    pub fn with_output_variable(mut self, name: impl Into<String>) -> Self {
        self.output_variable = Some(name.into());
        self
    }

    /// Split `text` into (answer, thoughts). An unclosed block runs to the
    /// end of the text.
    pub fn split(&self, text: &str) -> (String, String) {
        let mut answer = String::with_capacity(text.len());
        let mut thoughts: Vec<&str> = Vec::new();
        let mut rest = text;

        while let Some(start) = rest.find(OPEN_TAG) {
            answer.push_str(&rest[..start]);
            let body = &rest[start + OPEN_TAG.len()..];
            let (thought, after) = match body.find(CLOSE_TAG) {
                Some(end) => (&body[..end], &body[end + CLOSE_TAG.len()..]),
                None => (body, ""),
            };
            let thought = thought.trim();
            if !thought.is_empty() {
                thoughts.push(thought);
            }
            rest = after;
        }
        answer.push_str(rest);

        (answer.trim().to_string(), thoughts.join("\n"))
    }
}

#[async_trait]
impl StepExecutor for ThinkFilterExecutor {
    fn kind(&self) -> &str {
        "think_filter"
    }

    async fn run(&self, input: &FlowContext, _env: &StepEnv) -> Result<FlowContext, ExecutorError> {
        let (answer, thoughts) = self.split(&input.text);
        let mut output = input.clone();
        output.text = answer;
        if let Some(var) = &self.output_variable {
            output.set_variable(var.clone(), thoughts);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_answer_from_thoughts() {
        let filter = ThinkFilterExecutor::new();
        let (answer, thoughts) =
            filter.split("<think>\nfirst idea\n</think>\nThe answer is 42.<think>check</think>");
        assert_eq!(answer, "The answer is 42.");
        assert_eq!(thoughts, "first idea\ncheck");
    }

    #[test]
    fn unclosed_block_is_dropped() {
        let filter = ThinkFilterExecutor::new();
        assert_eq!(filter.split("Sure.<think>still going").0, "Sure.");
    }

    #[test]
    fn text_without_thoughts_is_untouched() {
        let filter = ThinkFilterExecutor::new();
        assert_eq!(filter.split("plain").0, "plain");
        assert_eq!(filter.split("plain").1, "");
    }

    #[tokio::test]
    async fn saves_thoughts_when_configured() {
        let filter = ThinkFilterExecutor::from_config(&serde_json::json!({
            "output_variable": "reasoning"
        }))
        .unwrap();
        let out = filter
            .run(
                &FlowContext::with_text("<think>hmm</think>Yes."),
                &StepEnv::new("filter", None),
            )
            .await
            .unwrap();
        assert_eq!(out.text, "Yes.");
        assert_eq!(out.get_variable_string("reasoning", ""), "hmm");
    }
}
