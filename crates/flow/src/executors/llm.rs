//! LLM executor: render a prompt, ask the step's chat client, keep the reply.

use anyi_core::{
    ChatOptions, ExecutorError, FlowContext, Message, ResponseFormat, StepEnv, StepExecutor,
    Template,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{parse_config, parse_template};
use crate::validators::strip_code_fence;

pub const PROMPT_TOKENS_VARIABLE: &str = "_prompt_tokens";
pub const COMPLETION_TOKENS_VARIABLE: &str = "_completion_tokens";

#[derive(Debug, Deserialize)]
struct LlmConfig {
    template: String,
    #[serde(default, alias = "systemMessage")]
    system_message: Option<String>,
    #[serde(default, alias = "outputJSON")]
    output_json: bool,
    #[serde(default)]
    output_variable: Option<String>,
    #[serde(default)]
    record_usage: bool,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
}

/// Sends `[system?, user]` to the resolved client and stores the reply.
pub struct LlmExecutor {
    template: Template,
    system_message: Option<Template>,
    output_variable: Option<String>,
    record_usage: bool,
    options: ChatOptions,
}

impl LlmExecutor {
    pub fn new(template: &str) -> Result<Self, ExecutorError> {
        Ok(Self {
            template: parse_template("llm", "template", template)?,
            system_message: None,
            output_variable: None,
            record_usage: false,
            options: ChatOptions::default(),
        })
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ExecutorError> {
        let cfg: LlmConfig = parse_config("llm", config)?;
        let mut executor = Self::new(&cfg.template)?;
        if let Some(system) = cfg.system_message {
            executor = executor.with_system_message(&system)?;
        }
        if cfg.output_json {
            executor = executor.with_json_output();
        }
        if let Some(var) = cfg.output_variable {
            executor = executor.with_output_variable(var);
        }
        executor.record_usage = cfg.record_usage;
        executor.options.model = cfg.model;
        executor.options.temperature = cfg.temperature;
        executor.options.max_tokens = cfg.max_tokens;
        Ok(executor)
    }

    pub fn with_system_message(mut self, system_message: &str) -> Result<Self, ExecutorError> {
        self.system_message = Some(parse_template("llm", "system_message", system_message)?);
        Ok(self)
    }

    /// Ask the provider for a JSON object reply.
    pub fn with_json_output(mut self) -> Self {
        self.options.format = ResponseFormat::Json;
        self
    }

    /// Also store the reply in this variable.
    pub fn with_output_variable(mut self, name: impl Into<String>) -> Self {
        self.output_variable = Some(name.into());
        self
    }

    /// Record token usage into `_prompt_tokens` / `_completion_tokens`.
    pub fn with_usage_recording(mut self) -> Self {
        self.record_usage = true;
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl StepExecutor for LlmExecutor {
    fn kind(&self) -> &str {
        "llm"
    }

    fn requires_client(&self) -> bool {
        true
    }

    async fn run(&self, input: &FlowContext, env: &StepEnv) -> Result<FlowContext, ExecutorError> {
        let client = env.client()?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_message {
            messages.push(Message::system(system.render(input)?));
        }
        messages.push(Message::user(self.template.render(input)?));

        debug!(
            step = %env.step_name,
            client = client.name(),
            attempt = env.attempt,
            "Calling chat client"
        );
        let response = client.chat(&messages, &self.options).await?;
        let reply = response.message.content;

        let mut output = input.clone();
        if let Some(var) = &self.output_variable {
            let value = match self.options.format {
                ResponseFormat::Json => serde_json::from_str(strip_code_fence(&reply))
                    .unwrap_or_else(|_| serde_json::Value::String(reply.clone())),
                ResponseFormat::Text => serde_json::Value::String(reply.clone()),
            };
            output.set_variable(var.clone(), value);
        }
        if self.record_usage {
            output.set_variable(PROMPT_TOKENS_VARIABLE, response.usage.prompt_tokens);
            output.set_variable(COMPLETION_TOKENS_VARIABLE, response.usage.completion_tokens);
        }
        output.text = reply;
        Ok(output)
    }
}
