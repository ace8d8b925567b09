//! Template executor: pure rendering, no chat client.

use anyi_core::{ExecutorError, FlowContext, StepEnv, StepExecutor, Template};
use async_trait::async_trait;
use serde::Deserialize;

use super::{parse_config, parse_template};

#[derive(Debug, Deserialize)]
struct TemplateConfig {
    template: String,
    #[serde(default)]
    output_variable: Option<String>,
}

/// Renders its template against the input. The result replaces `text`, or
/// goes into `output_variable` when one is set.
pub struct TemplateExecutor {
    template: Template,
    output_variable: Option<String>,
}

impl TemplateExecutor {
    pub fn new(template: &str) -> Result<Self, ExecutorError> {
        Ok(Self {
            template: parse_template("template", "template", template)?,
            output_variable: None,
        })
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ExecutorError> {
        let cfg: TemplateConfig = parse_config("template", config)?;
        let executor = Self::new(&cfg.template)?;
        Ok(match cfg.output_variable {
            Some(var) => executor.with_output_variable(var),
            None => executor,
        })
    }

    pub fn with_output_variable(mut self, name: impl Into<String>) -> Self {
        self.output_variable = Some(name.into());
        self
    }
}

#[async_trait]
impl StepExecutor for TemplateExecutor {
    fn kind(&self) -> &str {
        "template"
    }

    async fn run(&self, input: &FlowContext, _env: &StepEnv) -> Result<FlowContext, ExecutorError> {
        let rendered = self.template.render(input)?;
        let mut output = input.clone();
        match &self.output_variable {
            Some(var) => output.set_variable(var.clone(), rendered),
            None => output.text = rendered,
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_into_text() {
        let executor = TemplateExecutor::new("Hello, {{.Variables.Name}}!").unwrap();
        let input = FlowContext::new().with_variable("Name", "world");
        let out = executor.run(&input, &StepEnv::new("t", None)).await.unwrap();
        assert_eq!(out.text, "Hello, world!");
        assert_eq!(out.variables, input.variables);
    }

    #[tokio::test]
    async fn renders_into_variable() {
        let executor = TemplateExecutor::from_config(&serde_json::json!({
            "template": "{{.Text}}!",
            "output_variable": "shout"
        }))
        .unwrap();
        let out = executor
            .run(&FlowContext::with_text("hey"), &StepEnv::new("t", None))
            .await
            .unwrap();
        assert_eq!(out.text, "hey");
        assert_eq!(out.get_variable_string("shout", ""), "hey!");
    }

    #[test]
    fn does_not_need_a_client() {
        assert!(!TemplateExecutor::new("x").unwrap().requires_client());
    }
}
