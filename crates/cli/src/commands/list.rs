//! `anyi list`: List configured flows and their steps.

use std::path::Path;

use anyi_config::{AnyiConfig, OnValidationFailure};

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    print!("{}", render(&config));
    Ok(())
}

fn render(config: &AnyiConfig) -> String {
    if config.flows.is_empty() {
        return "No flows configured.\n".into();
    }

    let mut out = String::new();
    for flow in &config.flows {
        let client = flow
            .client
            .as_deref()
            .or(config.default_client.as_deref())
            .unwrap_or("-");
        let policy = match flow.on_validation_failure {
            OnValidationFailure::Fail => "fail",
            OnValidationFailure::Continue => "continue",
        };
        out.push_str(&format!(
            "{} (client: {client}, on validation failure: {policy})\n",
            flow.name
        ));

        for (index, step) in flow.steps.iter().enumerate() {
            let executor = step.executor.as_ref().map_or("?", |e| e.kind.as_str());
            let mut line = format!("  {}. {} [{executor}]", index + 1, step.display_name(index));
            if let Some(validator) = &step.validator {
                line.push_str(&format!(" validator={}", validator.kind));
            }
            if step.max_retry_times > 0 {
                line.push_str(&format!(" retries={}", step.max_retry_times));
            }
            if let Some(client) = &step.client {
                line.push_str(&format!(" client={client}"));
            }
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_flows_and_steps() {
        let config = AnyiConfig::from_toml_str(
            r#"
            default_client = "gpt"

            [[clients]]
            name = "gpt"
            type = "openai"

            [[flows]]
            name = "summarize"

            [[flows.steps]]
            name = "draft"
            max_retry_times = 2
            executor = { type = "llm", config = { template = "{{.Text}}" } }
            validator = { type = "json" }

            [[flows.steps]]
            executor = { type = "think_filter" }
            "#,
        )
        .unwrap();

        let out = render(&config);
        assert_eq!(
            out,
            "summarize (client: gpt, on validation failure: fail)\n\
             \x20 1. draft [llm] validator=json retries=2\n\
             \x20 2. step-1 [think_filter]\n"
        );
    }

    #[test]
    fn empty_config() {
        assert_eq!(render(&AnyiConfig::default()), "No flows configured.\n");
    }
}
