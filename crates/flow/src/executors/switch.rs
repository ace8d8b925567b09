//! Decision executor: map a value onto one of several outcomes.

use std::collections::HashMap;

use anyi_core::{ExecutorError, FlowContext, StepEnv, StepExecutor};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::parse_config;

fn default_output_variable() -> String {
    "route".into()
}

#[derive(Debug, Deserialize)]
struct SwitchConfig {
    cases: HashMap<String, String>,
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    variable: Option<String>,
    #[serde(default = "default_output_variable")]
    output_variable: String,
    #[serde(default)]
    ignore_case: bool,
}

/// Matches the trimmed text (or a named variable) against `cases` and writes
/// the matched outcome, or `default`, into `output_variable`.
pub struct SwitchExecutor {
    cases: HashMap<String, String>,
    default: Option<String>,
    variable: Option<String>,
    output_variable: String,
    ignore_case: bool,
}

impl SwitchExecutor {
    pub fn from_config(config: &serde_json::Value) -> Result<Self, ExecutorError> {
        let cfg: SwitchConfig = parse_config("switch", config)?;
        if cfg.cases.is_empty() && cfg.default.is_none() {
            return Err(ExecutorError::InvalidConfig {
                kind: "switch".into(),
                reason: "needs at least one case or a default".into(),
            });
        }
        let cases = if cfg.ignore_case {
            let mut folded = HashMap::with_capacity(cfg.cases.len());
            for (key, outcome) in cfg.cases {
                let lower = key.to_lowercase();
                if folded.insert(lower.clone(), outcome).is_some() {
                    return Err(ExecutorError::InvalidConfig {
                        kind: "switch".into(),
                        reason: format!("cases collide on '{lower}' when ignore_case is set"),
                    });
                }
            }
            folded
        } else {
            cfg.cases
        };
        Ok(Self {
            cases,
            default: cfg.default,
            variable: cfg.variable,
            output_variable: cfg.output_variable,
            ignore_case: cfg.ignore_case,
        })
    }

    fn subject(&self, input: &FlowContext) -> String {
        let raw = match &self.variable {
            Some(var) => input.get_variable_string(var, ""),
            None => input.text.clone(),
        };
        let trimmed = raw.trim();
        if self.ignore_case {
            trimmed.to_lowercase()
        } else {
            trimmed.to_string()
        }
    }
}

#[async_trait]
impl StepExecutor for SwitchExecutor {
    fn kind(&self) -> &str {
        "switch"
    }

    async fn run(&self, input: &FlowContext, env: &StepEnv) -> Result<FlowContext, ExecutorError> {
        let subject = self.subject(input);
        let outcome = self
            .cases
            .get(&subject)
            .or(self.default.as_ref())
            .ok_or_else(|| {
                ExecutorError::Other(format!("switch: no case matches '{subject}' and no default"))
            })?;

        debug!(step = %env.step_name, subject = %subject, outcome = %outcome, "Switch matched");
        let mut output = input.clone();
        output.set_variable(self.output_variable.clone(), outcome.clone());
        Ok(output)
    }
}
