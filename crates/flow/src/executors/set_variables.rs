//! Set variables from configuration.

use anyi_core::{ExecutorError, FlowContext, StepEnv, StepExecutor, Template};
use async_trait::async_trait;
use serde::Deserialize;

use super::{parse_config, parse_template};

#[derive(Debug, Deserialize)]
struct SetVariablesConfig {
    variables: serde_json::Map<String, serde_json::Value>,
}

enum VariableValue {
    Template(Template),
    Literal(serde_json::Value),
}

/// Writes configured variables into the context. String values are
/// templates rendered against the step input; other JSON values are copied.
pub struct SetVariablesExecutor {
    variables: Vec<(String, VariableValue)>,
}

impl SetVariablesExecutor {
    pub fn from_config(config: &serde_json::Value) -> Result<Self, ExecutorError> {
        let cfg: SetVariablesConfig = parse_config("set_variables", config)?;
        let variables = cfg
            .variables
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    serde_json::Value::String(s) => {
                        VariableValue::Template(parse_template("set_variables", &name, &s)?)
                    }
                    other => VariableValue::Literal(other),
                };
                Ok((name, value))
            })
            .collect::<Result<Vec<_>, ExecutorError>>()?;
        Ok(Self { variables })
    }
}

#[async_trait]
impl StepExecutor for SetVariablesExecutor {
    fn kind(&self) -> &str {
        "set_variables"
    }

    async fn run(&self, input: &FlowContext, _env: &StepEnv) -> Result<FlowContext, ExecutorError> {
        let mut output = input.clone();
        for (name, value) in &self.variables {
            let value = match value {
                VariableValue::Template(t) => serde_json::Value::String(t.render(input)?),
                VariableValue::Literal(v) => v.clone(),
            };
            output.set_variable(name.clone(), value);
        }
        Ok(output)
    }
}
