//! `anyi run`: Run one flow and print its result.

use std::collections::HashMap;
use std::path::Path;

use anyi_core::{FlowContext, FlowError};
use anyi_flow::Registry;
use tokio::io::AsyncReadExt;
use tracing::{debug, error};

/// Parse `key=value`; the value is JSON when it parses as JSON, else a string.
pub fn parse_var(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{s}'"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub async fn run(
    config_path: Option<&Path>,
    flow_name: &str,
    input: Option<String>,
    vars: Vec<(String, serde_json::Value)>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;

    let registry = Registry::with_builtins();
    registry.load_config(&config)?;
    let flow = registry.get_flow(flow_name)?;

    let text = match input.as_deref() {
        Some("-") => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
        Some(text) => text.to_string(),
        None => String::new(),
    };

    debug!(
        flow = flow_name,
        steps = flow.steps().len(),
        variables = vars.len(),
        "Running flow from CLI"
    );
    let ctx = FlowContext {
        text,
        variables: vars.into_iter().collect::<HashMap<_, _>>(),
        memory: None,
    };

    match flow.run(ctx).await {
        Ok(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.text);
            }
            Ok(())
        }
        Err(failure) => {
            error!(
                flow = %failure.flow,
                step = failure.error.step().unwrap_or("-"),
                "Flow run failed"
            );
            eprintln!("❌ {}", describe(&failure.error));
            if json {
                println!("{}", serde_json::to_string_pretty(&failure.context)?);
            }
            Err(failure.into())
        }
    }
}

fn describe(error: &FlowError) -> String {
    match error {
        FlowError::Executor {
            step,
            attempt,
            source,
        } => format!("Step '{step}' failed on attempt {attempt}: {source}"),
        FlowError::ValidationExhausted { step, attempts } => {
            format!("Step '{step}' output was rejected {attempts} time(s)")
        }
        FlowError::Configuration(msg) => format!("Configuration error: {msg}"),
    }
}
