//! Command executor: run a rendered shell command.
//!
//! Supports a working directory and a timeout. The command line is a
//! template, so it can pull in the current text and variables.

use std::path::PathBuf;
use std::time::Duration;

use anyi_core::{ExecutorError, FlowContext, StepEnv, StepExecutor, Template};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{parse_config, parse_template};

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
struct CommandConfig {
    command: String,
    #[serde(default)]
    output_variable: Option<String>,
    #[serde(default)]
    working_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

/// Runs `sh -c <command>` (`cmd /C` on Windows) and keeps trimmed stdout.
pub struct CommandExecutor {
    command: Template,
    output_variable: Option<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(command: &str) -> Result<Self, ExecutorError> {
        Ok(Self {
            command: parse_template("command", "command", command)?,
            output_variable: None,
            working_dir: None,
            timeout: Duration::from_secs(default_timeout_secs()),
        })
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ExecutorError> {
        let cfg: CommandConfig = parse_config("command", config)?;
        let mut executor =
            Self::new(&cfg.command)?.with_timeout(Duration::from_secs(cfg.timeout_secs));
        executor.output_variable = cfg.output_variable;
        executor.working_dir = cfg.working_dir;
        Ok(executor)
    }

    pub fn with_output_variable(mut self, name: impl Into<String>) -> Self {
        self.output_variable = Some(name.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn shell(command: &str) -> Command {
        if cfg!(target_os = "windows") {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        }
    }
}

#[async_trait]
impl StepExecutor for CommandExecutor {
    fn kind(&self) -> &str {
        "command"
    }

    async fn run(&self, input: &FlowContext, env: &StepEnv) -> Result<FlowContext, ExecutorError> {
        let command = self.command.render(input)?;
        let failed = |reason: String| ExecutorError::Command {
            command: command.clone(),
            reason,
        };

        debug!(step = %env.step_name, command = %command, "Executing command");

        let mut cmd = Self::shell(&command);
        cmd.kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| failed(format!("timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| failed(e.to_string()))?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(command = %command, exit_code = code, "Command failed");
            return Err(failed(format!("exit code {code}: {}", stderr.trim())));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let mut result = input.clone();
        match &self.output_variable {
            Some(var) => result.set_variable(var.clone(), stdout),
            None => result.text = stdout,
        }
        Ok(result)
    }
}
