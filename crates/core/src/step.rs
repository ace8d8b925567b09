//! Executor and validator traits: the pluggable parts of a step.
//!
//! The engine only knows these two traits. An executor turns one
//! [`FlowContext`] into another (calling a model, rendering a template,
//! hitting a tool); a validator looks at the executor's text output and says
//! yes or no.

use std::sync::Arc;

use async_trait::async_trait;

use crate::client::ChatClient;
use crate::context::FlowContext;
use crate::error::ExecutorError;

/// What an executor can see about the step invoking it.
#[derive(Clone)]
pub struct StepEnv {
    /// Name of the running step (diagnostic only)
    pub step_name: String,

    /// 1-based attempt number; greater than 1 after a validator rejection
    pub attempt: u32,

    /// The step's client override, or the flow default
    pub client: Option<Arc<dyn ChatClient>>,
}

impl StepEnv {
    pub fn new(step_name: impl Into<String>, client: Option<Arc<dyn ChatClient>>) -> Self {
        Self {
            step_name: step_name.into(),
            attempt: 1,
            client,
        }
    }

    /// The resolved chat client, or `NoClient` when the step has none.
    pub fn client(&self) -> Result<&Arc<dyn ChatClient>, ExecutorError> {
        self.client.as_ref().ok_or_else(|| ExecutorError::NoClient {
            step: self.step_name.clone(),
        })
    }
}

impl std::fmt::Debug for StepEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepEnv")
            .field("step_name", &self.step_name)
            .field("attempt", &self.attempt)
            .field("client", &self.client.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

/// A unit of work inside a step.
///
/// Implementations must be reentrant: the same instance may serve several
/// concurrent flow runs, and the engine adds no locking.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Short type name used in logs (e.g. "llm", "template").
    fn kind(&self) -> &str;

    /// Whether this executor needs a chat client to run.
    fn requires_client(&self) -> bool {
        false
    }

    /// Produce a new context from `input`. Must not assume `input` is the
    /// output of a previous attempt.
    async fn run(&self, input: &FlowContext, env: &StepEnv) -> Result<FlowContext, ExecutorError>;
}

/// A pass/fail check on a step's text output. Expected to be side-effect free.
pub trait StepValidator: Send + Sync {
    fn kind(&self) -> &str;

    fn validate(&self, output: &str, env: &StepEnv) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl StepExecutor for Upper {
        fn kind(&self) -> &str {
            "upper"
        }

        async fn run(
            &self,
            input: &FlowContext,
            _env: &StepEnv,
        ) -> Result<FlowContext, ExecutorError> {
            let mut out = input.clone();
            out.text = input.text.to_uppercase();
            Ok(out)
        }
    }

    #[tokio::test]
    async fn executor_returns_new_context() {
        let input = FlowContext::with_text("abc");
        let out = Upper.run(&input, &StepEnv::new("s", None)).await.unwrap();
        assert_eq!(out.text, "ABC");
        assert_eq!(input.text, "abc");
        assert!(!Upper.requires_client());
    }

    #[test]
    fn missing_client_is_reported_with_step_name() {
        let env = StepEnv::new("draft", None);
        let err = env.client().err().unwrap();
        assert!(matches!(err, ExecutorError::NoClient { ref step } if step == "draft"));
    }
}
