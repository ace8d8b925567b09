//! The flow engine: runs steps in order, threading the context through.

use std::collections::HashMap;
use std::sync::Arc;

use anyi_core::{ChatClient, FlowContext, FlowError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::step::{Step, StepError};

/// What to do when a step exhausts its retries on validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// Stop the flow and report `ValidationExhausted`.
    #[default]
    Fatal,
    /// Log a warning and continue with the last (rejected) output.
    Continue,
}

/// A failed run: the error plus the context the flow stopped with.
///
/// For an executor error `context` is the input of the failing step; for
/// validation exhaustion it is the rejected output.
#[derive(Debug, Error)]
#[error("flow '{flow}' failed: {error}")]
pub struct FlowFailure {
    pub flow: String,
    pub context: FlowContext,
    #[source]
    pub error: FlowError,
}

/// An ordered sequence of steps sharing a default chat client.
pub struct Flow {
    name: String,
    default_client: Option<Arc<dyn ChatClient>>,
    steps: Vec<Step>,
    validation_policy: ValidationPolicy,
}

impl Flow {
    /// Build a flow. Fails when there are no steps, or when a step needs a
    /// chat client and neither it nor the flow provides one.
    pub fn new(
        name: impl Into<String>,
        default_client: Option<Arc<dyn ChatClient>>,
        steps: Vec<Step>,
    ) -> Result<Self, FlowError> {
        let name = name.into();

        if steps.is_empty() {
            return Err(FlowError::Configuration(format!(
                "flow '{name}' has no steps"
            )));
        }

        if let Some(step) = steps
            .iter()
            .find(|s| !s.is_runnable_with(default_client.as_ref()))
        {
            return Err(FlowError::Configuration(format!(
                "flow '{name}': step '{}' needs a chat client but neither the step nor the flow has one",
                step.name()
            )));
        }

        Ok(Self {
            name,
            default_client,
            steps,
            validation_policy: ValidationPolicy::default(),
        })
    }

    pub fn with_validation_policy(mut self, policy: ValidationPolicy) -> Self {
        self.validation_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn default_client(&self) -> Option<&Arc<dyn ChatClient>> {
        self.default_client.as_ref()
    }

    pub fn validation_policy(&self) -> ValidationPolicy {
        self.validation_policy
    }

    /// Run every step in order, feeding each one the previous output.
    pub async fn run(&self, ctx: FlowContext) -> Result<FlowContext, FlowFailure> {
        let run_id = uuid::Uuid::new_v4();
        let span = info_span!("flow", flow = %self.name, run_id = %run_id);

        async move {
            info!(steps = self.steps.len(), "Flow started");
            let mut ctx = ctx;

            for (index, step) in self.steps.iter().enumerate() {
                debug!(step = step.name(), index, "Entering step");

                match step.run(&ctx, self.default_client.clone()).await {
                    Ok(next) => ctx = next,
                    Err(err @ StepError::Executor { .. }) => {
                        let (error, _) = err.into_parts();
                        warn!(step = step.name(), error = %error, "Flow stopped by executor error");
                        return Err(self.failure(ctx, error));
                    }
                    Err(err @ StepError::ValidationExhausted { .. }) => {
                        let (error, output) = err.into_parts();
                        let output = output.unwrap_or_default();
                        match self.validation_policy {
                            ValidationPolicy::Fatal => {
                                warn!(step = step.name(), "Flow stopped by validation failure");
                                return Err(self.failure(output, error));
                            }
                            ValidationPolicy::Continue => {
                                warn!(
                                    step = step.name(),
                                    "Continuing with output rejected by validator"
                                );
                                ctx = output;
                            }
                        }
                    }
                }
            }

            info!("Flow finished");
            Ok(ctx)
        }
        .instrument(span)
        .await
    }

    /// Run with an empty text and the given variables.
    pub async fn run_with_variables(
        &self,
        variables: HashMap<String, serde_json::Value>,
    ) -> Result<FlowContext, FlowFailure> {
        self.run(FlowContext::with_variables(variables)).await
    }

    /// Run with the given text and no variables.
    pub async fn run_with_input(
        &self,
        text: impl Into<String>,
    ) -> Result<FlowContext, FlowFailure> {
        self.run(FlowContext::with_text(text)).await
    }

    fn failure(&self, context: FlowContext, error: FlowError) -> FlowFailure {
        FlowFailure {
            flow: self.name.clone(),
            context,
            error,
        }
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field(
                "default_client",
                &self.default_client.as_ref().map(|c| c.name().to_string()),
            )
            .field("steps", &self.steps)
            .field("validation_policy", &self.validation_policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::{LlmExecutor, TemplateExecutor};
    use crate::testing::{CountingExecutor, FixedValidator, RejectTimes, ScriptedClient};
    use anyi_core::{ExecutorError, StepEnv, StepExecutor};
    use async_trait::async_trait;

    /// Appends its index to the `sequence` variable.
    struct AppendIndex(usize);

    #[async_trait]
    impl StepExecutor for AppendIndex {
        fn kind(&self) -> &str {
            "append_index"
        }

        async fn run(
            &self,
            input: &FlowContext,
            _: &StepEnv,
        ) -> Result<FlowContext, ExecutorError> {
            let mut out = input.clone();
            let mut seq = out
                .variable("sequence")
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default();
            seq.push(serde_json::json!(self.0));
            out.set_variable("sequence", seq);
            Ok(out)
        }
    }

    struct Failing;

    #[async_trait]
    impl StepExecutor for Failing {
        fn kind(&self) -> &str {
            "failing"
        }

        async fn run(&self, _: &FlowContext, _: &StepEnv) -> Result<FlowContext, ExecutorError> {
            Err(ExecutorError::Other("broken".into()))
        }
    }

    #[tokio::test]
    async fn steps_run_in_order() {
        let steps = (0..6)
            .map(|i| Step::new(format!("s{i}"), Arc::new(AppendIndex(i))))
            .collect();
        let flow = Flow::new("ordered", None, steps).unwrap();

        let out = flow.run(FlowContext::new()).await.unwrap();
        assert_eq!(
            out.variable("sequence").unwrap(),
            &serde_json::json!([0, 1, 2, 3, 4, 5])
        );
    }

    #[tokio::test]
    async fn executor_error_stops_the_flow() {
        let before = Arc::new(CountingExecutor::setting_text("first"));
        let after = Arc::new(CountingExecutor::setting_text("never"));
        let flow = Flow::new(
            "fail-fast",
            None,
            vec![
                Step::new("ok", before.clone()),
                Step::new("boom", Arc::new(Failing)),
                Step::new("skipped", after.clone()),
                Step::new("skipped-too", after.clone()),
            ],
        )
        .unwrap();

        let failure = flow.run_with_input("start").await.unwrap_err();
        assert_eq!(before.calls(), 1);
        assert_eq!(after.calls(), 0);
        assert_eq!(failure.error.step(), Some("boom"));
        assert!(matches!(
            failure.error,
            FlowError::Executor { attempt: 1, .. }
        ));
        // Context before the failing step
        assert_eq!(failure.context.text, "first");
    }

    #[tokio::test]
    async fn single_step_scenario() {
        let client: Arc<dyn ChatClient> = Arc::new(ScriptedClient::new(vec!["6"]));
        let flow = Flow::new(
            "calc",
            Some(client),
            vec![Step::new("answer", Arc::new(LlmExecutor::new("{{.Text}}").unwrap()))],
        )
        .unwrap();

        let out = flow.run(FlowContext::with_text("5+1=?")).await.unwrap();
        assert_eq!(out.text, "6");
    }

    #[tokio::test]
    async fn variable_flows_into_template() {
        struct SetDoc;

        #[async_trait]
        impl StepExecutor for SetDoc {
            fn kind(&self) -> &str {
                "set_doc"
            }
            async fn run(
                &self,
                input: &FlowContext,
                _: &StepEnv,
            ) -> Result<FlowContext, ExecutorError> {
                Ok(input.clone().with_variable("doc", "hello"))
            }
        }

        let flow = Flow::new(
            "echo",
            None,
            vec![
                Step::new("set", Arc::new(SetDoc)),
                Step::new(
                    "echo",
                    Arc::new(TemplateExecutor::new("Echo: {{.Variables.doc}}").unwrap()),
                ),
            ],
        )
        .unwrap();

        let out = flow.run(FlowContext::new()).await.unwrap();
        assert_eq!(out.text, "Echo: hello");
    }

    #[test]
    fn empty_flow_is_a_configuration_error() {
        let client: Arc<dyn ChatClient> = Arc::new(ScriptedClient::new(vec![]));
        let err = Flow::new("f", Some(client), vec![]).unwrap_err();
        assert!(matches!(err, FlowError::Configuration(_)));
    }

    #[test]
    fn client_requirement_is_checked_at_construction() {
        let llm = || Arc::new(LlmExecutor::new("{{.Text}}").unwrap());

        let err = Flow::new("f", None, vec![Step::new("ask", llm())]).unwrap_err();
        assert!(err.to_string().contains("ask"));

        let own: Arc<dyn ChatClient> = Arc::new(ScriptedClient::new(vec![]));
        assert!(Flow::new("f", None, vec![Step::new("ask", llm()).with_client(own)]).is_ok());

        let tpl = Arc::new(TemplateExecutor::new("{{.Text}}").unwrap());
        assert!(Flow::new("f", None, vec![Step::new("render", tpl)]).is_ok());
    }

    #[tokio::test]
    async fn fatal_policy_returns_rejected_output() {
        let tail = Arc::new(CountingExecutor::setting_text("tail"));
        let flow = Flow::new(
            "strict",
            None,
            vec![
                Step::new("draft", Arc::new(CountingExecutor::setting_text("draft")))
                    .with_validator(Arc::new(FixedValidator(false)))
                    .with_max_retry_times(1),
                Step::new("tail", tail.clone()),
            ],
        )
        .unwrap();

        let failure = flow.run(FlowContext::new()).await.unwrap_err();
        assert!(matches!(
            failure.error,
            FlowError::ValidationExhausted { attempts: 2, .. }
        ));
        assert_eq!(failure.context.text, "draft");
        assert_eq!(tail.calls(), 0);
    }

    #[tokio::test]
    async fn continue_policy_keeps_going() {
        let tail = Arc::new(CountingExecutor::setting_text("tail"));
        let flow = Flow::new(
            "lenient",
            None,
            vec![
                Step::new("draft", Arc::new(CountingExecutor::setting_text("draft")))
                    .with_validator(Arc::new(FixedValidator(false))),
                Step::new("tail", tail.clone()),
            ],
        )
        .unwrap()
        .with_validation_policy(ValidationPolicy::Continue);

        let out = flow.run(FlowContext::new()).await.unwrap();
        assert_eq!(out.text, "tail");
        assert_eq!(tail.calls(), 1);
    }

    #[tokio::test]
    async fn validator_accepts_after_retry() {
        let client = Arc::new(ScriptedClient::new(vec!["not json", "{\"ok\":1}"]));
        let flow = Flow::new(
            "retrying",
            Some(client.clone() as Arc<dyn ChatClient>),
            vec![
                Step::new("ask", Arc::new(LlmExecutor::new("Give JSON").unwrap()))
                    .with_validator(Arc::new(RejectTimes::new(1)))
                    .with_max_retry_times(3),
            ],
        )
        .unwrap();

        let out = flow.run(FlowContext::new()).await.unwrap();
        assert_eq!(out.text, "{\"ok\":1}");
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn run_with_variables_starts_with_empty_text() {
        let flow = Flow::new(
            "vars",
            None,
            vec![Step::new(
                "greet",
                Arc::new(TemplateExecutor::new("[{{.Text}}] Hi {{.Variables.name}}").unwrap()),
            )],
        )
        .unwrap();

        let vars = HashMap::from([("name".to_string(), serde_json::json!("Ada"))]);
        let out = flow.run_with_variables(vars).await.unwrap();
        assert_eq!(out.text, "[] Hi Ada");
    }

    #[tokio::test]
    async fn flows_run_concurrently() {
        let flow = Arc::new(
            Flow::new(
                "shared",
                None,
                vec![Step::new(
                    "echo",
                    Arc::new(TemplateExecutor::new("echo {{.Text}}").unwrap()),
                )],
            )
            .unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let flow = Arc::clone(&flow);
                tokio::spawn(async move { flow.run_with_input(format!("{i}")).await })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let out = handle.await.unwrap().unwrap();
            assert_eq!(out.text, format!("echo {i}"));
        }
    }
}
