//! A step: one executor, an optional validator, and a retry budget.

use std::sync::Arc;

use anyi_core::{
    ChatClient, ExecutorError, FlowContext, FlowError, StepEnv, StepExecutor, StepValidator,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a step did not produce an accepted output.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("step '{step}' failed on attempt {attempt}: {source}")]
    Executor {
        step: String,
        attempt: u32,
        #[source]
        source: ExecutorError,
    },

    /// Every permitted attempt was rejected. `output` is the last one.
    #[error("step '{step}' output rejected by validator after {attempts} attempt(s)")]
    ValidationExhausted {
        step: String,
        attempts: u32,
        output: FlowContext,
    },
}

impl StepError {
    /// Split into the flow-level error and, for validation exhaustion, the
    /// rejected output.
    pub fn into_parts(self) -> (FlowError, Option<FlowContext>) {
        match self {
            StepError::Executor {
                step,
                attempt,
                source,
            } => (
                FlowError::Executor {
                    step,
                    attempt,
                    source,
                },
                None,
            ),
            StepError::ValidationExhausted {
                step,
                attempts,
                output,
            } => (FlowError::ValidationExhausted { step, attempts }, Some(output)),
        }
    }
}

/// One unit of a flow. Immutable once built and shared across runs.
pub struct Step {
    name: String,
    executor: Arc<dyn StepExecutor>,
    validator: Option<Arc<dyn StepValidator>>,
    client: Option<Arc<dyn ChatClient>>,
    max_retry_times: u32,
}

impl Step {
    pub fn new(name: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            name: name.into(),
            executor,
            validator: None,
            client: None,
            max_retry_times: 0,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn StepValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Use this client instead of the flow default.
    pub fn with_client(mut self, client: Arc<dyn ChatClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Extra attempts allowed after a validator rejection.
    pub fn with_max_retry_times(mut self, max_retry_times: u32) -> Self {
        self.max_retry_times = max_retry_times;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executor(&self) -> &Arc<dyn StepExecutor> {
        &self.executor
    }

    pub fn validator(&self) -> Option<&Arc<dyn StepValidator>> {
        self.validator.as_ref()
    }

    pub fn client(&self) -> Option<&Arc<dyn ChatClient>> {
        self.client.as_ref()
    }

    pub fn max_retry_times(&self) -> u32 {
        self.max_retry_times
    }

    /// Whether this step can run with the given fallback client.
    pub(crate) fn is_runnable_with(&self, fallback: Option<&Arc<dyn ChatClient>>) -> bool {
        !self.executor.requires_client() || self.client.is_some() || fallback.is_some()
    }

    /// Run the executor, re-running it on the original `input` while the
    /// validator rejects and retries remain.
    ///
    /// The step's own client wins over `fallback`.
    pub async fn run(
        &self,
        input: &FlowContext,
        fallback: Option<Arc<dyn ChatClient>>,
    ) -> Result<FlowContext, StepError> {
        let mut env = StepEnv::new(&self.name, self.client.clone().or(fallback));

        loop {
            debug!(
                step = %self.name,
                executor = self.executor.kind(),
                attempt = env.attempt,
                "Running step attempt"
            );

            let output = self
                .executor
                .run(input, &env)
                .await
                .map_err(|source| StepError::Executor {
                    step: self.name.clone(),
                    attempt: env.attempt,
                    source,
                })?;

            let Some(validator) = &self.validator else {
                return Ok(output);
            };

            if validator.validate(&output.text, &env) {
                debug!(step = %self.name, attempt = env.attempt, "Step output accepted");
                return Ok(output);
            }

            if env.attempt > self.max_retry_times {
                warn!(
                    step = %self.name,
                    validator = validator.kind(),
                    attempts = env.attempt,
                    "Step output rejected, no retries left"
                );
                return Err(StepError::ValidationExhausted {
                    step: self.name.clone(),
                    attempts: env.attempt,
                    output,
                });
            }

            warn!(
                step = %self.name,
                validator = validator.kind(),
                attempt = env.attempt,
                max_retry_times = self.max_retry_times,
                "Step output rejected, retrying"
            );
            env.attempt += 1;
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("executor", &self.executor.kind())
            .field("validator", &self.validator.as_ref().map(|v| v.kind().to_string()))
            .field("client", &self.client.as_ref().map(|c| c.name().to_string()))
            .field("max_retry_times", &self.max_retry_times)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingExecutor, FixedValidator, ProbeExecutor, ScriptedClient};
    use async_trait::async_trait;

    #[tokio::test]
    async fn no_validator_returns_first_output() {
        let executor = Arc::new(CountingExecutor::setting_text("done"));
        let step = Step::new("only", executor.clone());

        let out = step.run(&FlowContext::with_text("in"), None).await.unwrap();
        assert_eq!(out.text, "done");
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn retry_bound_is_max_retry_plus_one() {
        for k in [0u32, 1, 3] {
            let executor = Arc::new(CountingExecutor::setting_text("bad"));
            let step = Step::new("s", executor.clone())
                .with_validator(Arc::new(FixedValidator(false)))
                .with_max_retry_times(k);

            let err = step.run(&FlowContext::new(), None).await.unwrap_err();
            match err {
                StepError::ValidationExhausted {
                    attempts, output, ..
                } => {
                    assert_eq!(attempts, k + 1);
                    assert_eq!(output.text, "bad");
                }
                other => panic!("unexpected: {other}"),
            }
            assert_eq!(executor.calls(), (k + 1) as usize);
        }
    }

    #[tokio::test]
    async fn retries_see_the_original_input() {
        let probe = Arc::new(ProbeExecutor::default());
        let step = Step::new("probe", probe.clone())
            .with_validator(Arc::new(FixedValidator(false)))
            .with_max_retry_times(2);

        let _ = step.run(&FlowContext::with_text("original"), None).await;
        assert_eq!(probe.seen(), vec!["original", "original", "original"]);
        assert_eq!(probe.attempts(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn executor_error_is_not_retried() {
        struct Failing;

        #[async_trait]
        impl StepExecutor for Failing {
            fn kind(&self) -> &str {
                "failing"
            }
            async fn run(
                &self,
                _: &FlowContext,
                _: &StepEnv,
            ) -> Result<FlowContext, ExecutorError> {
                Err(ExecutorError::Other("nope".into()))
            }
        }

        let step = Step::new("f", Arc::new(Failing))
            .with_validator(Arc::new(FixedValidator(false)))
            .with_max_retry_times(5);
        match step.run(&FlowContext::new(), None).await.unwrap_err() {
            StepError::Executor { step, attempt, .. } => {
                assert_eq!(step, "f");
                assert_eq!(attempt, 1);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn step_client_overrides_fallback() {
        struct ClientName;

        #[async_trait]
        impl StepExecutor for ClientName {
            fn kind(&self) -> &str {
                "client_name"
            }
            async fn run(
                &self,
                input: &FlowContext,
                env: &StepEnv,
            ) -> Result<FlowContext, ExecutorError> {
                let mut out = input.clone();
                out.text = env.client()?.name().to_string();
                Ok(out)
            }
        }

        let fallback: Arc<dyn ChatClient> = Arc::new(ScriptedClient::named("default", vec![]));
        let own: Arc<dyn ChatClient> = Arc::new(ScriptedClient::named("own", vec![]));

        let plain = Step::new("a", Arc::new(ClientName));
        let out = plain.run(&FlowContext::new(), Some(fallback.clone())).await.unwrap();
        assert_eq!(out.text, "default");

        let overridden = Step::new("b", Arc::new(ClientName)).with_client(own);
        let out = overridden.run(&FlowContext::new(), Some(fallback)).await.unwrap();
        assert_eq!(out.text, "own");

        let err = plain.run(&FlowContext::new(), None).await.unwrap_err();
        assert!(matches!(
            err,
            StepError::Executor {
                source: ExecutorError::NoClient { .. },
                ..
            }
        ));
    }

    #[test]
    fn into_parts_keeps_rejected_output() {
        let err = StepError::ValidationExhausted {
            step: "s".into(),
            attempts: 2,
            output: FlowContext::with_text("rejected"),
        };
        let (flow_err, ctx) = err.into_parts();
        assert_eq!(flow_err.step(), Some("s"));
        assert_eq!(ctx.unwrap().text, "rejected");
    }
}
