//! Scripted mocks for exercising flows without a network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use anyi_core::{
    ChatClient, ChatOptions, ChatResponse, ExecutorError, FlowContext, Message, ProviderError,
    ResponseInfo, StepEnv, StepExecutor, StepValidator,
};
use async_trait::async_trait;

/// A chat client that replays canned replies in order.
pub struct ScriptedClient {
    name: String,
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    usage: ResponseInfo,
    requests: Mutex<Vec<(Vec<Message>, ChatOptions)>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<&str>) -> Self {
        Self::named("scripted", responses)
    }

    pub fn named(name: impl Into<String>, responses: Vec<&str>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.to_string())).collect()),
            usage: ResponseInfo::default(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a provider failure after the scripted replies.
    pub fn then_fail(self, error: ProviderError) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(Err(error));
        }
        self
    }

    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.usage = ResponseInfo {
            prompt_tokens,
            completion_tokens,
        };
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Messages and options of every call so far.
    pub fn requests(&self) -> Vec<(Vec<Message>, ChatOptions)> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((messages.to_vec(), options.clone()));
        }

        let next = self
            .responses
            .lock()
            .map_err(|_| ProviderError::InvalidResponse("script lock poisoned".into()))?
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::InvalidResponse("script exhausted".into())))?;

        Ok(ChatResponse {
            message: Message::assistant(next),
            usage: self.usage,
        })
    }
}

/// Sets `text` to a fixed value and counts invocations.
pub struct CountingExecutor {
    text: String,
    calls: AtomicUsize,
}

impl CountingExecutor {
    pub fn setting_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for CountingExecutor {
    fn kind(&self) -> &str {
        "counting"
    }

    async fn run(&self, input: &FlowContext, _env: &StepEnv) -> Result<FlowContext, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = input.clone();
        out.text = self.text.clone();
        Ok(out)
    }
}

/// Records the input text and attempt number of every invocation, then
/// returns a context whose text marks the attempt.
#[derive(Default)]
pub struct ProbeExecutor {
    seen: Mutex<Vec<(String, u32)>>,
}

impl ProbeExecutor {
    pub fn seen(&self) -> Vec<String> {
        self.seen
            .lock()
            .map(|s| s.iter().map(|(t, _)| t.clone()).collect())
            .unwrap_or_default()
    }

    pub fn attempts(&self) -> Vec<u32> {
        self.seen
            .lock()
            .map(|s| s.iter().map(|(_, a)| *a).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StepExecutor for ProbeExecutor {
    fn kind(&self) -> &str {
        "probe"
    }

    async fn run(&self, input: &FlowContext, env: &StepEnv) -> Result<FlowContext, ExecutorError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((input.text.clone(), env.attempt));
        }
        let mut out = input.clone();
        out.text = format!("attempt-{}", env.attempt);
        Ok(out)
    }
}

/// Always answers the same.
pub struct FixedValidator(pub bool);

impl StepValidator for FixedValidator {
    fn kind(&self) -> &str {
        "fixed"
    }

    fn validate(&self, _output: &str, _env: &StepEnv) -> bool {
        self.0
    }
}

/// Rejects the first `n` outputs, then accepts.
pub struct RejectTimes {
    remaining: AtomicU32,
}

impl RejectTimes {
    pub fn new(n: u32) -> Self {
        Self {
            remaining: AtomicU32::new(n),
        }
    }
}

impl StepValidator for RejectTimes {
    fn kind(&self) -> &str {
        "reject_times"
    }

    fn validate(&self, _output: &str, _env: &StepEnv) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }
}
