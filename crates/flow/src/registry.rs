//! Named lookup for clients, executors, validators and flows.
//!
//! The registry is an explicit object, shared behind an `RwLock`. Executor
//! and validator type names map to factories that turn a config table into
//! an instance; they are resolved once, when a flow is assembled.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyi_config::{AnyiConfig, FlowConfig, OnValidationFailure};
use anyi_core::{
    ChatClient, Error, ExecutorError, FlowError, RegistryError, StepExecutor, StepValidator,
};
use tracing::{debug, info};

use crate::executors::{
    CommandExecutor, LlmExecutor, McpExecutor, SetVariablesExecutor, SwitchExecutor,
    TemplateExecutor, ThinkFilterExecutor,
};
use crate::flow::{Flow, ValidationPolicy};
use crate::step::Step;
use crate::validators::{JsonValidator, NoopValidator, StringValidator};

/// Builds an executor from its config table.
pub type ExecutorFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn StepExecutor>, ExecutorError> + Send + Sync>;

/// Builds a validator from its config table.
pub type ValidatorFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn StepValidator>, ExecutorError> + Send + Sync>;

#[derive(Default)]
struct Inner {
    clients: HashMap<String, Arc<dyn ChatClient>>,
    executors: HashMap<String, Arc<dyn StepExecutor>>,
    validators: HashMap<String, Arc<dyn StepValidator>>,
    flows: HashMap<String, Arc<Flow>>,
    executor_types: HashMap<String, ExecutorFactory>,
    validator_types: HashMap<String, ValidatorFactory>,
    default_client: Option<String>,
}

/// Registry of everything a flow can refer to by name.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    /// An empty registry. No executor or validator types are known.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in executor and validator type.
    pub fn with_builtins() -> Self {
        let registry = Self::new();

        registry.register_executor_type("llm", |c| Ok(Arc::new(LlmExecutor::from_config(c)?)));
        registry.register_executor_type("template", |c| {
            Ok(Arc::new(TemplateExecutor::from_config(c)?))
        });
        registry.register_executor_type("set_variables", |c| {
            Ok(Arc::new(SetVariablesExecutor::from_config(c)?))
        });
        registry.register_executor_type("switch", |c| {
            Ok(Arc::new(SwitchExecutor::from_config(c)?))
        });
        registry.register_executor_type("think_filter", |c| {
            Ok(Arc::new(ThinkFilterExecutor::from_config(c)?))
        });
        registry.register_executor_type("command", |c| {
            Ok(Arc::new(CommandExecutor::from_config(c)?))
        });
        registry.register_executor_type("mcp", |c| Ok(Arc::new(McpExecutor::from_config(c)?)));

        registry.register_validator_type("noop", |_| Ok(Arc::new(NoopValidator)));
        registry.register_validator_type("json", |c| Ok(Arc::new(JsonValidator::from_config(c)?)));
        registry.register_validator_type("string", |c| {
            Ok(Arc::new(StringValidator::from_config(c)?))
        });

        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Registration (replaces any existing entry with the same name) ---

    pub fn register_client(&self, name: impl Into<String>, client: Arc<dyn ChatClient>) {
        self.write().clients.insert(name.into(), client);
    }

    pub fn register_executor(&self, name: impl Into<String>, executor: Arc<dyn StepExecutor>) {
        self.write().executors.insert(name.into(), executor);
    }

    pub fn register_validator(&self, name: impl Into<String>, validator: Arc<dyn StepValidator>) {
        self.write().validators.insert(name.into(), validator);
    }

    pub fn register_flow(&self, flow: Flow) -> Arc<Flow> {
        let flow = Arc::new(flow);
        self.write()
            .flows
            .insert(flow.name().to_string(), Arc::clone(&flow));
        flow
    }

    pub fn register_executor_type<F>(&self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn StepExecutor>, ExecutorError>
            + Send
            + Sync
            + 'static,
    {
        self.write()
            .executor_types
            .insert(kind.into(), Arc::new(factory));
    }

    pub fn register_validator_type<F>(&self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn StepValidator>, ExecutorError>
            + Send
            + Sync
            + 'static,
    {
        self.write()
            .validator_types
            .insert(kind.into(), Arc::new(factory));
    }

    /// Make a registered client the default for flows that name none.
    pub fn set_default_client(&self, name: &str) -> Result<(), RegistryError> {
        let mut inner = self.write();
        if !inner.clients.contains_key(name) {
            return Err(RegistryError::NotFound {
                kind: "client",
                name: name.to_string(),
            });
        }
        inner.default_client = Some(name.to_string());
        Ok(())
    }

    pub fn default_client(&self) -> Option<Arc<dyn ChatClient>> {
        let inner = self.read();
        inner
            .default_client
            .as_ref()
            .and_then(|name| inner.clients.get(name))
            .cloned()
    }

    // --- Lookup ---

    pub fn get_client(&self, name: &str) -> Result<Arc<dyn ChatClient>, RegistryError> {
        self.read()
            .clients
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("client", name))
    }

    pub fn get_executor(&self, name: &str) -> Result<Arc<dyn StepExecutor>, RegistryError> {
        self.read()
            .executors
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("executor", name))
    }

    pub fn get_validator(&self, name: &str) -> Result<Arc<dyn StepValidator>, RegistryError> {
        self.read()
            .validators
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("validator", name))
    }

    pub fn get_flow(&self, name: &str) -> Result<Arc<Flow>, RegistryError> {
        self.read()
            .flows
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("flow", name))
    }

    /// Registered client names, sorted.
    pub fn client_names(&self) -> Vec<String> {
        sorted_keys(&self.read().clients)
    }

    /// Registered flow names, sorted.
    pub fn flow_names(&self) -> Vec<String> {
        sorted_keys(&self.read().flows)
    }

    // --- Assembly ---

    /// Resolve an executor: a type factory first, then a named instance.
    pub fn build_executor(
        &self,
        kind: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn StepExecutor>, RegistryError> {
        let (factory, instance) = {
            let inner = self.read();
            (
                inner.executor_types.get(kind).cloned(),
                inner.executors.get(kind).cloned(),
            )
        };

        match (factory, instance) {
            (Some(factory), _) => factory(config).map_err(|e| RegistryError::Build {
                kind: "executor",
                name: kind.to_string(),
                reason: e.to_string(),
            }),
            (None, Some(instance)) => Ok(instance),
            (None, None) => Err(not_found("executor type", kind)),
        }
    }

    /// Resolve a validator: a type factory first, then a named instance.
    pub fn build_validator(
        &self,
        kind: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn StepValidator>, RegistryError> {
        let (factory, instance) = {
            let inner = self.read();
            (
                inner.validator_types.get(kind).cloned(),
                inner.validators.get(kind).cloned(),
            )
        };

        match (factory, instance) {
            (Some(factory), _) => factory(config).map_err(|e| RegistryError::Build {
                kind: "validator",
                name: kind.to_string(),
                reason: e.to_string(),
            }),
            (None, Some(instance)) => Ok(instance),
            (None, None) => Err(not_found("validator type", kind)),
        }
    }

    /// Assemble a flow from its declarative form.
    ///
    /// The flow client is the one it names, else the registry default, else
    /// none. Step clients override it.
    pub fn build_flow(&self, config: &FlowConfig) -> Result<Flow, FlowError> {
        let clients = self.read().clients.clone();
        self.assemble_flow(config, &clients, self.default_client())
    }

    fn assemble_flow(
        &self,
        config: &FlowConfig,
        clients: &HashMap<String, Arc<dyn ChatClient>>,
        fallback: Option<Arc<dyn ChatClient>>,
    ) -> Result<Flow, FlowError> {
        let configuration = |e: RegistryError| {
            FlowError::Configuration(format!("flow '{}': {e}", config.name))
        };
        let client = |name: &str| {
            clients
                .get(name)
                .cloned()
                .ok_or_else(|| configuration(not_found("client", name)))
        };

        let default_client = match &config.client {
            Some(name) => Some(client(name)?),
            None => fallback,
        };

        let mut steps = Vec::with_capacity(config.steps.len());
        for (index, step_config) in config.steps.iter().enumerate() {
            let name = step_config.display_name(index);
            let executor_config = step_config.executor.as_ref().ok_or_else(|| {
                FlowError::Configuration(format!(
                    "flow '{}': step '{name}' has no executor",
                    config.name
                ))
            })?;

            let executor = self
                .build_executor(&executor_config.kind, &executor_config.config)
                .map_err(configuration)?;
            let mut step =
                Step::new(name, executor).with_max_retry_times(step_config.max_retry_times);

            if let Some(validator_config) = &step_config.validator {
                let validator = self
                    .build_validator(&validator_config.kind, &validator_config.config)
                    .map_err(configuration)?;
                step = step.with_validator(validator);
            }

            if let Some(name) = &step_config.client {
                step = step.with_client(client(name)?);
            }

            steps.push(step);
        }

        let policy = match config.on_validation_failure {
            OnValidationFailure::Fail => ValidationPolicy::Fatal,
            OnValidationFailure::Continue => ValidationPolicy::Continue,
        };

        debug!(flow = %config.name, steps = steps.len(), "Assembled flow");
        Ok(Flow::new(&config.name, default_client, steps)?.with_validation_policy(policy))
    }

    /// Build every client and flow in `config` and register them.
    ///
    /// Nothing is registered unless the whole config builds. Names already
    /// present in the registry are rejected. Without an explicit
    /// `default_client`, the first client becomes the default when the
    /// registry has none yet.
    pub fn load_config(&self, config: &AnyiConfig) -> Result<(), Error> {
        let (mut clients, current_default) = {
            let inner = self.read();
            (inner.clients.clone(), inner.default_client.clone())
        };

        let mut new_clients = Vec::with_capacity(config.clients.len());
        for client_config in &config.clients {
            if clients.contains_key(&client_config.name) {
                return Err(duplicate("client", &client_config.name).into());
            }
            let client = anyi_providers::build_client(client_config)?;
            clients.insert(client_config.name.clone(), Arc::clone(&client));
            new_clients.push((client_config.name.clone(), client));
        }

        let default_name = match (&config.default_client, config.clients.first()) {
            (Some(name), _) => Some(name.clone()),
            (None, Some(first)) if current_default.is_none() => Some(first.name.clone()),
            _ => current_default,
        };
        let default_client = match &default_name {
            Some(name) => Some(
                clients
                    .get(name)
                    .cloned()
                    .ok_or_else(|| not_found("client", name))?,
            ),
            None => None,
        };

        let mut new_flows: Vec<Arc<Flow>> = Vec::with_capacity(config.flows.len());
        for flow_config in &config.flows {
            if new_flows.iter().any(|f| f.name() == flow_config.name) {
                return Err(duplicate("flow", &flow_config.name).into());
            }
            let flow = self.assemble_flow(flow_config, &clients, default_client.clone())?;
            new_flows.push(Arc::new(flow));
        }

        let mut inner = self.write();
        if let Some((name, _)) = new_clients
            .iter()
            .find(|(name, _)| inner.clients.contains_key(name))
        {
            return Err(duplicate("client", name).into());
        }
        if let Some(flow) = new_flows
            .iter()
            .find(|f| inner.flows.contains_key(f.name()))
        {
            return Err(duplicate("flow", flow.name()).into());
        }

        for (name, client) in new_clients {
            inner.clients.insert(name, client);
        }
        for flow in new_flows {
            inner.flows.insert(flow.name().to_string(), flow);
        }
        inner.default_client = default_name;
        drop(inner);

        info!(
            clients = config.clients.len(),
            flows = config.flows.len(),
            "Configuration loaded"
        );
        Ok(())
    }
}

fn duplicate(kind: &'static str, name: &str) -> RegistryError {
    RegistryError::Duplicate {
        kind,
        name: name.to_string(),
    }
}

fn not_found(kind: &'static str, name: &str) -> RegistryError {
    RegistryError::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut names: Vec<String> = map.keys().cloned().collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingExecutor, ScriptedClient};
    use anyi_config::{ComponentConfig, StepConfig};
    use anyi_core::FlowContext;

    fn step(kind: &str, config: serde_json::Value) -> StepConfig {
        StepConfig {
            name: None,
            executor: Some(ComponentConfig::new(kind, config)),
            validator: None,
            client: None,
            max_retry_times: 0,
        }
    }

    fn flow_config(name: &str, steps: Vec<StepConfig>) -> FlowConfig {
        FlowConfig {
            name: name.into(),
            client: None,
            on_validation_failure: OnValidationFailure::Fail,
            steps,
        }
    }

    #[test]
    fn lookups_report_kind_and_name() {
        let registry = Registry::new();
        let err = registry.get_client("gpt").err().unwrap();
        assert_eq!(err.to_string(), "client 'gpt' not found");
        assert!(registry.get_executor("x").is_err());
        assert!(registry.get_validator("x").is_err());
        assert!(registry.get_flow("x").is_err());
    }

    #[test]
    fn default_client_must_be_registered() {
        let registry = Registry::new();
        assert!(registry.set_default_client("gpt").is_err());

        registry.register_client("gpt", Arc::new(ScriptedClient::named("gpt", vec![])));
        registry.set_default_client("gpt").unwrap();
        assert_eq!(registry.default_client().unwrap().name(), "gpt");
    }

    #[test]
    fn factory_wins_over_named_instance() {
        let registry = Registry::with_builtins();
        registry.register_executor("template", Arc::new(CountingExecutor::setting_text("x")));
        registry.register_executor("custom", Arc::new(CountingExecutor::setting_text("x")));

        let built = registry
            .build_executor("template", &serde_json::json!({"template": "t"}))
            .unwrap();
        assert_eq!(built.kind(), "template");

        let named = registry.build_executor("custom", &serde_json::Value::Null).unwrap();
        assert_eq!(named.kind(), "counting");

        let err = registry.build_executor("nope", &serde_json::Value::Null).err().unwrap();
        assert!(matches!(err, RegistryError::NotFound { kind: "executor type", .. }));
    }

    #[test]
    fn factory_errors_become_build_errors() {
        let registry = Registry::with_builtins();
        let err = registry
            .build_executor("llm", &serde_json::json!({"output_json": true}))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::Build { kind: "executor", .. }));

        let err = registry
            .build_validator("string", &serde_json::Value::Null)
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::Build { kind: "validator", .. }));
    }

    #[tokio::test]
    async fn build_flow_resolves_clients() {
        let registry = Registry::with_builtins();
        registry.register_client("a", Arc::new(ScriptedClient::named("a", vec!["from a"])));
        registry.register_client("b", Arc::new(ScriptedClient::named("b", vec!["from b"])));
        registry.set_default_client("a").unwrap();

        let mut second = step("llm", serde_json::json!({"template": "again"}));
        second.client = Some("b".into());
        let config = flow_config(
            "two-clients",
            vec![
                step(
                    "llm",
                    serde_json::json!({"template": "{{.Text}}", "output_variable": "first"}),
                ),
                second,
            ],
        );

        let flow = registry.build_flow(&config).unwrap();
        assert_eq!(flow.default_client().unwrap().name(), "a");
        assert_eq!(flow.steps()[0].name(), "step-0");

        let out = flow.run(FlowContext::with_text("go")).await.unwrap();
        assert_eq!(out.get_variable_string("first", ""), "from a");
        assert_eq!(out.text, "from b");
    }

    #[test]
    fn build_flow_reports_configuration_errors() {
        let registry = Registry::with_builtins();

        let mut no_executor = step("template", serde_json::json!({"template": "x"}));
        no_executor.executor = None;
        let err = registry
            .build_flow(&flow_config("f", vec![no_executor]))
            .unwrap_err();
        assert!(matches!(err, FlowError::Configuration(ref m) if m.contains("no executor")));

        let mut unknown_client = step("template", serde_json::json!({"template": "x"}));
        unknown_client.client = Some("ghost".into());
        let err = registry
            .build_flow(&flow_config("f", vec![unknown_client]))
            .unwrap_err();
        assert!(err.to_string().contains("client 'ghost' not found"));

        let err = registry
            .build_flow(&flow_config("f", vec![step("llm", serde_json::json!({"template": "x"}))]))
            .unwrap_err();
        assert!(err.to_string().contains("needs a chat client"));
    }

    #[test]
    fn continue_policy_is_mapped() {
        let registry = Registry::with_builtins();
        let mut config = flow_config(
            "lenient",
            vec![step("template", serde_json::json!({"template": "x"}))],
        );
        config.on_validation_failure = OnValidationFailure::Continue;
        let flow = registry.build_flow(&config).unwrap();
        assert_eq!(flow.validation_policy(), ValidationPolicy::Continue);
    }

    #[test]
    fn load_config_registers_everything() {
        let config = AnyiConfig::from_toml_str(
            r#"
            [[clients]]
            name = "local"
            type = "ollama"
            model = "llama3.2"

            [[flows]]
            name = "greet"

            [[flows.steps]]
            executor = { type = "template", config = { template = "Hi {{.Text}}" } }
            "#,
        )
        .unwrap();

        let registry = Registry::with_builtins();
        registry.load_config(&config).unwrap();
        assert_eq!(registry.client_names(), vec!["local"]);
        assert_eq!(registry.flow_names(), vec!["greet"]);
        assert_eq!(registry.default_client().unwrap().name(), "local");

        let err = registry.load_config(&config).unwrap_err();
        assert!(matches!(err, Error::Registry(RegistryError::Duplicate { .. })));
    }

    #[test]
    fn failed_load_registers_nothing() {
        let source = |second_executor: &str| {
            format!(
                r#"
                [[clients]]
                name = "local"
                type = "ollama"

                [[flows]]
                name = "ok"

                [[flows.steps]]
                executor = {{ type = "template", config = {{ template = "fine" }} }}

                [[flows]]
                name = "broken"

                [[flows.steps]]
                executor = {{ type = "{second_executor}", config = {{ template = "x" }} }}
                "#
            )
        };

        let registry = Registry::with_builtins();
        let bad = AnyiConfig::from_toml_str(&source("no_such_type")).unwrap();
        let err = registry.load_config(&bad).unwrap_err();
        assert!(err.to_string().contains("no_such_type"));

        assert!(registry.client_names().is_empty());
        assert!(registry.flow_names().is_empty());
        assert!(registry.default_client().is_none());

        let fixed = AnyiConfig::from_toml_str(&source("template")).unwrap();
        registry.load_config(&fixed).unwrap();
        assert_eq!(registry.client_names(), vec!["local"]);
        assert_eq!(registry.flow_names(), vec!["broken", "ok"]);
        assert_eq!(registry.default_client().unwrap().name(), "local");
    }

    #[test]
    fn flow_name_clash_with_registered_flow_keeps_new_clients_out() {
        let registry = Registry::with_builtins();
        let greet = flow_config(
            "greet",
            vec![step("template", serde_json::json!({"template": "hi"}))],
        );
        let existing = registry.build_flow(&greet).unwrap();
        registry.register_flow(existing);

        let config = AnyiConfig::from_toml_str(
            r#"
            [[clients]]
            name = "local"
            type = "ollama"

            [[flows]]
            name = "greet"

            [[flows.steps]]
            executor = { type = "template", config = { template = "hello" } }
            "#,
        )
        .unwrap();

        let err = registry.load_config(&config).unwrap_err();
        assert!(matches!(
            err,
            Error::Registry(RegistryError::Duplicate { kind: "flow", .. })
        ));
        assert!(registry.client_names().is_empty());
        assert!(registry.default_client().is_none());
    }
}
