//! End-to-end: declarative config, registry assembly, scripted model.

use std::collections::HashMap;
use std::sync::Arc;

use anyi_config::AnyiConfig;
use anyi_core::{ChatClient, FlowError};
use anyi_flow::Registry;
use anyi_flow::testing::ScriptedClient;

const CONFIG: &str = r#"
default_client = "mock"

[[flows]]
name = "review"

[[flows.steps]]
name = "prepare"
executor = { type = "set_variables", config = { variables = { topic = "{{.Text}}", lang = "English" } } }

[[flows.steps]]
name = "draft"
max_retry_times = 2
executor = { type = "llm", config = { template = "Write about {{.Variables.topic}} in {{.Variables.lang}} as JSON.", output_json = true, output_variable = "draft" } }
validator = { type = "json", config = { required_keys = ["verdict"] } }

[[flows.steps]]
name = "verdict"
executor = { type = "template", config = { template = "{{.Variables.draft.verdict}}" } }

[[flows.steps]]
name = "route"
executor = { type = "switch", config = { cases = { good = "publish", bad = "discard" }, default = "review" } }

[[flows.steps]]
name = "summary"
executor = { type = "template", config = { template = "{{.Variables.topic}}: {{.Variables.route}}" } }
"#;

fn registry_with(client: Arc<ScriptedClient>) -> Registry {
    let registry = Registry::with_builtins();
    registry.register_client("mock", client as Arc<dyn ChatClient>);
    registry
        .load_config(&AnyiConfig::from_toml_str(CONFIG).unwrap())
        .unwrap();
    registry
}

#[tokio::test]
async fn declarative_flow_runs_end_to_end() {
    let client = Arc::new(ScriptedClient::new(vec![
        "Sure! Here it is.",
        r#"{"verdict": "good"}"#,
    ]));
    let registry = registry_with(client.clone());

    let flow = registry.get_flow("review").unwrap();
    let out = flow.run_with_input("rust").await.unwrap();

    assert_eq!(out.text, "rust: publish");
    assert_eq!(out.get_variable_string("route", ""), "publish");
    // First reply was rejected by the JSON validator.
    assert_eq!(client.call_count(), 2);

    let requests = client.requests();
    assert_eq!(
        requests[0].0[0].content,
        "Write about rust in English as JSON."
    );
    assert_eq!(requests[0].0, requests[1].0);
}

#[tokio::test]
async fn exhausted_validation_reports_step_and_attempts() {
    let client = Arc::new(ScriptedClient::new(vec!["no", "still no", "nope"]));
    let registry = registry_with(client.clone());

    let failure = registry
        .get_flow("review")
        .unwrap()
        .run_with_variables(HashMap::new())
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        FlowError::ValidationExhausted { ref step, attempts: 3 } if step == "draft"
    ));
    assert_eq!(failure.context.text, "nope");
    assert_eq!(client.call_count(), 3);
    assert!(failure.to_string().contains("draft"));
}

#[tokio::test]
async fn provider_failure_stops_before_later_steps() {
    let client = Arc::new(
        ScriptedClient::new(vec![]).then_fail(anyi_core::ProviderError::AuthenticationFailed(
            "bad key".into(),
        )),
    );
    let registry = registry_with(client);

    let failure = registry
        .get_flow("review")
        .unwrap()
        .run_with_input("rust")
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        FlowError::Executor { ref step, attempt: 1, .. } if step == "draft"
    ));
    // Context is the input of the failing step: the prepared variables.
    assert_eq!(failure.context.get_variable_string("topic", ""), "rust");
    assert!(failure.context.variable("draft").is_none());
}
