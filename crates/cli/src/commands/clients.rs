//! `anyi clients`: List configured chat clients.

use std::path::Path;

use anyi_config::AnyiConfig;
use anyi_providers::default_base_url;

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    print!("{}", render(&config));
    Ok(())
}

fn render(config: &AnyiConfig) -> String {
    if config.clients.is_empty() {
        return "No clients configured.\n".into();
    }

    let mut out = String::new();
    for client in &config.clients {
        let marker = if config.default_client.as_deref() == Some(client.name.as_str()) {
            "*"
        } else {
            " "
        };
        let base_url = client
            .base_url
            .as_deref()
            .or_else(|| default_base_url(client.kind))
            .unwrap_or("-");
        let key = match (&client.api_key, client.kind.api_key_env()) {
            (Some(k), _) if !k.is_empty() => "key set",
            (_, None) => "no key needed",
            (_, Some(_)) => "key missing",
        };
        out.push_str(&format!(
            "{marker} {} [{}] model={} url={base_url} ({key})\n",
            client.name,
            client.kind,
            client.model_or_default()
        ));
    }
    out
}
