//! `anyi check`: Validate the configuration and assemble every flow.

use std::path::Path;

use anyi_flow::Registry;

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Anyi configuration check");
    println!("===========================\n");

    let config = match super::load_config(config_path) {
        Ok(config) => {
            println!("  ✅ Config file valid");
            config
        }
        Err(e) => {
            println!("  ❌ {e}");
            return Err(e);
        }
    };

    let registry = Registry::with_builtins();
    if let Err(e) = registry.load_config(&config) {
        println!("  ❌ {e}");
        return Err(e.into());
    }

    println!("  ✅ {} client(s) built", registry.client_names().len());
    match registry.default_client() {
        Some(client) => println!("  ✅ Default client: {}", client.name()),
        None => println!("  ⚠️  No default client; LLM steps need their own client"),
    }
    for name in registry.flow_names() {
        let flow = registry.get_flow(&name)?;
        println!("  ✅ Flow '{name}' ({} step(s))", flow.steps().len());
    }

    println!("\n  🎉 All checks passed!");
    Ok(())
}
