//! Anyi CLI: the main entry point.
//!
//! Commands:
//! - `run`     : Run a flow from the configuration
//! - `list`    : List configured flows and their steps
//! - `check`   : Validate the configuration and assemble every flow
//! - `clients` : List configured chat clients

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "anyi",
    about = "Anyi: declarative LLM workflow runner",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true, env = "ANYI_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow
    Run {
        /// Name of the flow to run
        flow: String,

        /// Initial text ("-" reads standard input)
        #[arg(short, long)]
        input: Option<String>,

        /// Initial variable, repeatable: --var key=value (JSON values are parsed)
        #[arg(long = "var", value_parser = commands::run::parse_var)]
        vars: Vec<(String, serde_json::Value)>,

        /// Print the whole resulting context as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured flows
    List,

    /// Validate the configuration
    Check,

    /// List configured chat clients
    Clients,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing; logs go to stderr so flow output stays clean.
    let filter = if cli.verbose { "debug" } else { "info" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            flow,
            input,
            vars,
            json,
        } => commands::run::run(config, &flow, input, vars, json).await?,
        Commands::List => commands::list::run(config)?,
        Commands::Check => commands::check::run(config)?,
        Commands::Clients => commands::clients::run(config)?,
    }

    Ok(())
}
