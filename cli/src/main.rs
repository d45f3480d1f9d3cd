//! authflow CLI
//!
//! # Commands
//! - `authflow kinds` - List every intent and node kind the declarative registry knows
//! - `authflow inspect <flow.json>` - Decode a persisted flow tree and summarize it
//! - `authflow check-config <config.toml>` - Load and validate an authentication flow configuration

mod inspect;

use anyhow::{Context, Result};
use authflow_declarative::AppConfig;
use authflow_runtime::LogConfig;
use authflow_runtime::telemetry::init_tracing;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "authflow")]
#[command(author, version, about = "Inspect authflow trees and configuration")]
struct Cli {
    /// Emit JSON logs instead of the pretty format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered intent and node kinds
    Kinds,

    /// Summarize a persisted flow document
    Inspect {
        /// Path to the flow JSON (as stored by a flow store)
        file: String,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate an authentication flow configuration
    CheckConfig {
        /// Path to the TOML configuration
        file: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log = LogConfig {
        filter: "warn,authflow=info".to_string(),
        ..LogConfig::default()
    };
    if cli.json_logs {
        log.format = authflow_runtime::LogFormat::Json;
    }
    init_tracing(&log)?;

    match cli.command {
        Commands::Kinds => run_kinds_command(),
        Commands::Inspect { file, json } => inspect::run_inspect_command(&file, json),
        Commands::CheckConfig { file } => run_check_config_command(&file),
    }
}

fn run_kinds_command() -> Result<()> {
    let registry = authflow_declarative::registry().context("Failed to build registry")?;
    for kind in registry.kinds() {
        let role = if registry.is_intent(kind) { "intent" } else { "node" };
        println!("{role:<6} {kind}");
    }
    Ok(())
}

fn run_check_config_command(path: &str) -> Result<()> {
    let config = check_config(path)?;
    let flows = &config.authentication_flows;
    println!(
        "{}: {} login flow(s), {} signup flow(s), {} reauth flow(s), {} account recovery flow(s)",
        path,
        flows.login_flows.len(),
        flows.signup_flows.len(),
        flows.reauth_flows.len(),
        flows.account_recovery_flows.len()
    );
    Ok(())
}

fn check_config(path: &str) -> Result<AppConfig> {
    let config =
        AppConfig::load(path).with_context(|| format!("Failed to load config: {}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config: {}", path))?;
    tracing::info!(path, "configuration is valid");
    Ok(config)
}
