//! mcp-bridge - MCP capability client CLI
//!
#![doc = "mcp-bridge - MCP capability client CLI"]
#![doc = "Main entry point for the mcp-bridge application."]

use std::process::ExitCode;

use anyhow::Result;
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_bridge::cli::{Cli, Commands};
use mcp_bridge::commands;
use mcp_bridge::config::Config;
use mcp_bridge::mcp::capability::CapabilityClient;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/mcp-bridge.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Connection failures are fatal to the run
    tracing::info!(
        server = %config.server.name,
        transport = config.server.transport.kind(),
        "Connecting to MCP server"
    );
    let mut client = commands::connect(&config).await?;

    let outcome = tokio::select! {
        result = dispatch(&client, &cli.command) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, shutting down");
            Ok(())
        }
    };

    if let Err(e) = client.close().await {
        tracing::warn!("Failed to release MCP server {}: {:#}", client.server_name(), e);
    }

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn dispatch(client: &CapabilityClient, command: &Commands) -> Result<()> {
    match command {
        Commands::Inspect => {
            tracing::info!("Starting discovery listing");
            commands::inspect::run_inspect(client).await
        }
        Commands::Call { tool, args } => {
            tracing::debug!("Calling tool {} with {}", tool, args);
            commands::call::run_call(client, tool, args).await
        }
        Commands::Read { uri } => {
            tracing::debug!("Reading resource {}", uri);
            commands::read::run_read(client, uri).await
        }
        Commands::Prompt { name, arguments } => {
            tracing::debug!("Fetching prompt {}", name);
            commands::prompt::run_prompt(client, name, arguments).await
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins when set; otherwise `--verbose` selects debug output.
/// Logs go to stderr so command output on stdout stays clean.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "mcp_bridge=debug"
    } else {
        "mcp_bridge=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
