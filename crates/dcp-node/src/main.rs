//! # dcp-node entry point
//!
//! `dcp-node run` starts every configured state machine and runs until
//! interrupted. `dcp-node check-config` loads and validates a configuration
//! without connecting to anything.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use dcp_node::{telemetry, Collaborators, Node, NodeConfig, StoreBackend};

/// Lease-based credential request and issuance node.
#[derive(Parser, Debug)]
#[command(name = "dcp-node", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the node until interrupted.
    Run(RunArgs),

    /// Load and validate a configuration file.
    CheckConfig(CheckConfigArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the node configuration (YAML).
    #[arg(long)]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[derive(Args, Debug)]
struct CheckConfigArgs {
    /// Path to the node configuration (YAML).
    #[arg(long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_json = matches!(&cli.command, Commands::Run(args) if args.log_json);
    telemetry::init_tracing(cli.verbose, log_json);

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::CheckConfig(args) => check_config(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = NodeConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    tracing::debug!(?config, "configuration loaded");

    if let Some(addr) = config.metrics_addr {
        telemetry::install_metrics(addr).context("installing prometheus exporter")?;
    }

    let backend = StoreBackend::connect(&config).await?;
    let collaborators = Collaborators::from_config(&config)?;
    let mut node = Node::build(&config, &backend, collaborators)?;
    let running = node.start();
    tracing::info!(participant = %node.participant_context_id(), "dcp-node running");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown requested");
    running.stop().await;
    Ok(())
}

fn check_config(args: CheckConfigArgs) -> anyhow::Result<()> {
    let config = NodeConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    println!("configuration OK: {}", args.config.display());
    println!("  participant:  {}", config.participant_context_id);
    println!("  own DID:      {}", config.own_did);
    println!(
        "  persistence:  {}",
        if config.database_url.is_some() { "postgres" } else { "memory" }
    );
    println!("  holder:       {}", config.holder.enabled);
    println!(
        "  issuer:       {} ({} definitions, {} attestations, {} holders)",
        config.issuer.enabled,
        config.issuer.credential_definitions.len(),
        config.issuer.attestations.len(),
        config.issuer.holders.len()
    );
    println!("  watchdog:     {}", config.watchdog.enabled);
    Ok(())
}
