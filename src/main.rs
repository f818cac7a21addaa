// Hypermind Node - Entry point
// Principle: A node is one process, one identity, one count

#![allow(dead_code)]

mod cli;
mod dashboard;
mod geo;
mod identity;
mod network;

#[cfg(test)]
mod tests;

use clap::Parser;
use cli::config::NodeConfig;
use cli::runner::run_node;
use cli::{Cli, Commands, KeySubcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_filter = if cli.verbose { "debug" } else { &cli.log_level };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter)),
        )
        .init();

    print_banner();

    match cli.command {
        Commands::Run(cmd) => {
            let config = NodeConfig::from_run_cmd(&cmd).map_err(|e| {
                error!("Configuration error: {}", e);
                anyhow::anyhow!("Configuration error: {}", e)
            })?;

            if let Err(e) = run_node(config).await {
                error!("Node error: {}", e);
                return Err(anyhow::anyhow!("Node error: {}", e));
            }
        }

        Commands::Key(cmd) => match cmd.subcommand {
            KeySubcommand::Generate { output } => generate_key(output.as_deref())?,
            KeySubcommand::Inspect { path } => inspect_key(&path)?,
        },
    }

    Ok(())
}

/// Print the startup banner
fn print_banner() {
    println!(
        r#"
    ─────────────────────────────────────────
      h y p e r m i n d   ·   node  v{}
      one process · one identity · one count
    ─────────────────────────────────────────
    "#,
        env!("CARGO_PKG_VERSION")
    );
}

/// Generate an identity (keypair + mined PoW nonce)
fn generate_key(output: Option<&std::path::Path>) -> anyhow::Result<()> {
    let identity = identity::Identity::generate()?;

    match output {
        Some(path) => {
            identity.save(path)?;
            println!("Identity saved to {}", path.display());
        }
        None => {
            println!("{}", serde_json::to_string_pretty(&identity.export_json())?);
        }
    }
    println!("id:    {}", identity.id());
    println!("nonce: {}", identity.nonce());
    Ok(())
}

/// Inspect an identity file
fn inspect_key(path: &std::path::Path) -> anyhow::Result<()> {
    let identity = identity::Identity::load(path)
        .ok_or_else(|| anyhow::anyhow!("Not a readable identity file: {}", path.display()))?;

    println!("id:     {}", identity.id());
    println!("nonce:  {}", identity.nonce());
    println!(
        "pow:    {}",
        identity::pow::digest_hex(identity.id(), identity.nonce())
    );
    Ok(())
}
