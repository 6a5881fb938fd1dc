use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use charter::config::{CliOverrides, Config};
use charter::registration::Founder;

mod cmd;

#[derive(Parser)]
#[command(name = "charter")]
#[command(
    version,
    about = "Claim an ENS name, deploy a Safe treasury and record the company on-chain"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// JSON-RPC endpoint. Overrides charter.toml and CHARTER_RPC_URL.
    #[arg(long, global = true)]
    pub rpc_url: Option<String>,

    /// Node-managed account that signs and pays.
    #[arg(long, global = true)]
    pub sender: Option<Address>,

    /// Session owning the registration slot (defaults to CHARTER_SESSION or $USER).
    #[arg(long, global = true)]
    pub session: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .charter/ with a default charter.toml
    Init,
    /// Validate input, predict the Safe address and commit to the name
    Start {
        /// Name to register, with or without the .eth suffix
        name: String,

        /// Founder as ADDRESS:EQUITY_BPS[:ROLE]; repeat for each founder
        #[arg(short, long = "founder", required = true, value_parser = cmd::parse_founder)]
        founders: Vec<Founder>,

        /// Signature threshold (defaults to the owner-count policy)
        #[arg(short, long)]
        threshold: Option<u32>,

        /// Registration length in years (defaults to charter.toml)
        #[arg(long)]
        years: Option<u32>,

        /// Wait for the commitment to mature and finalize in one go
        #[arg(long)]
        wait: bool,
    },
    /// Deploy the Safe, reveal the name and record the company
    Finalize {
        name: String,

        /// Sleep until the commitment matures instead of failing
        #[arg(long)]
        wait: bool,
    },
    /// Show the registration record for a name
    Status { name: String },
    /// Remove this session's registration record
    Clear {
        /// Clear even if the registration is in flight or retryable
        #[arg(long)]
        force: bool,
    },
    /// Print the counterfactual Safe address for a set of owners
    Predict {
        #[arg(short, long = "owner", required = true)]
        owners: Vec<Address>,

        #[arg(short, long)]
        threshold: Option<u32>,

        /// Decimal salt nonce
        #[arg(long)]
        salt: String,
    },
    /// Finalize every ready or transiently failed registration
    Sweep,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default charter.toml file
    Init,
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "charter=debug" } else { "charter=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        command => {
            let config = Config::new(
                project_dir,
                cli.verbose,
                CliOverrides {
                    rpc_url: cli.rpc_url.clone(),
                    sender: cli.sender,
                    session: cli.session.clone(),
                },
            )?;
            match command {
                Commands::Start {
                    name,
                    founders,
                    threshold,
                    years,
                    wait,
                } => {
                    cmd::cmd_start(&config, name, founders.clone(), *threshold, *years, *wait)
                        .await?
                }
                Commands::Finalize { name, wait } => cmd::cmd_finalize(&config, name, *wait).await?,
                Commands::Status { name } => cmd::cmd_status(&config, name).await?,
                Commands::Clear { force } => cmd::cmd_clear(&config, *force).await?,
                Commands::Predict {
                    owners,
                    threshold,
                    salt,
                } => cmd::cmd_predict(&config, owners, *threshold, salt).await?,
                Commands::Sweep => cmd::cmd_sweep(&config).await?,
                Commands::Init | Commands::Config { .. } => {}
            }
        }
    }

    Ok(())
}
