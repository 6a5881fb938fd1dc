//! Configuration view and validation commands — `charter config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use charter::charter_config::{CHARTER_DIR, CONFIG_FILE, CharterConfig, CharterToml};

    let charter_dir = project_dir.join(CHARTER_DIR);
    let config_path = charter_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Charter Configuration");
            println!("=====================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                CharterToml::load(&config_path)?
            } else {
                println!("No charter.toml found at {}", config_path.display());
                println!("Using default configuration.");
                CharterToml::default()
            };
            println!();

            println!("[network]");
            println!("  rpc_url = \"{}\"", toml.network.rpc_url);
            match toml.network.sender {
                Some(sender) => println!("  sender = \"{}\"", sender),
                None => println!("  sender = (unset)"),
            }
            println!("  poll_interval_ms = {}", toml.network.poll_interval_ms);
            println!(
                "  receipt_timeout_secs = {}",
                toml.network.receipt_timeout_secs
            );
            println!();

            println!("[contracts]");
            println!("  controller = \"{}\"", toml.contracts.controller);
            println!("  name_wrapper = \"{}\"", toml.contracts.name_wrapper);
            println!("  ens_registry = \"{}\"", toml.contracts.ens_registry);
            println!("  resolver = \"{}\"", toml.contracts.resolver);
            match toml.contracts.company_registry {
                Some(registry) => println!("  company_registry = \"{}\"", registry),
                None => println!("  company_registry = (unset)"),
            }
            println!("  safe_factory = \"{}\"", toml.contracts.safe_factory);
            println!("  safe_singleton = \"{}\"", toml.contracts.safe_singleton);
            println!("  fallback_handler = \"{}\"", toml.contracts.fallback_handler);
            println!();

            println!("[registration]");
            println!("  duration_years = {}", toml.registration.duration_years);
            println!("  fee_buffer_bps = {}", toml.registration.fee_buffer_bps);
            println!(
                "  commit_maturity_secs = {}",
                toml.registration.commit_maturity_secs
            );
            println!();

            println!("[store]");
            println!("  path = \"{}\"", toml.store.path);
            println!();

            if project_dir.exists() {
                let config = CharterConfig::new(project_dir.to_path_buf())?;
                println!("Effective values (with env overrides):");
                println!("  rpc_url = \"{}\"", config.rpc_url());
                match config.sender() {
                    Ok(sender) => println!("  sender = \"{}\"", sender),
                    Err(_) => println!("  sender = (unset)"),
                }
                println!("  session = \"{}\"", config.session());
                println!("  state_db = \"{}\"", config.state_db().display());
                println!();
            }

            if !config_path.exists() {
                println!("Run 'charter config init' to create a charter.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let toml = if config_path.exists() {
                CharterToml::load(&config_path)?
            } else {
                println!("No charter.toml found. Checking defaults.");
                CharterToml::default()
            };
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("charter.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !charter_dir.exists() {
                std::fs::create_dir_all(&charter_dir)?;
            }

            let toml = CharterToml::default();
            toml.save(&config_path)?;

            println!("Created charter.toml at {}", config_path.display());
            println!();
            println!("Before registering, set:");
            println!("  - [network] sender (or CHARTER_SENDER)");
            println!("  - [contracts] company_registry");
            println!();
        }
    }

    Ok(())
}
