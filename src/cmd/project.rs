//! Project setup — `charter init`.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use charter::charter_config::{CHARTER_DIR, CONFIG_FILE, CharterToml};

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    let charter_dir = project_dir.join(CHARTER_DIR);
    let config_path = charter_dir.join(CONFIG_FILE);

    std::fs::create_dir_all(&charter_dir)
        .with_context(|| format!("Failed to create {}", charter_dir.display()))?;

    if config_path.exists() {
        println!(
            "{} already initialized at {}",
            style("charter").bold(),
            charter_dir.display()
        );
        return Ok(());
    }

    CharterToml::default().save(&config_path)?;

    println!(
        "{} {}",
        style("Initialized").green().bold(),
        charter_dir.display()
    );
    println!();
    println!("Next steps:");
    println!("  1. Set [network].sender and [contracts].company_registry in charter.toml");
    println!("  2. charter start <name> --founder <ADDRESS:BPS[:ROLE]> ...");
    println!("  3. charter finalize <name> --wait");
    Ok(())
}
