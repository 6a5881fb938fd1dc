//! Registration commands — `charter start|finalize|status|clear|predict|sweep`.

use std::time::Duration;

use alloy_primitives::Address;
use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use charter::config::Config;
use charter::errors::RegistrationError;
use charter::policy;
use charter::registration::{Founder, Phase, RegistrationRecord, StartRequest};
use charter::store::RegistrationStore;

/// Parse `ADDRESS:EQUITY_BPS[:ROLE]`.
pub fn parse_founder(raw: &str) -> Result<Founder, String> {
    let mut parts = raw.splitn(3, ':');
    let address = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing address in '{}'", raw))?
        .parse::<Address>()
        .map_err(|e| format!("invalid address in '{}': {}", raw, e))?;
    let equity_bps = parts
        .next()
        .ok_or_else(|| format!("missing equity in '{}' (expected ADDRESS:BPS[:ROLE])", raw))?
        .parse::<u16>()
        .map_err(|e| format!("invalid equity in '{}': {}", raw, e))?;
    let role = parts.next().unwrap_or_default().to_string();
    Ok(Founder {
        address,
        equity_bps,
        role,
    })
}

fn print_record(record: &RegistrationRecord) {
    let phase = match record.phase {
        Phase::Completed => style(record.phase.to_string()).green().bold(),
        Phase::Failed => style(record.phase.to_string()).red().bold(),
        _ => style(record.phase.to_string()).yellow(),
    };
    println!();
    println!("{} {}.eth", style("Registration").bold().cyan(), record.name_label);
    println!("  phase:      {}", phase);
    if let Some(failed_at) = record.failed_at {
        println!("  failed at:  {}", failed_at);
    }
    println!("  safe:       {}", record.predicted_owner_address);
    println!("  threshold:  {} of {}", record.threshold, record.founders.len());
    for founder in &record.founders {
        let role = if founder.role.is_empty() {
            String::new()
        } else {
            format!(" ({})", founder.role)
        };
        println!(
            "    {} {:>6.2}%{}",
            founder.address,
            f64::from(founder.equity_bps) / 100.0,
            role
        );
    }
    println!("  ready at:   {}", record.ready_at.to_rfc3339());
    let hashes = [
        ("commit tx", record.commit_tx_hash),
        ("safe tx", record.safe_deployment_tx_hash),
        ("ens tx", record.registration_tx_hash),
        ("company tx", record.company_tx_hash),
    ];
    for (label, hash) in hashes {
        if let Some(hash) = hash {
            println!("  {:<11} {}", format!("{}:", label), hash);
        }
    }
    if let Some(message) = &record.error_message {
        let class = record
            .error_class
            .map(|c| c.to_string())
            .unwrap_or_default();
        println!("  {} [{}] {}", style("error:").red().bold(), class, message);
        if record.is_retryable_failure() {
            println!("  {}", style("Run 'charter finalize' again to retry.").dim());
        }
    }
    println!();
}

pub async fn cmd_start(
    config: &Config,
    name: &str,
    founders: Vec<Founder>,
    threshold: Option<u32>,
    years: Option<u32>,
    wait: bool,
) -> Result<()> {
    let orchestrator = config.orchestrator()?;
    let request = StartRequest {
        name: name.to_string(),
        founders,
        threshold,
        duration_years: years.unwrap_or_else(|| config.duration_years()),
    };

    let outcome = orchestrator.start(&config.session, request).await?;
    println!();
    println!("{} {}.eth", style("Committed").green().bold(), outcome.name);
    println!("  safe:     {}", outcome.predicted_owner_address);
    if let Some(tx) = outcome.commit_tx_hash {
        println!("  commit:   {}", tx);
    }
    println!("  ready at: {}", outcome.ready_at.to_rfc3339());
    println!();

    if wait {
        return cmd_finalize(config, &outcome.name, true).await;
    }
    println!(
        "Run {} once the commitment has matured.",
        style(format!("charter finalize {}", outcome.name)).bold()
    );
    Ok(())
}

pub async fn cmd_finalize(config: &Config, name: &str, wait: bool) -> Result<()> {
    let orchestrator = config.orchestrator()?;

    let result = if wait {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {msg}")
                .expect("progress bar template is a valid static string"),
        );
        spinner.set_message(format!("Finalizing {}.eth", name));
        spinner.enable_steady_tick(Duration::from_millis(100));
        let result = orchestrator
            .finalize_when_ready(&config.session, name)
            .await;
        spinner.finish_and_clear();
        result
    } else {
        orchestrator.finalize(&config.session, name).await
    };

    match result {
        Ok(record) => {
            print_record(&record);
            Ok(())
        }
        Err(RegistrationError::NotReady { ready_at }) => {
            println!(
                "{} commitment matures at {}. Re-run then, or pass --wait.",
                style("Not ready:").yellow().bold(),
                ready_at.to_rfc3339()
            );
            Ok(())
        }
        Err(err) => {
            if let Ok(Some(record)) = orchestrator.status(&config.session, name).await {
                print_record(&record);
            }
            Err(err.into())
        }
    }
}

/// Reads the local store only, so it works without a node.
pub async fn cmd_status(config: &Config, name: &str) -> Result<()> {
    let label = policy::normalize_label(name)?;
    let store = config.open_store()?;
    match store
        .get(&config.session)
        .await?
        .filter(|record| record.name_label == label)
    {
        Some(record) => print_record(&record),
        None => println!(
            "No registration for '{}' in session '{}'",
            label, config.session
        ),
    }
    Ok(())
}

pub async fn cmd_clear(config: &Config, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    let orchestrator = config.orchestrator()?;
    let force = if force {
        let confirm = Confirm::new()
            .with_prompt("This discards an in-flight registration and its secret. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirm {
            println!("Clear cancelled");
            return Ok(());
        }
        true
    } else {
        false
    };

    match orchestrator.clear(&config.session, force).await {
        Ok(Some(record)) => println!(
            "Cleared {}.eth ({}) from session '{}'",
            record.name_label, record.phase, config.session
        ),
        Ok(None) => println!("Nothing to clear in session '{}'", config.session),
        Err(RegistrationError::RegistrationInProgress { name }) => println!(
            "{} {}.eth is in flight or can still be retried. Finalize it first or pass --force.",
            style("Refusing:").yellow().bold(),
            name
        ),
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

pub async fn cmd_predict(
    config: &Config,
    owners: &[Address],
    threshold: Option<u32>,
    salt: &str,
) -> Result<()> {
    let orchestrator = config.orchestrator()?;
    let address = orchestrator.predict(owners, threshold, salt).await?;
    println!("{}", address);
    Ok(())
}

pub async fn cmd_sweep(config: &Config) -> Result<()> {
    let orchestrator = config.orchestrator()?;
    let outcomes = orchestrator.sweep().await?;
    if outcomes.is_empty() {
        println!("Nothing to sweep");
        return Ok(());
    }

    for outcome in outcomes {
        match outcome.result {
            Ok(record) => println!(
                "  {} {}.eth [{}] {}",
                style("✓").green(),
                outcome.name,
                outcome.session,
                record.phase
            ),
            Err(err) => println!(
                "  {} {}.eth [{}] {}",
                style("✗").red(),
                outcome.name,
                outcome.session,
                err
            ),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_founder_with_role() {
        let founder =
            parse_founder("0x1111111111111111111111111111111111111111:6000:CEO").unwrap();
        assert_eq!(founder.address, Address::repeat_byte(0x11));
        assert_eq!(founder.equity_bps, 6000);
        assert_eq!(founder.role, "CEO");
    }

    #[test]
    fn test_parse_founder_without_role() {
        let founder = parse_founder("0x1111111111111111111111111111111111111111:2500").unwrap();
        assert_eq!(founder.equity_bps, 2500);
        assert!(founder.role.is_empty());
    }

    #[test]
    fn test_parse_founder_rejects_malformed_input() {
        assert!(parse_founder("0x1111111111111111111111111111111111111111").is_err());
        assert!(parse_founder("nope:100").is_err());
        assert!(parse_founder("0x1111111111111111111111111111111111111111:lots").is_err());
        assert!(parse_founder("0x1111111111111111111111111111111111111111:70000").is_err());
    }
}
