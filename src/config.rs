use std::path::PathBuf;
use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::{Context, Result};

use crate::chain::Collaborators;
use crate::chain::rpc::RpcChain;
use crate::charter_config::CharterConfig;
use crate::clock::SystemClock;
use crate::registration::{Orchestrator, SessionId};
use crate::store::SqliteStore;

/// Overrides passed on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub rpc_url: Option<String>,
    pub sender: Option<Address>,
    pub session: Option<String>,
}

/// Runtime configuration for charter.
///
/// Bridges the layered [`CharterConfig`] with what the commands need: the
/// session, the state database and a wired-up orchestrator.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub charter_dir: PathBuf,
    pub state_db: PathBuf,
    pub session: SessionId,
    pub verbose: bool,
    charter: CharterConfig,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool, overrides: CliOverrides) -> Result<Self> {
        let mut charter = CharterConfig::new(project_dir)?;
        charter.cli_rpc_url = overrides.rpc_url;
        charter.cli_sender = overrides.sender;
        charter.cli_session = overrides.session;

        Ok(Self {
            project_dir: charter.project_dir.clone(),
            charter_dir: charter.charter_dir.clone(),
            state_db: charter.state_db(),
            session: charter.session(),
            verbose,
            charter,
        })
    }

    pub fn charter(&self) -> &CharterConfig {
        &self.charter
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.charter_dir).with_context(|| {
            format!(
                "Failed to create charter directory {}",
                self.charter_dir.display()
            )
        })
    }

    pub fn open_store(&self) -> Result<SqliteStore> {
        self.ensure_directories()?;
        SqliteStore::open(&self.state_db)
    }

    /// Connect to the configured node and build an orchestrator over the
    /// SQLite store.
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let settings = self
            .charter
            .rpc_settings()
            .context("Chain connection is not configured")?;
        let chain = Arc::new(RpcChain::new(settings));
        let store = self.open_store()?;

        Ok(Orchestrator::new(
            Collaborators {
                registrar: chain.clone(),
                factory: chain.clone(),
                registry: chain.clone(),
                client: chain,
            },
            Arc::new(store),
            Arc::new(SystemClock),
            self.charter.step_settings(),
        ))
    }

    pub fn duration_years(&self) -> u32 {
        self.charter.toml.registration.duration_years
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cli_session_overrides_environment() {
        let dir = tempdir().unwrap();
        let config = Config::new(
            dir.path().to_path_buf(),
            false,
            CliOverrides {
                session: Some("alice".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(config.session.as_str(), "alice");
    }

    #[test]
    fn test_state_db_in_charter_directory() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false, CliOverrides::default()).unwrap();
        assert_eq!(
            config.state_db,
            dir.path().canonicalize().unwrap().join(".charter/state.db")
        );
    }

    #[test]
    fn test_open_store_creates_directory() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false, CliOverrides::default()).unwrap();
        config.open_store().unwrap();
        assert!(config.charter_dir.exists());
        assert!(config.state_db.exists());
    }

    #[test]
    fn test_orchestrator_requires_chain_settings() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false, CliOverrides::default()).unwrap();
        let err = config.orchestrator().err().unwrap();
        assert!(err.to_string().contains("not configured"));
    }
}
