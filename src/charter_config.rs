//! Project configuration read from `.charter/charter.toml`.
//!
//! Values are layered file → environment → CLI. Every section is optional and
//! falls back to defaults, so an empty file is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [network]
//! rpc_url = "http://127.0.0.1:8545"
//! sender = "0x..."
//! poll_interval_ms = 2000
//! receipt_timeout_secs = 180
//!
//! [contracts]
//! controller = "0x253553366Da8546fC250F225fe3d25d0C782303b"
//! name_wrapper = "0xD4416b13d2b3a9aBae7AcD5D6C2BbDBE25686401"
//! ens_registry = "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e"
//! resolver = "0x231b0Ee14048e9dCcD1d247744d114a4EB5E8E63"
//! company_registry = "0x..."
//!
//! [registration]
//! duration_years = 1
//! fee_buffer_bps = 200
//! commit_maturity_secs = 60
//!
//! [store]
//! path = "state.db"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy_primitives::{Address, address};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::chain::rpc::{ContractAddresses, RpcSettings};
use crate::registration::{SessionId, StepSettings};
use crate::safe::{DEFAULT_FALLBACK_HANDLER, DEFAULT_PROXY_FACTORY, DEFAULT_SINGLETON, SafeDeployment};

pub const CHARTER_DIR: &str = ".charter";
pub const CONFIG_FILE: &str = "charter.toml";

pub const ENV_RPC_URL: &str = "CHARTER_RPC_URL";
pub const ENV_SENDER: &str = "CHARTER_SENDER";
pub const ENV_SESSION: &str = "CHARTER_SESSION";

/// Node connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Node-managed account that signs and pays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_receipt_timeout_secs() -> u64 {
    180
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            sender: None,
            poll_interval_ms: default_poll_interval_ms(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
        }
    }
}

/// Contract addresses. ENS and Safe default to their mainnet deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsSection {
    #[serde(default = "default_controller")]
    pub controller: Address,
    #[serde(default = "default_name_wrapper")]
    pub name_wrapper: Address,
    #[serde(default = "default_ens_registry")]
    pub ens_registry: Address,
    #[serde(default = "default_resolver")]
    pub resolver: Address,
    /// No public deployment exists, so this has no default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_registry: Option<Address>,
    #[serde(default = "default_safe_factory")]
    pub safe_factory: Address,
    #[serde(default = "default_safe_singleton")]
    pub safe_singleton: Address,
    #[serde(default = "default_fallback_handler")]
    pub fallback_handler: Address,
}

fn default_controller() -> Address {
    address!("253553366da8546fc250f225fe3d25d0c782303b")
}

fn default_name_wrapper() -> Address {
    address!("d4416b13d2b3a9abae7acd5d6c2bbdbe25686401")
}

fn default_ens_registry() -> Address {
    address!("00000000000c2e074ec69a0dfb2997ba6c7d2e1e")
}

fn default_resolver() -> Address {
    address!("231b0ee14048e9dccd1d247744d114a4eb5e8e63")
}

fn default_safe_factory() -> Address {
    DEFAULT_PROXY_FACTORY
}

fn default_safe_singleton() -> Address {
    DEFAULT_SINGLETON
}

fn default_fallback_handler() -> Address {
    DEFAULT_FALLBACK_HANDLER
}

impl Default for ContractsSection {
    fn default() -> Self {
        Self {
            controller: default_controller(),
            name_wrapper: default_name_wrapper(),
            ens_registry: default_ens_registry(),
            resolver: default_resolver(),
            company_registry: None,
            safe_factory: default_safe_factory(),
            safe_singleton: default_safe_singleton(),
            fallback_handler: default_fallback_handler(),
        }
    }
}

impl ContractsSection {
    pub fn safe_deployment(&self) -> SafeDeployment {
        SafeDeployment {
            factory: self.safe_factory,
            singleton: self.safe_singleton,
            fallback_handler: self.fallback_handler,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationSection {
    #[serde(default = "default_duration_years")]
    pub duration_years: u32,
    /// Headroom on top of the quoted rent, in basis points.
    #[serde(default = "default_fee_buffer_bps")]
    pub fee_buffer_bps: u32,
    #[serde(default = "default_commit_maturity_secs")]
    pub commit_maturity_secs: u64,
}

fn default_duration_years() -> u32 {
    1
}

fn default_fee_buffer_bps() -> u32 {
    200
}

fn default_commit_maturity_secs() -> u64 {
    60
}

impl Default for RegistrationSection {
    fn default() -> Self {
        Self {
            duration_years: default_duration_years(),
            fee_buffer_bps: default_fee_buffer_bps(),
            commit_maturity_secs: default_commit_maturity_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// SQLite file, relative to the `.charter` directory.
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "state.db".to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// The complete charter.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharterToml {
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub contracts: ContractsSection,
    #[serde(default)]
    pub registration: RegistrationSection,
    #[serde(default)]
    pub store: StoreSection,
}

impl CharterToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse charter.toml")
    }

    /// Load `.charter/charter.toml`, or defaults if it does not exist.
    pub fn load_or_default(charter_dir: &Path) -> Result<Self> {
        let config_path = charter_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize charter.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Return warnings for settings that will not work as configured.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let url = &self.network.rpc_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            warnings.push(format!(
                "rpc_url '{}' should start with http:// or https://",
                url
            ));
        }
        if self.network.sender.is_none() {
            warnings.push(format!(
                "No sender configured. Set [network].sender or {}",
                ENV_SENDER
            ));
        }
        if self.network.poll_interval_ms == 0 {
            warnings.push("poll_interval_ms must be greater than 0".to_string());
        }
        if self.contracts.company_registry.is_none() {
            warnings.push("No company_registry address configured in [contracts]".to_string());
        }
        if self.registration.duration_years == 0 {
            warnings.push("duration_years must be at least 1".to_string());
        }
        if self.registration.fee_buffer_bps > 10_000 {
            warnings.push(format!(
                "fee_buffer_bps {} is more than 100% of the rent",
                self.registration.fee_buffer_bps
            ));
        }
        if self.registration.commit_maturity_secs < default_commit_maturity_secs() {
            warnings.push(format!(
                "commit_maturity_secs {} is below the registrar minimum of 60; reveals will revert",
                self.registration.commit_maturity_secs
            ));
        }

        warnings
    }
}

/// charter.toml merged with environment and CLI overrides.
#[derive(Debug, Clone)]
pub struct CharterConfig {
    pub project_dir: PathBuf,
    pub charter_dir: PathBuf,
    pub toml: CharterToml,
    pub cli_rpc_url: Option<String>,
    pub cli_sender: Option<Address>,
    pub cli_session: Option<String>,
}

impl CharterConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let charter_dir = project_dir.join(CHARTER_DIR);
        let toml = CharterToml::load_or_default(&charter_dir)?;

        Ok(Self {
            project_dir,
            charter_dir,
            toml,
            cli_rpc_url: None,
            cli_sender: None,
            cli_session: None,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.charter_dir.join(CONFIG_FILE)
    }

    /// RPC endpoint (CLI → env → file).
    pub fn rpc_url(&self) -> String {
        self.cli_rpc_url
            .clone()
            .or_else(|| std::env::var(ENV_RPC_URL).ok())
            .unwrap_or_else(|| self.toml.network.rpc_url.clone())
    }

    /// Sending account (CLI → env → file).
    pub fn sender(&self) -> Result<Address> {
        if let Some(sender) = self.cli_sender {
            return Ok(sender);
        }
        if let Ok(raw) = std::env::var(ENV_SENDER) {
            return raw
                .trim()
                .parse()
                .with_context(|| format!("{} is not an address: '{}'", ENV_SENDER, raw));
        }
        self.toml.network.sender.with_context(|| {
            format!(
                "No sender configured. Set [network].sender in {} or {}",
                self.config_file().display(),
                ENV_SENDER
            )
        })
    }

    /// Session owning the registration slot (CLI → env → $USER → "default").
    pub fn session(&self) -> SessionId {
        let id = self
            .cli_session
            .clone()
            .or_else(|| std::env::var(ENV_SESSION).ok())
            .or_else(|| std::env::var("USER").ok())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "default".to_string());
        SessionId::new(id)
    }

    pub fn state_db(&self) -> PathBuf {
        self.charter_dir.join(&self.toml.store.path)
    }

    pub fn step_settings(&self) -> StepSettings {
        StepSettings {
            commit_maturity: chrono::Duration::seconds(
                self.toml.registration.commit_maturity_secs as i64,
            ),
            fee_buffer_bps: self.toml.registration.fee_buffer_bps,
            resolver: self.toml.contracts.resolver,
        }
    }

    pub fn rpc_settings(&self) -> Result<RpcSettings> {
        let contracts = &self.toml.contracts;
        let company_registry = contracts.company_registry.with_context(|| {
            format!(
                "No company_registry address configured in {}",
                self.config_file().display()
            )
        })?;
        Ok(RpcSettings {
            url: self.rpc_url(),
            sender: self.sender()?,
            contracts: ContractAddresses {
                controller: contracts.controller,
                name_wrapper: contracts.name_wrapper,
                ens_registry: contracts.ens_registry,
                company_registry,
                safe: contracts.safe_deployment(),
            },
            poll_interval: Duration::from_millis(self.toml.network.poll_interval_ms),
            receipt_timeout: Duration::from_secs(self.toml.network.receipt_timeout_secs),
        })
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = CharterToml::parse("").unwrap();
        assert_eq!(toml.network.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(toml.registration.fee_buffer_bps, 200);
        assert_eq!(toml.registration.commit_maturity_secs, 60);
        assert_eq!(toml.store.path, "state.db");
        assert_eq!(toml.contracts.safe_factory, DEFAULT_PROXY_FACTORY);
        assert!(toml.contracts.company_registry.is_none());
    }

    #[test]
    fn test_parse_sections() {
        let content = r#"
[network]
rpc_url = "https://rpc.example.org"
sender = "0x1111111111111111111111111111111111111111"

[contracts]
company_registry = "0x2222222222222222222222222222222222222222"

[registration]
duration_years = 3
fee_buffer_bps = 500
"#;
        let toml = CharterToml::parse(content).unwrap();
        assert_eq!(toml.network.rpc_url, "https://rpc.example.org");
        assert_eq!(toml.network.sender, Some(Address::repeat_byte(0x11)));
        assert_eq!(
            toml.contracts.company_registry,
            Some(Address::repeat_byte(0x22))
        );
        assert_eq!(toml.registration.duration_years, 3);
        assert_eq!(toml.registration.fee_buffer_bps, 500);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_address() {
        let content = r#"
[network]
sender = "not-an-address"
"#;
        assert!(CharterToml::parse(content).is_err());
    }

    #[test]
    fn test_validate_flags_missing_and_unsafe_settings() {
        let mut toml = CharterToml::default();
        toml.network.rpc_url = "localhost:8545".into();
        toml.registration.commit_maturity_secs = 10;
        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("rpc_url")));
        assert!(warnings.iter().any(|w| w.contains("sender")));
        assert!(warnings.iter().any(|w| w.contains("company_registry")));
        assert!(warnings.iter().any(|w| w.contains("commit_maturity_secs")));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = CharterToml::default();
        toml.contracts.company_registry = Some(Address::repeat_byte(0x33));
        toml.save(&path).unwrap();

        let loaded = CharterToml::load(&path).unwrap();
        assert_eq!(
            loaded.contracts.company_registry,
            Some(Address::repeat_byte(0x33))
        );
    }

    #[test]
    fn test_rpc_url_priority() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = std::env::var(ENV_RPC_URL).ok();
        unsafe { std::env::remove_var(ENV_RPC_URL) };

        let dir = tempdir().unwrap();
        let mut config = CharterConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.rpc_url(), "http://127.0.0.1:8545");

        unsafe { std::env::set_var(ENV_RPC_URL, "http://env:8545") };
        assert_eq!(config.rpc_url(), "http://env:8545");

        config.cli_rpc_url = Some("http://cli:8545".into());
        assert_eq!(config.rpc_url(), "http://cli:8545");

        unsafe { std::env::remove_var(ENV_RPC_URL) };
        if let Some(val) = saved {
            unsafe { std::env::set_var(ENV_RPC_URL, val) };
        }
    }

    #[test]
    fn test_rpc_settings_require_registry_and_sender() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = std::env::var(ENV_SENDER).ok();
        unsafe { std::env::remove_var(ENV_SENDER) };

        let dir = tempdir().unwrap();
        let mut config = CharterConfig::new(dir.path().to_path_buf()).unwrap();
        assert!(config.rpc_settings().is_err());

        config.toml.contracts.company_registry = Some(Address::repeat_byte(0x22));
        let err = config.rpc_settings().unwrap_err();
        assert!(err.to_string().contains("sender"));

        config.cli_sender = Some(Address::repeat_byte(0x11));
        let settings = config.rpc_settings().unwrap();
        assert_eq!(settings.sender, Address::repeat_byte(0x11));
        assert_eq!(settings.poll_interval, Duration::from_millis(2_000));

        if let Some(val) = saved {
            unsafe { std::env::set_var(ENV_SENDER, val) };
        }
    }

    #[test]
    fn test_state_db_lives_in_charter_dir() {
        let dir = tempdir().unwrap();
        let config = CharterConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(
            config.state_db(),
            dir.path().canonicalize().unwrap().join(".charter/state.db")
        );
    }
}
