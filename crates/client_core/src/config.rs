use std::{path::{Path, PathBuf}, str::FromStr, time::Duration};

use alloy_primitives::Address;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::submitter::GasPolicy;

pub const DEFAULT_SETTINGS_FILE: &str = "ballot.toml";
pub const ENV_PREFIX: &str = "BALLOT";
/// Development deployment used when the build artifact has no usable address.
pub const DEFAULT_FALLBACK_CONTRACT: &str = "0x7394c1C2BC86100EE4461BC7fF636105E08c1e16";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid endpoint '{url}': {message}")]
    InvalidEndpoint { url: String, message: String },
    #[error("invalid contract address '{0}'")]
    InvalidAddress(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub node_host: String,
    pub node_port: u16,
    /// Network the local node is expected to report; used when `net_version` is unavailable.
    pub network_id: String,
    /// Wallet JSON-RPC endpoint that grants account access on user approval.
    pub signer_url: Option<String>,
    pub artifact_path: PathBuf,
    /// An empty string disables the fallback.
    pub fallback_contract_address: Option<String>,
    pub login_url: Option<String>,
    pub receipt_poll_interval_ms: u64,
    pub gas: GasPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node_host: "127.0.0.1".into(),
            node_port: 7545,
            network_id: "5777".into(),
            signer_url: None,
            artifact_path: PathBuf::from("build/contracts/Voting.json"),
            fallback_contract_address: Some(DEFAULT_FALLBACK_CONTRACT.into()),
            login_url: None,
            receipt_poll_interval_ms: 250,
            gas: GasPolicy::default(),
        }
    }
}

impl Settings {
    /// Defaults, then `ballot.toml` in the working directory, then `BALLOT__*` variables.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(Path::new(DEFAULT_SETTINGS_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn node_url(&self) -> String {
        format!("http://{}:{}", self.node_host, self.node_port)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn fallback_address(&self) -> Result<Option<Address>, SettingsError> {
        self.fallback_contract_address
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                Address::from_str(raw).map_err(|_| SettingsError::InvalidAddress(raw.to_string()))
            })
            .transpose()
    }
}
