use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const TRUSTCHAIN_ROOT_DIR: &str = ".trustchain";
const TRUSTCHAIN_CONFIG_FILE: &str = "trustchain.toml";

//protocol settings
pub const DEFAULT_MIN_TRANSACTION_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_SIGN_DELAY_MS: u64 = 5_000;
pub const DEFAULT_SIGN_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PENDING_EXPIRY_SEC: u64 = 2 * 60;
pub const DEFAULT_PENDING_SWEEP_INTERVAL_SEC: u64 = 10;
pub const DEFAULT_CRAWL_LIMIT: i64 = 100;
pub const DEFAULT_SCORE_BOUNDARY: u64 = 10_000_000_000;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("ConfigDoesNotExist: '{0}'")]
    DoesNotExist(String),
    #[error("ParsingFailed: {0}")]
    ParsingFailed(#[from] config::ConfigError),
    #[error("TomlError: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Home directory not found")]
    NoHomeDir,
}

type Result<T> = std::result::Result<T, ConfigurationError>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Configuration {
    pub node: NodeConfiguration,
    pub storage: DbConfig,
    #[serde(default)]
    pub trustchain: TrustChainConfiguration,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeConfiguration {
    /// Base58 encoded ed25519 private key of the chain owner.
    pub private_key: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DbConfig {
    pub sqlite_path: String,
    pub create_if_not_exists: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrustChainConfiguration {
    /// Interactions smaller than this (up + down, in bytes) are discarded.
    pub min_transaction_size: u64,
    /// Delay before a proposal is sent, gives the counterparty time to register the same interaction.
    pub sign_delay_ms: u64,
    /// How long a proposer waits for the counter signature.
    pub sign_timeout_ms: u64,
    pub pending_expiry_sec: u64,
    pub pending_sweep_interval_sec: u64,
    /// Number of blocks returned for a crawl request, at most 100.
    pub crawl_limit: i64,
    pub score_boundary: u64,
}

impl Default for TrustChainConfiguration {
    fn default() -> Self {
        Self {
            min_transaction_size: DEFAULT_MIN_TRANSACTION_SIZE,
            sign_delay_ms: DEFAULT_SIGN_DELAY_MS,
            sign_timeout_ms: DEFAULT_SIGN_TIMEOUT_MS,
            pending_expiry_sec: DEFAULT_PENDING_EXPIRY_SEC,
            pending_sweep_interval_sec: DEFAULT_PENDING_SWEEP_INTERVAL_SEC,
            crawl_limit: DEFAULT_CRAWL_LIMIT,
            score_boundary: DEFAULT_SCORE_BOUNDARY,
        }
    }
}

impl TrustChainConfiguration {
    pub fn sign_delay(&self) -> Duration {
        Duration::from_millis(self.sign_delay_ms)
    }

    pub fn sign_timeout(&self) -> Duration {
        Duration::from_millis(self.sign_timeout_ms)
    }

    pub fn pending_expiry(&self) -> Duration {
        Duration::from_secs(self.pending_expiry_sec)
    }

    pub fn pending_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.pending_sweep_interval_sec.max(1))
    }
}

impl Configuration {
    pub fn try_load<I: Into<PathBuf>>(path: I) -> Result<Configuration> {
        let path = path.into();
        if !path.exists() {
            return Err(ConfigurationError::DoesNotExist(path.display().to_string()));
        }
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        config.try_deserialize().map_err(|err| err.into())
    }

    pub fn try_load_from_home_dir(node_name: &str) -> Result<Configuration> {
        let file_path = Self::get_config_file_path(node_name)?;
        Configuration::try_load(file_path)
    }

    pub fn try_write<I: Into<PathBuf>>(&self, path: I) -> Result<()> {
        let config = toml::to_string(&self)?;

        let config = format!(
            "#This file is generated by cli and automatically overwritten every time when cli is run\n{config}",
        );

        let mut file = std::fs::File::create(path.into())?;
        file.write_all(config.as_bytes())?;

        Ok(())
    }

    pub fn try_write_home_dir(&self, node_name: &str) -> Result<()> {
        let conf_path = Self::get_node_dir(node_name)?;
        if !conf_path.exists() {
            std::fs::create_dir_all(&conf_path)?;
        }
        self.try_write(conf_path.join(TRUSTCHAIN_CONFIG_FILE))
    }

    pub fn trustchain_root_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(TRUSTCHAIN_ROOT_DIR))
            .ok_or(ConfigurationError::NoHomeDir)
    }

    pub fn get_node_dir(node_name: &str) -> Result<PathBuf> {
        Ok(Self::trustchain_root_dir()?.join(node_name))
    }

    pub fn get_config_file_path(node_name: &str) -> Result<PathBuf> {
        Ok(Self::get_node_dir(node_name)?.join(TRUSTCHAIN_CONFIG_FILE))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn configuration() -> Configuration {
        Configuration {
            node: NodeConfiguration {
                private_key: "key".to_string(),
            },
            storage: DbConfig {
                sqlite_path: "/tmp/trustchain.sqlite".to_string(),
                create_if_not_exists: true,
            },
            trustchain: TrustChainConfiguration {
                sign_timeout_ms: 500,
                ..Default::default()
            },
        }
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRUSTCHAIN_CONFIG_FILE);

        let configuration = configuration();
        configuration.try_write(&path).unwrap();

        let loaded = Configuration::try_load(&path).unwrap();
        assert_eq!(configuration, loaded);
        assert_eq!(loaded.trustchain.sign_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn missing_trustchain_section_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRUSTCHAIN_CONFIG_FILE);
        std::fs::write(
            &path,
            "[node]\nprivate_key = \"key\"\n\n[storage]\nsqlite_path = \"db.sqlite\"\ncreate_if_not_exists = true\n",
        )
        .unwrap();

        let loaded = Configuration::try_load(&path).unwrap();
        assert_eq!(loaded.trustchain, TrustChainConfiguration::default());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = Configuration::try_load(dir.path().join("missing.toml"));

        assert!(matches!(result, Err(ConfigurationError::DoesNotExist(_))));
    }
}
