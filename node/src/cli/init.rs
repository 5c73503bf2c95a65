use clap::Parser;

use crate::config::{
    Configuration, DbConfig, NodeConfiguration, TrustChainConfiguration, DEFAULT_CRAWL_LIMIT,
    DEFAULT_MIN_TRANSACTION_SIZE, DEFAULT_PENDING_EXPIRY_SEC, DEFAULT_PENDING_SWEEP_INTERVAL_SEC,
    DEFAULT_SCORE_BOUNDARY, DEFAULT_SIGN_DELAY_MS, DEFAULT_SIGN_TIMEOUT_MS,
};
use crate::utilities::crypto::key_manager::KeyManager;
use crate::utilities::crypto::{Keypair, TrustChainKeypair};

const SQLITE_FILE_NAME: &str = "trustchain.sqlite";

#[derive(Debug, Clone, Parser)]
pub struct InitCmd {
    #[arg(long, default_value = "default")]
    pub node_name: String,
    /// Base58 private key of the chain owner, a new one is generated when missing.
    #[arg(long)]
    pub private_key: Option<String>,
    #[arg(long, default_value_t = DEFAULT_MIN_TRANSACTION_SIZE)]
    pub min_transaction_size: u64,
    #[arg(long, default_value_t = DEFAULT_SIGN_DELAY_MS)]
    pub sign_delay_ms: u64,
    #[arg(long, default_value_t = DEFAULT_SIGN_TIMEOUT_MS)]
    pub sign_timeout_ms: u64,
    #[arg(long, default_value_t = DEFAULT_PENDING_EXPIRY_SEC)]
    pub pending_expiry_sec: u64,
    #[arg(long, default_value_t = DEFAULT_CRAWL_LIMIT)]
    pub crawl_limit: i64,
}

impl InitCmd {
    pub fn execute(self) -> anyhow::Result<()> {
        if Configuration::try_load_from_home_dir(&self.node_name).is_ok() {
            anyhow::bail!("Configuration file already exists: {}", self.node_name);
        }

        let path = Configuration::get_node_dir(&self.node_name)?;
        println!("Creating TrustChain node configuration in: {path:?}");

        let private_key = match self.private_key {
            Some(private_key) => {
                KeyManager::read_keypair_from_str(&private_key)?;
                private_key
            }
            None => Keypair::generate(None).to_base58(),
        };

        let configuration = Configuration {
            node: NodeConfiguration { private_key },
            storage: DbConfig {
                sqlite_path: path.join(SQLITE_FILE_NAME).display().to_string(),
                create_if_not_exists: true,
            },
            trustchain: TrustChainConfiguration {
                min_transaction_size: self.min_transaction_size,
                sign_delay_ms: self.sign_delay_ms,
                sign_timeout_ms: self.sign_timeout_ms,
                pending_expiry_sec: self.pending_expiry_sec,
                pending_sweep_interval_sec: DEFAULT_PENDING_SWEEP_INTERVAL_SEC,
                crawl_limit: self.crawl_limit,
                score_boundary: DEFAULT_SCORE_BOUNDARY,
            },
        };

        configuration.try_write_home_dir(&self.node_name)?;
        println!("Configuration written for node {}", self.node_name);
        Ok(())
    }
}
