use clap::Parser;

use crate::utilities::crypto::{Keypair, TrustChainKeypair};

#[derive(Debug, Clone, Parser)]
pub struct GenerateKeypairCmd {
    /// Derive the keypair from this seed instead of generating a random one.
    #[clap(long)]
    seed: Option<String>,
}

impl GenerateKeypairCmd {
    pub fn execute(self) -> anyhow::Result<()> {
        let keypair = Keypair::generate(self.seed.map(String::into_bytes));
        println!("Private key: {:>5}", keypair.to_base58());
        println!("Public  key: {:>5}", keypair.public_key());
        Ok(())
    }
}
