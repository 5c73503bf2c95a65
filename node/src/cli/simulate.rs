use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::api::types::ApiGraphRequest;
use crate::block::Interaction;
use crate::config::{Configuration, DbConfig, NodeConfiguration, TrustChainConfiguration};
use crate::core::builder::{TrustChainHandle, TrustChainStarter};
use crate::network::memory::MemoryNetwork;
use crate::utilities::crypto::{Keypair, PublicKey, TrustChainKeypair};

/// Runs several nodes in-process and lets random pairs of them exchange bytes.
#[derive(Debug, Clone, Parser)]
pub struct SimulateCmd {
    #[arg(long, default_value_t = 4)]
    pub nodes: usize,
    #[arg(long, default_value_t = 20)]
    pub rounds: usize,
    /// Largest amount of bytes sent one way in a single interaction.
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub max_bytes: u64,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Directory for the node databases.
    #[arg(long)]
    pub dir: Option<PathBuf>,
    #[arg(long, default_value_t = 100)]
    pub sign_delay_ms: u64,
}

impl SimulateCmd {
    pub async fn execute(self) -> anyhow::Result<()> {
        if self.nodes < 2 {
            anyhow::bail!("Simulation needs at least two nodes");
        }
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let dir = self
            .dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("trustchain-simulation"));
        std::fs::create_dir_all(&dir)?;
        println!("Simulating {} nodes in {dir:?}", self.nodes);

        let network = MemoryNetwork::new();
        let mut nodes: Vec<(PublicKey, TrustChainHandle)> = Vec::with_capacity(self.nodes);
        for index in 0..self.nodes {
            let keypair = Keypair::generate(None);
            let public_key = keypair.public_key();
            let config = self.configuration(&dir, index, &keypair);
            let (transport, from_network) = network.join(public_key);
            let node = TrustChainStarter::new(config)?
                .with_network(transport, from_network)
                .init_tasks()?;
            nodes.push((public_key, node.handle()));
            tokio::spawn(node.run());
        }

        let pause = Duration::from_millis(self.sign_delay_ms * 3);
        for round in 0..self.rounds {
            let first = rng.gen_range(0..nodes.len());
            let second = (first + rng.gen_range(1..nodes.len())) % nodes.len();
            let interaction = Interaction::new(rng.gen_range(0..=self.max_bytes), rng.gen_range(0..=self.max_bytes));
            let (first_pk, first_node) = &nodes[first];
            let (second_pk, second_node) = &nodes[second];

            let decisions = join_all([
                first_node.api.report_interaction(*second_pk, interaction),
                second_node.api.report_interaction(*first_pk, interaction.mirrored()),
            ])
            .await;
            println!(
                "Round {round}: {} <-> {} ({interaction}): {:?}",
                first_pk.short(),
                second_pk.short(),
                decisions
                    .into_iter()
                    .map(|decision| decision.map_err(|err| err.to_string()))
                    .collect::<Vec<_>>()
            );
            tokio::time::sleep(pause).await;
        }

        for (_, node) in &nodes {
            println!("{}", node.api.get_statistics(None).await?);
        }
        let (focus, node) = &nodes[0];
        let graph = node.api.get_graph(ApiGraphRequest::new(*focus, 2)).await?;
        println!("Graph around {}: {} nodes, {} edges", focus.short(), graph.nodes.len(), graph.edges.len());

        for (_, node) in &mut nodes {
            node.shutdown.shutdown();
        }
        Ok(())
    }

    fn configuration(&self, dir: &std::path::Path, index: usize, keypair: &Keypair) -> Configuration {
        Configuration {
            node: NodeConfiguration {
                private_key: keypair.to_base58(),
            },
            storage: DbConfig {
                sqlite_path: dir
                    .join(format!("node-{index}-{}.sqlite", keypair.public_key().short()))
                    .display()
                    .to_string(),
                create_if_not_exists: true,
            },
            trustchain: TrustChainConfiguration {
                sign_delay_ms: self.sign_delay_ms,
                ..Default::default()
            },
        }
    }
}
