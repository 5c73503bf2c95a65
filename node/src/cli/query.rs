//! Read only commands answered from a node's database.
//!
//! The node runs in-process on a private network, so only blocks already stored are visible.

use clap::Parser;
use tokio::task::JoinHandle;

use crate::api::types::ApiGraphRequest;
use crate::config::Configuration;
use crate::core::builder::{TrustChainHandle, TrustChainStarter};
use crate::logging::pretty_json;
use crate::network::memory::MemoryNetwork;
use crate::utilities::crypto::PublicKey;

struct LocalNode {
    handle: TrustChainHandle,
    public_key: PublicKey,
    task: JoinHandle<()>,
}

impl LocalNode {
    fn start(node_name: &str) -> anyhow::Result<Self> {
        let config = match Configuration::try_load_from_home_dir(node_name) {
            Ok(config) => config,
            Err(err) => anyhow::bail!("Error loading configuration of node {node_name}: {err}"),
        };
        let starter = TrustChainStarter::new(config)?;
        let public_key = starter.public_key();
        let (transport, from_network) = MemoryNetwork::new().join(public_key);
        let node = starter.with_network(transport, from_network).init_tasks()?;
        let handle = node.handle();
        let task = tokio::spawn(node.run());
        Ok(Self {
            handle,
            public_key,
            task,
        })
    }

    async fn stop(mut self) -> anyhow::Result<()> {
        self.handle.shutdown.shutdown();
        self.task.await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Parser)]
pub struct StatisticsCmd {
    #[arg(long, default_value = "default")]
    pub node_name: String,
    /// Hex public key, the node's own when missing.
    #[arg(long)]
    pub public_key: Option<PublicKey>,
}

impl StatisticsCmd {
    pub async fn execute(self) -> anyhow::Result<()> {
        let node = LocalNode::start(&self.node_name)?;
        let statistics = node.handle.api.get_statistics(self.public_key).await;
        node.stop().await?;

        let statistics = statistics?;
        println!("{statistics}");
        println!("{}", pretty_json(&statistics));
        Ok(())
    }
}

#[derive(Debug, Clone, Parser)]
pub struct BlocksCmd {
    #[arg(long, default_value = "default")]
    pub node_name: String,
    #[arg(long)]
    pub public_key: Option<PublicKey>,
    #[arg(long, default_value_t = 10)]
    pub limit: i64,
}

impl BlocksCmd {
    pub async fn execute(self) -> anyhow::Result<()> {
        let node = LocalNode::start(&self.node_name)?;
        let public_key = self.public_key.unwrap_or(node.public_key);
        let blocks = node.handle.api.get_latest_blocks(public_key, self.limit).await;
        node.stop().await?;

        for block in blocks? {
            println!("{block}");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Parser)]
pub struct CrawlCmd {
    #[arg(long, default_value = "default")]
    pub node_name: String,
    #[arg(long)]
    pub public_key: PublicKey,
    #[arg(long, default_value_t = 1)]
    pub sequence_number: u64,
    #[arg(long, default_value_t = 100)]
    pub limit: i64,
}

impl CrawlCmd {
    pub async fn execute(self) -> anyhow::Result<()> {
        let node = LocalNode::start(&self.node_name)?;
        let blocks = node
            .handle
            .api
            .crawl(self.public_key, self.sequence_number, self.limit)
            .await;
        node.stop().await?;

        for block in blocks? {
            println!("{}", pretty_json(&block));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Parser)]
pub struct GraphCmd {
    #[arg(long, default_value = "default")]
    pub node_name: String,
    /// Hex public key to center on, the node's own when missing.
    #[arg(long)]
    pub focus: Option<PublicKey>,
    #[arg(long, default_value_t = 1)]
    pub neighbor_level: u32,
    #[arg(long, default_value_t = 0)]
    pub extra_hop_budget: usize,
    #[arg(long)]
    pub exclude: Vec<PublicKey>,
}

impl GraphCmd {
    pub async fn execute(self) -> anyhow::Result<()> {
        let node = LocalNode::start(&self.node_name)?;
        let request = ApiGraphRequest {
            focus: self.focus.unwrap_or(node.public_key),
            neighbor_level: self.neighbor_level,
            extra_hop_budget: self.extra_hop_budget,
            excluded: self.exclude.into_iter().collect(),
        };
        let graph = node.handle.api.get_graph(request).await;
        node.stop().await?;

        let graph = graph?;
        for node in &graph.nodes {
            println!(
                "{} up: {} down: {} neighbors: {} score: {:.4}",
                node.public_key, node.total_up, node.total_down, node.neighbors, node.score
            );
        }
        for edge in &graph.edges {
            println!("{} -> {}: {}", edge.from.short(), edge.to.short(), edge.amount);
        }
        Ok(())
    }
}
