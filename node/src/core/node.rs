use std::sync::Arc;

use crate::api::ApiListener;
use crate::core::api_cmd::ApiCmdProcessor;
use crate::core::builder::{NodeInfo, TrustChainHandle};
use crate::core::shutdown::ShutdownManager;
use crate::graph::GraphBuilder;
use crate::network::NetCommunicationReceiver;
use crate::signing::protocol::SigningProtocol;
use crate::storage::BlockStore;
use crate::utilities::crypto::PublicKey;
use crate::validation::ChainValidator;

pub struct TrustChainNode {
    pub(crate) node_info: NodeInfo,

    /// Negotiates blocks with counterparties and answers their requests.
    pub(crate) protocol: Arc<SigningProtocol>,

    pub(crate) store: Arc<dyn BlockStore>,

    /// Checks blocks added through the API.
    pub(crate) validator: ChainValidator,

    pub(crate) graph: GraphBuilder,

    /// A component which receives messages from network.
    pub(crate) from_network: NetCommunicationReceiver,

    /// A component which listens API requests.
    pub(crate) api_listener: ApiListener,

    ///Interface to external Rust code
    pub(crate) handle: TrustChainHandle,

    /// A component which handles shutdown.
    pub(crate) shutdown_manager: Option<ShutdownManager>,
}

impl TrustChainNode {
    ///Provides external api for Rust code to interact with the node.
    pub fn handle(&self) -> TrustChainHandle {
        self.handle.clone()
    }

    pub fn public_key(&self) -> PublicKey {
        self.node_info.public_key
    }

    /// Main loop of the node.
    /// 1. Receive chain messages from counterparties.
    /// 2. Receive api requests.
    /// 3. Stop on shutdown request.
    ///
    /// Network messages are handled one at a time in arrival order. Waiting for a counter
    /// signature happens in spawned tasks so it never blocks the loop.
    pub async fn run(mut self) {
        log::info!("Starting TrustChain node {}", self.node_info);

        let Some(mut shutdown_manager) = self.shutdown_manager.take() else {
            log::error!("Shutdown manager not set");
            return;
        };

        loop {
            tokio::select! {
                // PROCESSING NETWORK EVENTS
                Some(net_event) = self.from_network.net_event_rcv.recv() => {
                    if let Err(err) = self.protocol.handle_event(net_event).await {
                        log::error!("Error processing network event: {err}");
                    }
                }

                //PROCESSING EXTERNAL API REQUESTS
                api = self.api_listener.messages_rcv.recv() => {
                    match api {
                        Some(api_msg) => ApiCmdProcessor::process_api_requests(&mut self, api_msg),
                        None => {
                            log::error!("Error: Api listener channel closed");
                            shutdown_manager.stop().await;
                            break;
                        }
                    }
                }

                //PROCESSING SHUTDOWN REQUEST
                _ = shutdown_manager.external_shutdown.recv() => {
                    log::info!("Shutting down TrustChain node");
                    shutdown_manager.stop().await;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use tempfile::TempDir;

    use crate::api::types::ApiGraphRequest;
    use crate::api::ApiError;
    use crate::block::types::block::test::{keypair, signed_request};
    use crate::block::Interaction;
    use crate::config::{Configuration, DbConfig, NodeConfiguration, TrustChainConfiguration};
    use crate::core::builder::TrustChainStarter;
    use crate::network::memory::MemoryNetwork;
    use crate::signing::{InteractionDecision, SignOutcome};
    use crate::utilities::crypto::{Keypair, TrustChainKeypair};

    use super::*;

    fn configuration(dir: &TempDir, keypair: &Keypair) -> Configuration {
        Configuration {
            node: NodeConfiguration {
                private_key: keypair.to_base58(),
            },
            storage: DbConfig {
                sqlite_path: dir.path().join("trustchain.sqlite").display().to_string(),
                create_if_not_exists: true,
            },
            trustchain: TrustChainConfiguration {
                min_transaction_size: 0,
                sign_delay_ms: 0,
                ..Default::default()
            },
        }
    }

    fn start(network: &MemoryNetwork, dir: &TempDir, name: &str) -> TrustChainHandle {
        let keypair = keypair(name);
        let (transport, from_network) = network.join(keypair.public_key());
        let node = TrustChainStarter::new(configuration(dir, &keypair))
            .unwrap()
            .with_network(transport, from_network)
            .init_tasks()
            .unwrap();
        let handle = node.handle();
        tokio::spawn(node.run());
        handle
    }

    #[tokio::test]
    async fn nodes_sign_reported_interaction() {
        let network = MemoryNetwork::new();
        let (alice_dir, bob_dir) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let alice = start(&network, &alice_dir, "alice");
        let bob = start(&network, &bob_dir, "bob");
        let (alice_pk, bob_pk) = (keypair("alice").public_key(), keypair("bob").public_key());

        let decision = bob
            .api
            .report_interaction(alice_pk, Interaction::new(5, 10))
            .await
            .unwrap();
        assert_eq!(decision, InteractionDecision::Pending);
        let outcome = alice.api.sign(bob_pk, Interaction::new(10, 5)).await.unwrap();
        assert_matches!(outcome, SignOutcome::Agreed(_));

        let statistics = alice.api.get_statistics(None).await.unwrap();
        assert_eq!((statistics.total_blocks, statistics.total_up, statistics.total_down), (1, 10, 5));
        assert_eq!((statistics.peers_helped, statistics.peers_helped_by), (1, 1));
        assert_eq!(statistics.pending_counterparties, Some(0));

        let remote = bob.api.get_statistics(Some(alice_pk)).await.unwrap();
        assert_eq!(remote.total_up, 10);
        assert_eq!(remote.pending_counterparties, None);

        let graph = bob.api.get_graph(ApiGraphRequest::new(bob_pk, 1)).await.unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 2);

        let blocks = bob.api.get_latest_blocks(alice_pk, 10).await.unwrap();
        assert_eq!(blocks.len(), 1);
        let crawled = bob.api.crawl(alice_pk, 1, 10).await.unwrap();
        assert_eq!(crawled.len(), 2);
    }

    #[tokio::test]
    async fn add_block_validates_before_storing() {
        let network = MemoryNetwork::new();
        let dir = tempfile::tempdir().unwrap();
        let node = start(&network, &dir, "alice");
        let (carol, dave) = (keypair("carol"), keypair("dave"));

        let block = signed_request(&carol, None, dave.public_key(), 3, 4);
        let stored = node.api.add_block(block.clone()).await.unwrap();
        assert_eq!(stored, block);
        assert_matches!(
            node.api.add_block(block.clone()).await,
            Err(ApiError::DuplicateBlock(key)) if key == block.key()
        );
        assert_eq!(node.api.get_latest_blocks(carol.public_key(), 10).await.unwrap(), vec![stored]);

        let mut forged = signed_request(&carol, Some(&block), dave.public_key(), 3, 4);
        forged.transaction.total_up = 1;
        assert_matches!(node.api.add_block(forged).await, Err(ApiError::InvalidBlock(_)));

        assert_matches!(
            node.api.get_latest_blocks(carol.public_key(), 0).await,
            Err(ApiError::InvalidRequest(_))
        );
    }

    #[tokio::test]
    async fn api_fails_after_shutdown() {
        let network = MemoryNetwork::new();
        let dir = tempfile::tempdir().unwrap();
        let mut node = start(&network, &dir, "alice");

        node.shutdown.shutdown();
        assert!(node.shutdown.shutdown_started());

        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Err(err) = node.api.get_statistics(None).await {
                    return err;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_matches!(result, ApiError::NodeStopped);
    }
}
