use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::task::JoinHandle;

use crate::api::{ApiListener, TrustChainApi};
use crate::config::Configuration;
use crate::core::node::TrustChainNode;
use crate::core::shutdown::{Shutdown, ShutdownHandle, ShutdownManager};
use crate::graph::GraphBuilder;
use crate::network::{NetCommunicationReceiver, Transport};
use crate::pending::PendingLedger;
use crate::signing::protocol::{SigningProtocol, SigningSettings};
use crate::storage::sqlite::SqliteStorage;
use crate::storage::BlockStore;
use crate::utilities::crypto::key_manager::KeyManager;
use crate::utilities::crypto::{Keypair, PublicKey, TrustChainKeypair};
use crate::validation::ChainValidator;

#[derive(Clone)]
pub(crate) struct NodeInfo {
    pub(crate) public_key: PublicKey,
    pub(crate) keypair: Arc<Keypair>,
    pub(crate) initial_config: Configuration,
}

impl NodeInfo {
    pub(crate) fn new(config: Configuration) -> anyhow::Result<Self> {
        let keypair = KeyManager::read_keypair_from_str(&config.node.private_key)?;
        let public_key = keypair.public_key();
        Ok(Self {
            public_key,
            keypair,
            initial_config: config,
        })
    }
}

impl Display for NodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "NodeInfo {{ public_key: {}, sqlite_path: {} }}",
            self.public_key, self.initial_config.storage.sqlite_path
        )
    }
}

#[derive(Clone)]
pub struct TrustChainHandle {
    /// TrustChain API
    pub api: TrustChainApi,
    /// TrustChain shutdown handle
    pub shutdown: ShutdownHandle,
}

/// Assembles a node from its configuration and a transport.
///
/// ```text
/// TrustChainStarter::new(config)?
///     .with_network(transport, from_network)
///     .init_tasks()?
///     .run()
/// ```
pub struct TrustChainStarter {
    node_info: NodeInfo,
    transport: Option<Arc<dyn Transport>>,
    from_network: Option<NetCommunicationReceiver>,
    api_listener: ApiListener,
    api: TrustChainApi,
}

impl TrustChainStarter {
    //Crate pure data structures, no resource allocation nor threads
    pub fn new(config: Configuration) -> anyhow::Result<Self> {
        let node_info = NodeInfo::new(config)?;
        let (api, api_listener) = TrustChainApi::new();
        Ok(Self {
            node_info,
            transport: None,
            from_network: None,
            api_listener,
            api,
        })
    }

    pub fn public_key(&self) -> PublicKey {
        self.node_info.public_key
    }

    pub fn with_network<T: Transport + 'static>(self, transport: T, from_network: NetCommunicationReceiver) -> Self {
        Self {
            transport: Some(Arc::new(transport)),
            from_network: Some(from_network),
            ..self
        }
    }

    //opens database and spawns dependent tasks
    pub fn init_tasks(self) -> anyhow::Result<TrustChainNode> {
        info!("Initializing TrustChain tasks for {}", self.node_info);
        let (Some(transport), Some(from_network)) = (self.transport, self.from_network) else {
            anyhow::bail!("Network is not initialized")
        };

        info!("Opening database...");
        let config = &self.node_info.initial_config;
        let store: Arc<dyn BlockStore> = Arc::new(SqliteStorage::open(config.storage.clone())?);
        info!("Database schema version {}", store.schema_version()?);

        let pending = Arc::new(PendingLedger::new(config.trustchain.pending_expiry()));
        let protocol = Arc::new(SigningProtocol::new(
            self.node_info.keypair.clone(),
            store.clone(),
            pending.clone(),
            transport,
            SigningSettings::from(&config.trustchain),
        ));

        let (mut shutdown_manager, shutdown_handle) = ShutdownManager::init();
        let sweeper = start_pending_sweeper(
            pending,
            config.trustchain.pending_sweep_interval(),
            shutdown_manager.subscribe(),
        );
        shutdown_manager.add_handle(sweeper);

        let handle = TrustChainHandle {
            api: self.api,
            shutdown: shutdown_handle,
        };
        Ok(TrustChainNode {
            validator: ChainValidator::new(store.clone()),
            graph: GraphBuilder::new(store.clone(), config.trustchain.score_boundary),
            node_info: self.node_info,
            protocol,
            store,
            from_network,
            api_listener: self.api_listener,
            handle,
            shutdown_manager: Some(shutdown_manager),
        })
    }
}

/// Periodically forgets pending bytes nobody claimed before they expired.
fn start_pending_sweeper(
    pending: Arc<PendingLedger>,
    interval: Duration,
    mut shutdown: Shutdown,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = pending.purge_expired();
                    if purged > 0 {
                        log::debug!("Purged {purged} expired pending entries");
                    }
                }
                _ = shutdown.shutdown_signal_rcv.recv() => {
                    info!("Shutting down pending sweeper");
                    break;
                }
            }
        }
        if !pending.is_empty() {
            warn!("Dropping {} pending entries on shutdown", pending.len());
        }
        Ok(())
    })
}
