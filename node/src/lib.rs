//! # TrustChain
//!
//! A pairwise, tamper-evident interaction ledger. Every identity keeps its own hash-linked chain
//! of blocks recording the bytes it exchanged with others. Each exchange is recorded twice, once
//! on each chain, and both halves are signed by their owners.
//!
//! A node is assembled with [`TrustChainStarter`] and driven through the [`TrustChainApi`] of its
//! [`TrustChainHandle`].

pub use crate::api::types::{ApiGraphRequest, ApiStatistics};
pub use crate::api::{ApiError, TrustChainApi};
pub use crate::block::{Block, BlockHash, Interaction, Transaction};
pub use crate::config::Configuration;
pub use crate::core::builder::{TrustChainHandle, TrustChainStarter};
pub use crate::core::node::TrustChainNode;
pub use crate::core::shutdown::ShutdownHandle;
pub use crate::graph::{Graph, GraphEdge, GraphNode};
pub use crate::network::memory::{MemoryNetwork, MemoryTransport};
pub use crate::network::{NetCommunicationReceiver, NetworkError, NetworkEvent, Transport};
pub use crate::signing::{ChainMessage, InteractionDecision, RejectReason, SignOutcome};
pub use crate::utilities::crypto::{Keypair, PublicKey, TrustChainKeypair, TrustChainPublicKey};

pub mod api;
pub mod block;
pub mod cli;
pub mod config;
mod core;
pub mod graph;
pub mod logging;
pub mod network;
pub(crate) mod pending;
pub mod signing;
pub(crate) mod storage;
pub(crate) mod utilities;
pub(crate) mod validation;
