//! # Api Types
//!
//! Requests and answers of the [`TrustChainApi`](crate::api::TrustChainApi) that have no internal
//! counterpart. Blocks, graphs and signing outcomes are exposed as they are.

use std::collections::HashSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::utilities::crypto::PublicKey;

/// Summary of an identity's chain as known to the local database.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiStatistics {
    pub public_key: PublicKey,
    /// Number of distinct peers the identity uploaded to.
    pub peers_helped: u64,
    /// Number of distinct peers the identity downloaded from.
    pub peers_helped_by: u64,
    /// Number of distinct counterparties.
    pub neighbors: u64,
    /// Sequence number of the latest known block, 0 without blocks.
    pub total_blocks: u64,
    pub total_up: u64,
    pub total_down: u64,
    pub score: f64,
    pub latest_block: Option<Block>,
    /// Counterparties with pending usage. Only reported for the local identity.
    pub pending_counterparties: Option<usize>,
}

impl Display for ApiStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ApiStatistics(public_key: {}, blocks: {}, up: {}, down: {}, score: {:.4})",
            self.public_key.short(),
            self.total_blocks,
            self.total_up,
            self.total_down,
            self.score
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiGraphRequest {
    pub focus: PublicKey,
    /// Hops from the focus, 1 returns its direct neighbours.
    pub neighbor_level: u32,
    /// New identities a non-focus node may add to the next level, 0 for no limit.
    #[serde(default)]
    pub extra_hop_budget: usize,
    #[serde(default)]
    pub excluded: HashSet<PublicKey>,
}

impl ApiGraphRequest {
    pub fn new(focus: PublicKey, neighbor_level: u32) -> Self {
        Self {
            focus,
            neighbor_level,
            extra_hop_budget: 0,
            excluded: HashSet::new(),
        }
    }
}

impl Display for ApiGraphRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ApiGraphRequest(focus: {}, level: {}, budget: {}, excluded: {})",
            self.focus.short(),
            self.neighbor_level,
            self.extra_hop_budget,
            self.excluded.len()
        )
    }
}
