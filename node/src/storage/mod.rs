//! Durable, append-only storage of blocks.
//!
//! Blocks are keyed by `(public_key, sequence_number)`. Next to the ledger the store keeps a
//! denormalized table of pairwise traffic which answers the statistics and graph queries without
//! scanning all blocks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::block::{Block, BlockKey};
use crate::utilities::crypto::PublicKey;

pub(crate) mod sqlite;

/// Schema version the embedded migrations bring a database to.
pub const SCHEMA_VERSION: u32 = 2;
pub const MAX_CRAWL_LIMIT: i64 = 100;
pub const MAX_LATEST_BLOCKS_LIMIT: i64 = 1000;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Block {0} already exists")]
    DuplicateBlock(BlockKey),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Database schema version {stored} is newer than the supported version {supported}")]
    SchemaTooNew { stored: u32, supported: u32 },
    #[error("Persistence: {0}")]
    Persistence(#[from] rusqlite::Error),
    #[error("Migration: {0}")]
    Migration(#[from] refinery::Error),
    #[error("Encoding: {0}")]
    Encoding(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Traffic of an identity summed over all its counterparties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficTotals {
    pub up: u64,
    pub down: u64,
    /// Number of distinct counterparties.
    pub neighbors: u64,
}

/// Aggregated traffic between an identity and one counterparty.
///
/// Both parties record an exchange, the amounts are the larger of the two observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub public_key: PublicKey,
    /// Bytes sent to the neighbor.
    pub sent: u64,
    /// Bytes received from the neighbor.
    pub received: u64,
}

impl Neighbor {
    pub fn traffic(&self) -> u64 {
        self.sent.saturating_add(self.received)
    }
}

/// Highest cumulative totals an identity recorded in blocks with one counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeWatermark {
    pub link_public_key: PublicKey,
    pub total_up: u64,
    pub total_down: u64,
}

pub trait BlockStore: Send + Sync {
    /// Appends a block and returns it with `insert_time` assigned.
    ///
    /// Fails with [`StorageError::DuplicateBlock`] when the key exists, stored state stays untouched.
    fn add_block(&self, block: &Block) -> Result<Block>;

    /// Appends all blocks in one transaction. Either all or none are stored.
    fn add_blocks(&self, blocks: &[Block]) -> Result<Vec<Block>>;

    fn get(&self, public_key: &PublicKey, sequence_number: u64) -> Result<Option<Block>>;

    fn get_latest(&self, public_key: &PublicKey) -> Result<Option<Block>>;

    /// Latest blocks of an identity, newest first. `limit` must be in `[1, 1000]`.
    fn get_latest_blocks(&self, public_key: &PublicKey, limit: i64) -> Result<Vec<Block>>;

    /// Closest block of the same identity with a lower sequence number.
    fn get_block_before(&self, block: &Block) -> Result<Option<Block>>;

    /// Closest block of the same identity with a higher sequence number.
    fn get_block_after(&self, block: &Block) -> Result<Option<Block>>;

    fn contains(&self, block: &Block) -> Result<bool>;

    /// The other half of the exchange `block` belongs to.
    fn get_linked(&self, block: &Block) -> Result<Option<Block>>;

    /// Blocks involving `public_key` inserted since its block at `sequence_ceiling`.
    ///
    /// `limit` must be in `[1, 100]`.
    fn crawl(&self, public_key: &PublicKey, sequence_ceiling: u64, limit: i64) -> Result<Vec<Block>>;

    fn count_blocks(&self, public_key: &PublicKey) -> Result<u64>;

    fn total_traffic(&self, public_key: &PublicKey) -> Result<TrafficTotals>;

    /// Returns `(peers public_key uploaded to, peers public_key downloaded from)`.
    fn num_unique_interactors(&self, public_key: &PublicKey) -> Result<(u64, u64)>;

    /// Counterparties of `public_key`, highest traffic first.
    fn graph_neighbors(&self, public_key: &PublicKey) -> Result<Vec<Neighbor>>;

    fn edge_watermarks(&self, public_key: &PublicKey) -> Result<Vec<EdgeWatermark>>;

    fn schema_version(&self) -> Result<u32>;
}

pub(crate) fn check_crawl_limit(limit: i64) -> Result<()> {
    if !(1..=MAX_CRAWL_LIMIT).contains(&limit) {
        return Err(StorageError::InvalidParameter(format!(
            "crawl limit {limit} must be between 1 and {MAX_CRAWL_LIMIT}"
        )));
    }
    Ok(())
}

pub(crate) fn check_latest_blocks_limit(limit: i64) -> Result<()> {
    if !(1..=MAX_LATEST_BLOCKS_LIMIT).contains(&limit) {
        return Err(StorageError::InvalidParameter(format!(
            "limit {limit} must be between 1 and {MAX_LATEST_BLOCKS_LIMIT}"
        )));
    }
    Ok(())
}
