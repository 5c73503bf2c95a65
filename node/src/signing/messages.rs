use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::signing::state::BlockPair;
use crate::utilities::encoding::{self, Decode, Encode};

/// Messages exchanged between two chain owners.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum ChainMessage {
    /// A signing request, or the counter signature answering one.
    HalfBlock(Block),
    /// Answers a request whose sequence number the receiver already signed for another block
    /// of the same proposer, with that exchange.
    AlreadySigned(BlockPair),
    /// The request with `sequence_number` is not going to be counter signed.
    Reject {
        sequence_number: u64,
        reason: RejectReason,
    },
    /// Asks for the blocks of the receiver's chain starting at `sequence_number`.
    CrawlRequest { sequence_number: u64 },
    CrawlResponse { blocks: Vec<Block> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum RejectReason {
    /// A proposal with the same sequence number is still waiting for this counterparty.
    Busy,
    InvalidBlock,
    /// The claimed amounts exceed what the counterparty observed.
    InsufficientPending,
    /// The counterparty misses earlier blocks of the proposer's chain.
    SequenceGap,
    InvalidCounterSignature,
    /// The local chain moved on while the proposal was waiting. Propose again.
    Stale,
    Unreachable,
    Internal,
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            RejectReason::Busy => "busy",
            RejectReason::InvalidBlock => "invalid block",
            RejectReason::InsufficientPending => "insufficient pending bytes",
            RejectReason::SequenceGap => "sequence gap",
            RejectReason::InvalidCounterSignature => "invalid counter signature",
            RejectReason::Stale => "stale proposal",
            RejectReason::Unreachable => "unreachable",
            RejectReason::Internal => "internal error",
        };
        write!(f, "{reason}")
    }
}

impl Display for ChainMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainMessage::HalfBlock(block) => write!(f, "HalfBlock({block})"),
            ChainMessage::AlreadySigned(pair) => write!(f, "AlreadySigned({})", pair.proposal),
            ChainMessage::Reject {
                sequence_number,
                reason,
            } => write!(f, "Reject({sequence_number}, {reason})"),
            ChainMessage::CrawlRequest { sequence_number } => write!(f, "CrawlRequest({sequence_number})"),
            ChainMessage::CrawlResponse { blocks } => write!(f, "CrawlResponse({} blocks)", blocks.len()),
        }
    }
}

impl Encode for ChainMessage {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encoding::encode(self)
    }
}

impl Decode for ChainMessage {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        encoding::decode(bytes)
    }
}
