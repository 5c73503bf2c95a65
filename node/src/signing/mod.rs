//! # Signing protocol
//!
//! Turns an interaction between two identities into two mirrored blocks, one on each chain.
//!
//! 1. Both sides observe the same interaction, mirrored. The side that uploaded more, or on a tie
//!    the side with the greater public key, proposes. The other side registers the amounts as
//!    pending bytes.
//! 2. The proposer creates a request block on top of its chain and sends it.
//! 3. The counterparty checks the request against its view of the proposer's chain and against
//!    its pending bytes. If it agrees it stores the request together with its own linked block,
//!    consumes the pending bytes and sends the linked block back.
//! 4. The proposer checks the linked block and stores both halves.
//!
//! Creating a block on top of the local chain and appending to it are serialized, waiting for a
//! counter signature is not. A proposal whose predecessor is no longer the latest local block when
//! its counter signature arrives is dropped and has to be made again. The proposer stores nothing
//! until it has the counter signature, so a rejected or unanswered proposal leaves no trace.
//!
//! When a counter signature gets lost the counterparty has stored an exchange the proposer does
//! not know about. The next request with that sequence number is answered with the stored
//! exchange, which the proposer adopts before proposing again.

use thiserror::Error;

use crate::network::NetworkError;
use crate::storage::StorageError;

pub(crate) mod messages;
pub(crate) mod protocol;
pub(crate) mod state;

pub use messages::{ChainMessage, RejectReason};
pub use state::{BlockPair, SignOutcome, SigningState};

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Can't sign an interaction with ourselves")]
    SelfInteraction,
    #[error("Invalid signing state transition {from} -> {to}")]
    InvalidTransition { from: SigningState, to: SigningState },
    #[error("Storage: {0}")]
    Storage(#[from] StorageError),
    #[error("Network: {0}")]
    Network(#[from] NetworkError),
    #[error("{0}")]
    General(#[from] anyhow::Error),
}

/// What happened to a reported interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionDecision {
    /// Below the minimum transaction size.
    Discarded,
    /// We propose a block after the signing delay.
    Proposing,
    /// Registered as pending, the counterparty proposes.
    Pending,
    /// Registering the amounts as pending failed.
    Refused,
}
