//! Checks of blocks received from other identities.

use std::sync::Arc;

use thiserror::Error;

use crate::block::{Block, BlockKey, GENESIS_SEQ};
use crate::pending::PendingBytes;
use crate::storage::{BlockStore, StorageError};
use crate::utilities::crypto::PublicKey;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid sequence number {0}")]
    InvalidSequenceNumber(u64),
    #[error("Block is linked to its own chain")]
    SelfLink,
    #[error("Block hash does not match its contents")]
    HashMismatch,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid genesis block: {0}")]
    InvalidGenesis(&'static str),
    #[error("Previous hash does not link to block {0}")]
    PreviousHashMismatch(BlockKey),
    #[error("Totals are inconsistent with block {0}")]
    TotalsMismatch(BlockKey),
    #[error("A different block {0} is already known")]
    Conflict(BlockKey),
    #[error("Linked block {0} does not mirror the transaction")]
    LinkMismatch(BlockKey),
    #[error("Sequence gap: last known block is {known}, received {received}")]
    SequenceGap { known: u64, received: u64 },
    #[error("No pending bytes for {0:?}")]
    NoPending(PublicKey),
    #[error("Claim up {claimed_up}, down {claimed_down} exceeds pending up {pending_up}, down {pending_down}")]
    InsufficientPending {
        claimed_up: u64,
        claimed_down: u64,
        pending_up: u64,
        pending_down: u64,
    },
    #[error("Storage: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug)]
pub enum ValidationResult {
    /// Consistent with everything known locally, including its predecessor.
    Valid,
    /// Consistent so far, but neighbouring blocks of the chain are unknown locally.
    Partial,
    Invalid(ValidationError),
}

pub(crate) struct ChainValidator {
    store: Arc<dyn BlockStore>,
}

impl ChainValidator {
    pub(crate) fn new(store: Arc<dyn BlockStore>) -> Self {
        Self { store }
    }

    /// Checks the block itself and its linkage with the blocks known locally.
    pub(crate) fn validate_block(&self, block: &Block) -> Result<ValidationResult, StorageError> {
        if let Err(err) = Self::check_contents(block) {
            return Ok(ValidationResult::Invalid(err));
        }
        match self.check_chain(block) {
            Ok(partial) if partial => Ok(ValidationResult::Partial),
            Ok(_) => Ok(ValidationResult::Valid),
            Err(ValidationError::Storage(err)) => Err(err),
            Err(err) => Ok(ValidationResult::Invalid(err)),
        }
    }

    /// Whether a signing request should be counter signed, with the reason when not.
    ///
    /// Checks, in order, the linkage with the sender's known chain and then that the claimed
    /// amounts are covered by `pending`.
    pub(crate) fn check_incoming(
        &self,
        proposed: &Block,
        pending: Option<PendingBytes>,
    ) -> Result<(), ValidationError> {
        if let ValidationResult::Invalid(err) = self.validate_block(proposed)? {
            return Err(err);
        }

        if let Some(last) = self.store.get_latest(&proposed.public_key)? {
            if last.sequence_number + 1 < proposed.sequence_number {
                return Err(ValidationError::SequenceGap {
                    known: last.sequence_number,
                    received: proposed.sequence_number,
                });
            }
        }

        let pending = pending.ok_or(ValidationError::NoPending(proposed.public_key))?;
        let tx = &proposed.transaction;
        if pending.up < tx.down || pending.down < tx.up {
            return Err(ValidationError::InsufficientPending {
                claimed_up: tx.up,
                claimed_down: tx.down,
                pending_up: pending.up,
                pending_down: pending.down,
            });
        }
        Ok(())
    }

    pub(crate) fn validate_incoming(&self, proposed: &Block, pending: Option<PendingBytes>) -> bool {
        match self.check_incoming(proposed, pending) {
            Ok(()) => true,
            Err(ValidationError::Storage(err)) => {
                log::error!("Failed to validate {proposed}: {err}");
                false
            }
            Err(err) => {
                log::warn!("Rejecting {proposed}: {err}");
                false
            }
        }
    }

    fn check_contents(block: &Block) -> Result<(), ValidationError> {
        if block.sequence_number < GENESIS_SEQ {
            return Err(ValidationError::InvalidSequenceNumber(block.sequence_number));
        }
        if block.public_key == block.link_public_key {
            return Err(ValidationError::SelfLink);
        }
        match block.compute_hash() {
            Ok(hash) if hash == block.hash => {}
            _ => return Err(ValidationError::HashMismatch),
        }
        if !block.verify_signature() {
            return Err(ValidationError::InvalidSignature);
        }
        if block.is_genesis() {
            if !block.previous_hash.is_genesis() {
                return Err(ValidationError::InvalidGenesis("previous hash must be empty"));
            }
            if !block.transaction.follows(None) {
                return Err(ValidationError::InvalidGenesis("totals must equal the transaction"));
            }
        } else if block.previous_hash.is_genesis() {
            return Err(ValidationError::InvalidGenesis("only the first block has an empty previous hash"));
        }
        Ok(())
    }

    /// Returns whether the chain around `block` is only partially known.
    fn check_chain(&self, block: &Block) -> Result<bool, ValidationError> {
        if let Some(existing) = self.store.get(&block.public_key, block.sequence_number)? {
            if existing != *block {
                return Err(ValidationError::Conflict(existing.key()));
            }
        }

        let mut partial = false;
        if !block.is_genesis() {
            match self.store.get_block_before(block)? {
                Some(prev) if prev.sequence_number + 1 == block.sequence_number => {
                    if block.previous_hash != prev.hash {
                        return Err(ValidationError::PreviousHashMismatch(prev.key()));
                    }
                    if !block.transaction.follows(Some(&prev.transaction)) {
                        return Err(ValidationError::TotalsMismatch(prev.key()));
                    }
                }
                Some(prev) => {
                    partial = true;
                    if !totals_not_below(block, &prev) {
                        return Err(ValidationError::TotalsMismatch(prev.key()));
                    }
                }
                None => partial = true,
            }
        }

        if let Some(next) = self.store.get_block_after(block)? {
            if next.sequence_number == block.sequence_number + 1 {
                if next.previous_hash != block.hash {
                    return Err(ValidationError::PreviousHashMismatch(next.key()));
                }
            } else {
                partial = true;
            }
            if !totals_not_below(&next, block) {
                return Err(ValidationError::TotalsMismatch(next.key()));
            }
        }

        if let Some(linked) = self.store.get_linked(block)? {
            let (tx, other) = (&block.transaction, &linked.transaction);
            if tx.up != other.down || tx.down != other.up {
                return Err(ValidationError::LinkMismatch(linked.key()));
            }
        }

        Ok(partial)
    }
}

fn totals_not_below(later: &Block, earlier: &Block) -> bool {
    later.transaction.total_up >= earlier.transaction.total_up
        && later.transaction.total_down >= earlier.transaction.total_down
}
