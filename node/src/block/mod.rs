//! # Blocks
//!
//! Every identity owns a chain of blocks. A block records one side of a single exchange with
//! a counterparty: how many bytes were uploaded and downloaded in it, together with the running
//! totals of the chain owner.
//!
//! An exchange always ends up as two blocks, one on each chain:
//!
//! 1. The proposer creates a *request* block. Its `link_sequence_number` is [`UNKNOWN_SEQ`]
//!    because the counterparty's block does not exist yet.
//! 2. The counterparty validates the request and creates a *linked* block pointing back at the
//!    request, with up and down swapped.
//!
//! The two halves are not connected by references. A half is found from the other one by looking
//! up `(link_public_key, link_sequence_number)` or, for a request, the block that links to it.
//!
//! Blocks are never mutated after they are signed.

pub(crate) mod producer;
pub(crate) mod types;

pub use types::block::{Block, BlockHash, BlockKey, GENESIS_SEQ, UNKNOWN_SEQ};
pub use types::transaction::{Interaction, Transaction};
