use std::fmt::{Debug, Display};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::block::types::transaction::{Interaction, Transaction};
use crate::utilities::crypto::{KeyPairError, Keypair, PublicKey, Signature, TrustChainKeypair, TrustChainPublicKey};
use crate::utilities::encoding::{self, Decode, Encode};
use crate::utilities::hash::blake2_256_parts;

/// Sequence number of the first block of every chain.
pub const GENESIS_SEQ: u64 = 1;
/// Link sequence number of a block that still waits for its counter signature.
pub const UNKNOWN_SEQ: u64 = 0;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// `previous_hash` of a genesis block.
    pub const GENESIS: BlockHash = BlockHash([0; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Invalid block hash length: {}", bytes.len()))?;
        Ok(Self(bytes))
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::GENESIS
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", encoding::to_hex(self.0))
    }
}

impl Debug for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockHash({self})")
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        let bytes = encoding::from_hex(hex).map_err(serde::de::Error::custom)?;
        BlockHash::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Primary key of a block in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    pub public_key: PublicKey,
    pub sequence_number: u64,
}

impl Display for BlockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.public_key.short(), self.sequence_number)
    }
}

/// Raw block represents all the data what will be signed
#[derive(Debug, Serialize)]
struct RawBlock<'a> {
    public_key: &'a PublicKey,
    sequence_number: u64,
    link_public_key: &'a PublicKey,
    link_sequence_number: u64,
    previous_hash: &'a BlockHash,
    transaction: &'a Transaction,
}

impl Encode for RawBlock<'_> {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encoding::encode(self)
    }
}

/// One side of an exchange, appended to the chain of `public_key`.
#[derive(Clone, Deserialize, Serialize)]
pub struct Block {
    pub public_key: PublicKey,
    pub sequence_number: u64,
    /// Owner of the mirrored block.
    pub link_public_key: PublicKey,
    /// Sequence number of the mirrored block, [`UNKNOWN_SEQ`] for a signing request.
    pub link_sequence_number: u64,
    pub previous_hash: BlockHash,
    pub signature: Signature,
    pub transaction: Transaction,
    /// Assigned by the store on insertion, not covered by hash or signature.
    #[serde(default)]
    pub insert_time: Option<u64>,
    pub hash: BlockHash,
}

impl Block {
    /// Unsigned signing request of `public_key` towards `link_public_key`, chained onto `previous`.
    pub(crate) fn new_request(
        previous: Option<&Block>,
        public_key: PublicKey,
        link_public_key: PublicKey,
        interaction: Interaction,
    ) -> Self {
        Self::next(previous, public_key, link_public_key, UNKNOWN_SEQ, interaction)
    }

    /// Unsigned counter signature of `public_key` for the request `linked`.
    ///
    /// Up and down are mirrored: what the requester uploaded, we downloaded.
    pub(crate) fn new_linked(previous: Option<&Block>, public_key: PublicKey, linked: &Block) -> Self {
        Self::next(
            previous,
            public_key,
            linked.public_key,
            linked.sequence_number,
            linked.transaction.interaction().mirrored(),
        )
    }

    fn next(
        previous: Option<&Block>,
        public_key: PublicKey,
        link_public_key: PublicKey,
        link_sequence_number: u64,
        interaction: Interaction,
    ) -> Self {
        let (sequence_number, previous_hash) = match previous {
            Some(prev) => (prev.sequence_number + 1, prev.hash),
            None => (GENESIS_SEQ, BlockHash::GENESIS),
        };
        Self {
            public_key,
            sequence_number,
            link_public_key,
            link_sequence_number,
            previous_hash,
            signature: Signature::empty(),
            transaction: Transaction::chained(interaction, previous.map(|b| &b.transaction)),
            insert_time: None,
            hash: BlockHash::default(),
        }
    }

    /// Signs the raw contents and seals the block with its hash.
    pub(crate) fn sign(mut self, keypair: &Keypair) -> anyhow::Result<Self> {
        if keypair.public_key() != self.public_key {
            return Err(KeyPairError::PublicKey.into());
        }
        let raw = self.raw().encode()?;
        self.signature = keypair.sign(&raw)?;
        self.hash = self.compute_hash()?;
        Ok(self)
    }

    fn raw(&self) -> RawBlock<'_> {
        RawBlock {
            public_key: &self.public_key,
            sequence_number: self.sequence_number,
            link_public_key: &self.link_public_key,
            link_sequence_number: self.link_sequence_number,
            previous_hash: &self.previous_hash,
            transaction: &self.transaction,
        }
    }

    /// Hash over the raw contents followed by the signature.
    pub fn compute_hash(&self) -> anyhow::Result<BlockHash> {
        let raw = self.raw().encode()?;
        Ok(BlockHash(blake2_256_parts(&[&raw, self.signature.as_bytes()])))
    }

    pub fn verify_signature(&self) -> bool {
        match self.raw().encode() {
            Ok(raw) => self.public_key.verify(&raw, &self.signature),
            Err(err) => {
                log::error!("Failed to encode block {}: {err}", self.key());
                false
            }
        }
    }

    pub fn key(&self) -> BlockKey {
        BlockKey {
            public_key: self.public_key,
            sequence_number: self.sequence_number,
        }
    }

    /// Key of the mirrored block, if this block is a counter signature.
    pub fn link_key(&self) -> Option<BlockKey> {
        (!self.is_request()).then_some(BlockKey {
            public_key: self.link_public_key,
            sequence_number: self.link_sequence_number,
        })
    }

    pub fn is_request(&self) -> bool {
        self.link_sequence_number == UNKNOWN_SEQ
    }

    pub fn is_genesis(&self) -> bool {
        self.sequence_number == GENESIS_SEQ
    }

    /// Whether `other` is the mirrored half of this block, in either direction.
    pub fn is_linked_to(&self, other: &Block) -> bool {
        if self.link_public_key != other.public_key || other.link_public_key != self.public_key {
            return false;
        }
        self.link_sequence_number == other.sequence_number
            || other.link_sequence_number == self.sequence_number
    }
}

//insert_time is local bookkeeping, two copies of a block are equal regardless of it
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
            && self.sequence_number == other.sequence_number
            && self.link_public_key == other.link_public_key
            && self.link_sequence_number == other.link_sequence_number
            && self.previous_hash == other.previous_hash
            && self.signature == other.signature
            && self.transaction == other.transaction
            && self.hash == other.hash
    }
}

impl Eq for Block {}

impl Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("key", &self.key())
            .field("link", &format_args!("{}:{}", self.link_public_key.short(), self.link_sequence_number))
            .field("transaction", &self.transaction)
            .field("hash", &self.hash)
            .finish()
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = self.key();
        let link_pk = self.link_public_key.short();
        let link_seq = self.link_sequence_number;
        let tx = &self.transaction;
        write!(f, "{key} -> {link_pk}:{link_seq}, {tx}")
    }
}

impl Encode for Block {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encoding::encode(self)
    }
}

impl Decode for Block {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        encoding::decode(bytes)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) fn keypair(name: &str) -> Keypair {
        Keypair::generate(Some(name.as_bytes().to_vec()))
    }

    pub(crate) fn signed_request(
        keypair: &Keypair,
        previous: Option<&Block>,
        counterparty: PublicKey,
        up: u64,
        down: u64,
    ) -> Block {
        Block::new_request(previous, keypair.public_key(), counterparty, Interaction::new(up, down))
            .sign(keypair)
            .unwrap()
    }

    #[test]
    fn genesis_request_fields() {
        let alice = keypair("alice");
        let bob = keypair("bob");

        let block = signed_request(&alice, None, bob.public_key(), 10, 5);

        assert_eq!(block.sequence_number, GENESIS_SEQ);
        assert!(block.previous_hash.is_genesis());
        assert!(block.is_request());
        assert_eq!(block.hash, block.compute_hash().unwrap());
        assert!(block.verify_signature());
    }

    #[test]
    fn next_block_links_previous_hash() {
        let alice = keypair("alice");
        let bob = keypair("bob");

        let first = signed_request(&alice, None, bob.public_key(), 10, 5);
        let second = signed_request(&alice, Some(&first), bob.public_key(), 1, 2);

        assert_eq!(second.sequence_number, 2);
        assert_eq!(second.previous_hash, first.hash);
        assert_eq!(second.transaction.total_up, 11);
        assert_eq!(second.transaction.total_down, 7);
    }

    #[test]
    fn linked_block_mirrors_amounts() {
        let alice = keypair("alice");
        let bob = keypair("bob");

        let request = signed_request(&alice, None, bob.public_key(), 10, 5);
        let linked = Block::new_linked(None, bob.public_key(), &request).sign(&bob).unwrap();

        assert_eq!(linked.transaction.up, 5);
        assert_eq!(linked.transaction.down, 10);
        assert_eq!(linked.link_sequence_number, request.sequence_number);
        assert!(linked.is_linked_to(&request));
        assert!(request.is_linked_to(&linked));
    }

    #[test]
    fn tampering_breaks_signature_and_hash() {
        let alice = keypair("alice");
        let bob = keypair("bob");

        let mut block = signed_request(&alice, None, bob.public_key(), 10, 5);
        block.transaction.up = 1_000;

        assert!(!block.verify_signature());
        assert_ne!(block.hash, block.compute_hash().unwrap());
    }

    #[test]
    fn cannot_sign_for_another_identity() {
        let alice = keypair("alice");
        let bob = keypair("bob");

        let block = Block::new_request(None, alice.public_key(), bob.public_key(), Interaction::new(1, 1));
        assert!(block.sign(&bob).is_err());
    }

    #[test]
    fn decoded_block_is_equal() {
        let alice = keypair("alice");
        let bob = keypair("bob");

        let block = signed_request(&alice, None, bob.public_key(), 10, 5);
        let decoded = Block::decode(&block.encode().unwrap()).unwrap();

        assert_eq!(block, decoded);
        assert!(decoded.verify_signature());
    }
}
