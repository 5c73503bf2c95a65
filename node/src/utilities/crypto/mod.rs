//! Keys and signatures used to identify chain owners and to sign their blocks.

use std::fmt::{Debug, Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utilities::encoding;

pub(crate) mod ed25519;
pub(crate) mod key_manager;

pub use ed25519::{Ed25519Keypair, Ed25519PublicKey};

/// Keypair of the local chain owner.
pub type Keypair = Ed25519Keypair;
/// Identity of a chain owner. Two identities compare by their raw key bytes.
pub type PublicKey = Ed25519PublicKey;

#[derive(Error, Debug)]
pub enum KeyPairError {
    #[error("Invalid encoding")]
    InvalidEncoding,
    #[error("Invalid key length")]
    SliceLength,
    #[error("Invalid signature")]
    Signature,
    #[error("Invalid public key")]
    PublicKey,
}

pub trait TrustChainPublicKey {
    fn to_raw_vec(&self) -> Vec<u8>;

    fn from_raw_vec(raw: Vec<u8>) -> Result<Self, KeyPairError>
    where
        Self: Sized;

    fn verify<M: AsRef<[u8]>>(&self, msg: &M, signature: &Signature) -> bool;

    fn to_base58(&self) -> String {
        bs58::encode(self.to_raw_vec()).into_string()
    }

    fn from_base58(base58: &str) -> Result<Self, KeyPairError>
    where
        Self: Sized,
    {
        let raw = bs58::decode(base58)
            .into_vec()
            .map_err(|_| KeyPairError::InvalidEncoding)?;
        Self::from_raw_vec(raw)
    }
}

pub trait TrustChainKeypair {
    type PublicKey;

    /// With a seed the keypair is derived deterministically from it.
    fn generate(seed: Option<Vec<u8>>) -> Self;

    fn sign<M: AsRef<[u8]>>(&self, msg: &M) -> Result<Signature, KeyPairError>;

    fn to_raw_vec(&self) -> Vec<u8>;

    fn from_raw_vec(raw: Vec<u8>) -> Result<Self, KeyPairError>
    where
        Self: Sized;

    fn public_key(&self) -> Self::PublicKey;

    fn to_base58(&self) -> String {
        bs58::encode(self.to_raw_vec()).into_string()
    }

    fn from_base58(base58: &str) -> Result<Self, KeyPairError>
    where
        Self: Sized,
    {
        let raw = bs58::decode(base58)
            .into_vec()
            .map_err(|_| KeyPairError::InvalidEncoding)?;
        Self::from_raw_vec(raw)
    }
}

/// Raw signature bytes. Empty until a block has been signed.
#[derive(Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Signature(#[serde(with = "encoding::serde_hex")] Vec<u8>);

impl Signature {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", encoding::to_hex(&self.0))
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({self})")
    }
}
