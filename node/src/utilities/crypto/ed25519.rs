use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::utilities::crypto::{KeyPairError, Signature, TrustChainKeypair, TrustChainPublicKey};
use crate::utilities::encoding;
use crate::utilities::hash::blake2_256;

// Careful with DEBUG, DISPLAY!!!
// Only the public half is ever printed.
pub struct Ed25519Keypair(SigningKey);

/// Raw 32 byte ed25519 verifying key.
///
/// Kept as plain bytes so identities can be ordered, hashed and stored cheaply.
/// The key is only decoded when a signature has to be verified.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ed25519PublicKey([u8; 32]);

impl Ed25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        encoding::to_hex(self.0)
    }

    /// Last eight hex characters, enough to tell peers apart in logs.
    pub fn short(&self) -> String {
        let hex = self.to_hex();
        hex[hex.len() - 8..].to_string()
    }
}

impl TrustChainKeypair for Ed25519Keypair {
    type PublicKey = Ed25519PublicKey;

    fn generate(seed: Option<Vec<u8>>) -> Self {
        match seed {
            Some(seed) => Ed25519Keypair(SigningKey::from_bytes(&blake2_256(&seed))),
            None => Ed25519Keypair(SigningKey::generate(&mut OsRng)),
        }
    }

    fn sign<M: AsRef<[u8]>>(&self, msg: &M) -> Result<Signature, KeyPairError> {
        let signature = self.0.try_sign(msg.as_ref()).map_err(|_| KeyPairError::Signature)?;
        Ok(Signature::new(signature.to_bytes().to_vec()))
    }

    fn to_raw_vec(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }

    fn from_raw_vec(raw: Vec<u8>) -> Result<Self, KeyPairError> {
        let bytes: [u8; 32] = raw.try_into().map_err(|_| KeyPairError::SliceLength)?;
        Ok(Ed25519Keypair(SigningKey::from_bytes(&bytes)))
    }

    fn public_key(&self) -> Self::PublicKey {
        Ed25519PublicKey(self.0.verifying_key().to_bytes())
    }
}

impl Debug for Ed25519Keypair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519Keypair({})", self.public_key())
    }
}

impl Display for Ed25519Keypair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.public_key())
    }
}

impl TrustChainPublicKey for Ed25519PublicKey {
    fn to_raw_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn from_raw_vec(raw: Vec<u8>) -> Result<Self, KeyPairError> {
        let bytes: [u8; 32] = raw.try_into().map_err(|_| KeyPairError::SliceLength)?;
        Ok(Ed25519PublicKey(bytes))
    }

    fn verify<M: AsRef<[u8]>>(&self, msg: &M, signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            log::debug!("Not a valid ed25519 key: {self}");
            return false;
        };
        let Ok(signature) = ed25519_dalek::Signature::from_slice(signature.as_bytes()) else {
            return false;
        };
        key.verify(msg.as_ref(), &signature).is_ok()
    }
}

impl Display for Ed25519PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.short())
    }
}

impl FromStr for Ed25519PublicKey {
    type Err = KeyPairError;

    fn from_str(hex: &str) -> Result<Self, Self::Err> {
        let raw = encoding::from_hex(hex).map_err(|_| KeyPairError::InvalidEncoding)?;
        Self::from_raw_vec(raw)
    }
}

impl Serialize for Ed25519PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Ed25519PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        hex.parse().map_err(serde::de::Error::custom)
    }
}
