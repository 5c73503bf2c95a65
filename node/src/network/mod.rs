//! Delivery of chain messages between identities.
//!
//! Peer discovery and the wire transport live outside this crate. The node only needs to send a
//! [`ChainMessage`] to an identity and to receive the messages addressed to it.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::signing::messages::ChainMessage;
use crate::utilities::crypto::PublicKey;

pub mod memory;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Peer {0:?} is unreachable")]
    Unreachable(PublicKey),
    #[error("Encoding: {0}")]
    Encoding(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEvent {
    pub from: PublicKey,
    pub message: ChainMessage,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: PublicKey, message: ChainMessage) -> Result<(), NetworkError>;
}

//Receives messages from the network
pub struct NetCommunicationReceiver {
    pub(crate) net_event_rcv: mpsc::Receiver<NetworkEvent>,
}

impl NetCommunicationReceiver {
    pub fn new(net_event_rcv: mpsc::Receiver<NetworkEvent>) -> Self {
        Self { net_event_rcv }
    }
}
