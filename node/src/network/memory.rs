use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::network::{NetCommunicationReceiver, NetworkError, NetworkEvent, Transport};
use crate::signing::messages::ChainMessage;
use crate::utilities::crypto::PublicKey;
use crate::utilities::encoding::{Decode, Encode};

const CHANNEL_SIZE: usize = 1000;

/// In-process network connecting nodes of the same process.
///
/// Messages are encoded and decoded on the way, like they would be on a real wire.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    peers: Arc<RwLock<HashMap<PublicKey, mpsc::Sender<NetworkEvent>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `public_key`, replacing an earlier registration.
    pub fn join(&self, public_key: PublicKey) -> (MemoryTransport, NetCommunicationReceiver) {
        let (net_event_tx, net_event_rcv) = mpsc::channel(CHANNEL_SIZE);
        self.peers.write().insert(public_key, net_event_tx);
        log::debug!("{public_key:?} joined memory network");

        let transport = MemoryTransport {
            local: public_key,
            network: self.clone(),
        };
        (transport, NetCommunicationReceiver::new(net_event_rcv))
    }

    pub fn leave(&self, public_key: &PublicKey) {
        self.peers.write().remove(public_key);
        log::debug!("{public_key:?} left memory network");
    }
}

pub struct MemoryTransport {
    local: PublicKey,
    network: MemoryNetwork,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, to: PublicKey, message: ChainMessage) -> Result<(), NetworkError> {
        log::trace!("{:?} -> {to:?}: {message}", self.local);

        let bytes = message.encode()?;
        let message = ChainMessage::decode(&bytes)?;

        let peer = self.network.peers.read().get(&to).cloned();
        let Some(peer) = peer else {
            return Err(NetworkError::Unreachable(to));
        };
        let event = NetworkEvent {
            from: self.local,
            message,
        };
        peer.send(event).await.map_err(|_| NetworkError::Unreachable(to))
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use crate::block::types::block::test::keypair;
    use crate::utilities::crypto::TrustChainKeypair;

    use super::*;

    #[tokio::test]
    async fn delivers_to_joined_peer() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (keypair("alice").public_key(), keypair("bob").public_key());
        let (transport, _) = network.join(alice);
        let (_, mut bob_events) = network.join(bob);

        let message = ChainMessage::CrawlRequest { sequence_number: 3 };
        transport.send(bob, message.clone()).await.unwrap();

        let event = bob_events.net_event_rcv.recv().await.unwrap();
        assert_eq!(event, NetworkEvent { from: alice, message });
    }

    #[tokio::test]
    async fn unknown_peer_is_unreachable() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (keypair("alice").public_key(), keypair("bob").public_key());
        let (transport, _) = network.join(alice);

        let message = ChainMessage::CrawlRequest { sequence_number: 1 };
        assert_matches!(transport.send(bob, message.clone()).await, Err(NetworkError::Unreachable(_)));

        let (_, bob_events) = network.join(bob);
        network.leave(&bob);
        drop(bob_events);
        assert_matches!(transport.send(bob, message).await, Err(NetworkError::Unreachable(_)));
    }
}
