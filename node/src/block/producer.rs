use std::sync::Arc;

use crate::block::{Block, Interaction};
use crate::utilities::crypto::{Keypair, PublicKey, TrustChainKeypair};

/// Creates and signs the blocks of the local chain.
pub(crate) struct BlockProducer {
    keypair: Arc<Keypair>,
    pub(crate) public_key: PublicKey,
}

impl BlockProducer {
    pub(crate) fn new(keypair: Arc<Keypair>) -> Self {
        let public_key = keypair.public_key();
        Self {
            keypair,
            public_key,
        }
    }

    /// Signing request towards `counterparty`, appended after `latest`.
    pub(crate) fn create_request(
        &self,
        latest: Option<&Block>,
        counterparty: PublicKey,
        interaction: Interaction,
    ) -> anyhow::Result<Block> {
        let block = Block::new_request(latest, self.public_key, counterparty, interaction).sign(&self.keypair)?;
        log::debug!("Created request block {block}");
        Ok(block)
    }

    /// Counter signature for `request`, appended after `latest`.
    pub(crate) fn create_linked(&self, latest: Option<&Block>, request: &Block) -> anyhow::Result<Block> {
        let block = Block::new_linked(latest, self.public_key, request).sign(&self.keypair)?;
        log::debug!("Created linked block {block}");
        Ok(block)
    }
}

#[cfg(test)]
mod test {
    use crate::block::types::block::test::keypair;

    use super::*;

    #[test]
    fn request_then_linked_chain_on_latest() {
        let alice = BlockProducer::new(Arc::new(keypair("alice")));
        let bob = BlockProducer::new(Arc::new(keypair("bob")));

        let request = alice
            .create_request(None, bob.public_key, Interaction::new(10, 5))
            .unwrap();
        let linked = bob.create_linked(None, &request).unwrap();

        let next = alice
            .create_request(Some(&request), bob.public_key, Interaction::new(10, 5))
            .unwrap();
        let next_linked = bob.create_linked(Some(&linked), &next).unwrap();

        assert_eq!(next.sequence_number, 2);
        assert_eq!((next.transaction.total_up, next.transaction.total_down), (20, 10));
        assert_eq!(
            (next_linked.transaction.total_up, next_linked.transaction.total_down),
            (10, 20)
        );
        assert_eq!(next_linked.previous_hash, linked.hash);
    }
}
