use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::block::producer::BlockProducer;
use crate::block::{Block, Interaction};
use crate::config::TrustChainConfiguration;
use crate::network::{NetworkEvent, Transport};
use crate::pending::PendingLedger;
use crate::signing::messages::{ChainMessage, RejectReason};
use crate::signing::state::{BlockPair, SignOutcome, SigningState};
use crate::signing::{InteractionDecision, SigningError};
use crate::storage::{BlockStore, StorageError};
use crate::utilities::crypto::{Keypair, PublicKey};
use crate::validation::{ChainValidator, ValidationError, ValidationResult};

const CRAWL_REQUEST_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(256) {
    Some(size) => size,
    None => unreachable!(),
};
/// A crawl request for the same blocks is not repeated within this period.
const CRAWL_REQUEST_RETRY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub(crate) struct SigningSettings {
    pub(crate) min_transaction_size: u64,
    pub(crate) sign_delay: Duration,
    pub(crate) sign_timeout: Duration,
    pub(crate) crawl_limit: i64,
}

impl From<&TrustChainConfiguration> for SigningSettings {
    fn from(config: &TrustChainConfiguration) -> Self {
        Self {
            min_transaction_size: config.min_transaction_size,
            sign_delay: config.sign_delay(),
            sign_timeout: config.sign_timeout(),
            crawl_limit: config.crawl_limit,
        }
    }
}

enum ProposalReply {
    Counter(Block),
    /// The counterparty already holds a signed exchange at the proposal's sequence number.
    AlreadySigned(BlockPair),
    Rejected(RejectReason),
}

struct InFlight {
    reply: oneshot::Sender<ProposalReply>,
}

/// Outcome of checking an incoming request.
enum RequestDecision {
    Signed(Block),
    Refused {
        reason: RejectReason,
        crawl_from: Option<u64>,
    },
}

/// Whether the local side proposes the block for `interaction`.
///
/// The side that uploaded more proposes, on a tie the one with the greater public key.
/// Both sides see the same interaction mirrored, so exactly one of them proposes.
pub(crate) fn proposes(local: &PublicKey, counterparty: &PublicKey, interaction: Interaction) -> bool {
    interaction.up > interaction.down || (interaction.up == interaction.down && local > counterparty)
}

pub(crate) struct SigningProtocol {
    producer: BlockProducer,
    store: Arc<dyn BlockStore>,
    pending: Arc<PendingLedger>,
    validator: ChainValidator,
    transport: Arc<dyn Transport>,
    /// Held while a block is created on top of the local chain or appended to it.
    /// Never held while waiting for the network.
    chain_guard: Mutex<()>,
    /// Sent proposals by counterparty and sequence number.
    in_flight: Mutex<HashMap<(PublicKey, u64), InFlight>>,
    crawl_requests: Mutex<LruCache<(PublicKey, u64), Instant>>,
    settings: SigningSettings,
}

impl SigningProtocol {
    pub(crate) fn new(
        keypair: Arc<Keypair>,
        store: Arc<dyn BlockStore>,
        pending: Arc<PendingLedger>,
        transport: Arc<dyn Transport>,
        settings: SigningSettings,
    ) -> Self {
        Self {
            producer: BlockProducer::new(keypair),
            validator: ChainValidator::new(store.clone()),
            store,
            pending,
            transport,
            chain_guard: Mutex::new(()),
            in_flight: Mutex::new(HashMap::new()),
            crawl_requests: Mutex::new(LruCache::new(CRAWL_REQUEST_CACHE_SIZE)),
            settings,
        }
    }

    pub(crate) fn public_key(&self) -> PublicKey {
        self.producer.public_key
    }

    pub(crate) fn pending(&self) -> &Arc<PendingLedger> {
        &self.pending
    }

    /// Entry point for an interaction measured outside of the ledger.
    pub(crate) fn on_interaction(self: &Arc<Self>, counterparty: PublicKey, interaction: Interaction) -> InteractionDecision {
        if counterparty == self.public_key() {
            log::warn!("Ignoring interaction with ourselves");
            return InteractionDecision::Refused;
        }
        if interaction.size() < self.settings.min_transaction_size {
            log::debug!(
                "Discarding interaction with {counterparty:?} ({interaction}), below {} bytes",
                self.settings.min_transaction_size
            );
            return InteractionDecision::Discarded;
        }

        if proposes(&self.public_key(), &counterparty, interaction) {
            log::debug!("Proposing block to {counterparty:?} for {interaction}");
            let protocol = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(protocol.settings.sign_delay).await;
                let mut outcome = protocol.sign(counterparty, interaction).await;
                if let Ok(SignOutcome::Rejected(RejectReason::Stale)) = outcome {
                    log::debug!("Local chain moved on, proposing {interaction} to {counterparty:?} again");
                    outcome = protocol.sign(counterparty, interaction).await;
                }
                match outcome {
                    Ok(SignOutcome::Agreed(pair)) => log::info!("Agreed on {}", pair.proposal),
                    Ok(outcome) => log::info!("Proposal to {counterparty:?} ended {}", outcome.state()),
                    Err(err) => log::error!("Signing with {counterparty:?} failed: {err}"),
                }
            });
            return InteractionDecision::Proposing;
        }

        let (Ok(up), Ok(down)) = (i64::try_from(interaction.up), i64::try_from(interaction.down)) else {
            return InteractionDecision::Refused;
        };
        if self.pending.add(counterparty, up, down) {
            log::debug!("Waiting for {counterparty:?} to propose {interaction}");
            InteractionDecision::Pending
        } else {
            InteractionDecision::Refused
        }
    }

    /// Whether we would counter sign `block` right now.
    pub(crate) fn should_sign(&self, block: &Block) -> bool {
        self.validator
            .validate_incoming(block, self.pending.get(&block.public_key))
    }

    /// Proposes a block for `interaction` and waits for the counterparty to sign it.
    ///
    /// The local chain stays open to other exchanges during the wait. If it has moved on by the
    /// time the counter signature arrives the proposal is dropped as [`RejectReason::Stale`].
    pub(crate) async fn sign(&self, counterparty: PublicKey, interaction: Interaction) -> Result<SignOutcome, SigningError> {
        if counterparty == self.public_key() {
            return Err(SigningError::SelfInteraction);
        }

        let proposal = {
            let _chain = self.chain_guard.lock();
            let latest = self.store.get_latest(&self.public_key())?;
            self.producer
                .create_request(latest.as_ref(), counterparty, interaction)?
        };
        let mut state = SigningState::Proposed;
        let key = (counterparty, proposal.sequence_number);

        let (reply_tx, reply_rcv) = oneshot::channel();
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.contains_key(&key) {
                log::debug!("Proposal {proposal} is already waiting for {counterparty:?}");
                state.transition(SigningState::Rejected)?;
                return Ok(SignOutcome::Rejected(RejectReason::Busy));
            }
            in_flight.insert(key, InFlight { reply: reply_tx });
        }

        let message = ChainMessage::HalfBlock(proposal.clone());
        if let Err(err) = self.transport.send(counterparty, message).await {
            log::warn!("Failed to send proposal {proposal}: {err}");
            self.in_flight.lock().remove(&key);
            state.transition(SigningState::Rejected)?;
            return Ok(SignOutcome::Rejected(RejectReason::Unreachable));
        }
        state = state.transition(SigningState::Sent)?;
        log::debug!("Sent proposal {proposal}, waiting for the counter signature");

        let outcome = match tokio::time::timeout(self.settings.sign_timeout, reply_rcv).await {
            Ok(Ok(ProposalReply::Counter(counter))) => self.commit(proposal.clone(), counter)?,
            Ok(Ok(ProposalReply::AlreadySigned(pair))) => self.recover(&proposal, pair)?,
            Ok(Ok(ProposalReply::Rejected(reason))) => SignOutcome::Rejected(reason),
            Ok(Err(_)) => SignOutcome::Rejected(RejectReason::Internal),
            Err(_) => {
                self.in_flight.lock().remove(&key);
                log::warn!("No counter signature for {proposal} within {:?}", self.settings.sign_timeout);
                SignOutcome::TimedOut
            }
        };

        state = state.transition(outcome.state())?;
        log::debug!("Proposal {proposal} ended {state}");
        Ok(outcome)
    }

    /// Stores `proposal` with its counter signature if the local chain is still where the proposal left it.
    fn commit(&self, proposal: Block, counter: Block) -> Result<SignOutcome, SigningError> {
        match self.accept_counter_signature(&proposal, &counter) {
            Ok(()) => {}
            Err(ValidationError::Storage(err)) => return Err(err.into()),
            Err(err) => {
                log::warn!("Invalid counter signature for {proposal}: {err}");
                return Ok(SignOutcome::Rejected(RejectReason::InvalidCounterSignature));
            }
        }

        let _chain = self.chain_guard.lock();
        if !self.extends_local_chain(&proposal)? {
            log::info!("Local chain moved on while {proposal} was waiting, dropping it");
            return Ok(SignOutcome::Rejected(RejectReason::Stale));
        }
        let mut stored = self.store.add_blocks(&[proposal, counter])?.into_iter();
        match (stored.next(), stored.next()) {
            (Some(proposal), Some(counter)) => Ok(SignOutcome::Agreed(BlockPair { proposal, counter })),
            _ => Err(anyhow::anyhow!("Both halves must be stored").into()),
        }
    }

    /// Adopts an exchange the counterparty signed but whose counter signature never reached us.
    ///
    /// The current proposal is not signed either way, it has to be proposed again on top of the
    /// recovered block.
    fn recover(&self, proposal: &Block, pair: BlockPair) -> Result<SignOutcome, SigningError> {
        let BlockPair {
            proposal: signed,
            counter,
        } = pair;
        if signed.public_key != self.public_key()
            || signed.sequence_number != proposal.sequence_number
            || signed.link_public_key != proposal.link_public_key
        {
            log::warn!("Counterparty answered {proposal} with unrelated {signed}");
            return Ok(SignOutcome::Rejected(RejectReason::InvalidBlock));
        }
        if !signed.verify_signature() {
            log::warn!("Counterparty answered {proposal} with {signed}, not signed by us");
            return Ok(SignOutcome::Rejected(RejectReason::InvalidBlock));
        }
        match self.accept_counter_signature(&signed, &counter) {
            Ok(()) => {}
            Err(ValidationError::Storage(err)) => return Err(err.into()),
            Err(err) => {
                log::warn!("Invalid counter signature for recovered {signed}: {err}");
                return Ok(SignOutcome::Rejected(RejectReason::InvalidCounterSignature));
            }
        }

        let _chain = self.chain_guard.lock();
        if !self.extends_local_chain(&signed)? {
            log::warn!("Counterparty holds {signed}, which conflicts with our chain");
            return Ok(SignOutcome::Rejected(RejectReason::InvalidBlock));
        }
        self.store.add_blocks(&[signed.clone(), counter])?;
        log::info!("Recovered {signed}, {proposal} has to be proposed again");
        Ok(SignOutcome::Rejected(RejectReason::Stale))
    }

    /// Whether `block` goes right on top of the latest block of the local chain.
    fn extends_local_chain(&self, block: &Block) -> Result<bool, StorageError> {
        let latest = self.store.get_latest(&self.public_key())?;
        let extends = match latest {
            Some(latest) => {
                latest.sequence_number + 1 == block.sequence_number && latest.hash == block.previous_hash
            }
            None => block.is_genesis() && block.previous_hash.is_genesis(),
        };
        Ok(extends)
    }

    pub(crate) async fn handle_event(&self, event: NetworkEvent) -> Result<(), SigningError> {
        let NetworkEvent { from, message } = event;
        log::trace!("Received {message} from {from:?}");

        match message {
            ChainMessage::HalfBlock(block) if block.public_key != from => {
                log::warn!("Dropping block {block} relayed by {from:?}");
                Ok(())
            }
            ChainMessage::HalfBlock(block) if block.is_request() => self.on_request(from, block).await,
            ChainMessage::HalfBlock(block) => {
                self.on_counter_signature(from, block);
                Ok(())
            }
            ChainMessage::AlreadySigned(pair) if pair.counter.public_key != from => {
                log::warn!("Dropping exchange {} relayed by {from:?}", pair.counter);
                Ok(())
            }
            ChainMessage::AlreadySigned(pair) => {
                let sequence_number = pair.proposal.sequence_number;
                self.resolve(from, sequence_number, ProposalReply::AlreadySigned(pair));
                Ok(())
            }
            ChainMessage::Reject {
                sequence_number,
                reason,
            } => {
                self.resolve(from, sequence_number, ProposalReply::Rejected(reason));
                Ok(())
            }
            ChainMessage::CrawlRequest { sequence_number } => self.on_crawl_request(from, sequence_number).await,
            ChainMessage::CrawlResponse { blocks } => self.on_crawl_response(from, blocks),
        }
    }

    async fn on_request(&self, from: PublicKey, request: Block) -> Result<(), SigningError> {
        if request.link_public_key != self.public_key() {
            log::warn!("Request {request} is not addressed to us");
            return self.reject(from, &request, RejectReason::InvalidBlock).await;
        }

        match self.store.get(&request.public_key, request.sequence_number)? {
            Some(stored) if stored == request => {
                match self.store.get_linked(&request)? {
                    Some(counter) if counter.public_key == self.public_key() => {
                        log::debug!("Request {request} was already signed, sending {counter} again");
                        self.send(from, ChainMessage::HalfBlock(counter)).await;
                    }
                    _ => log::debug!("Ignoring known request {request}"),
                }
                return Ok(());
            }
            Some(stored) => {
                return match self.store.get_linked(&stored)? {
                    Some(counter) if counter.public_key == self.public_key() => {
                        log::info!("Request {request} replaces our signed {stored}, sending it back");
                        let pair = BlockPair {
                            proposal: stored,
                            counter,
                        };
                        self.send(from, ChainMessage::AlreadySigned(pair)).await;
                        Ok(())
                    }
                    _ => {
                        log::warn!("Request {request} conflicts with stored {stored}");
                        self.reject(from, &request, RejectReason::InvalidBlock).await
                    }
                };
            }
            None => {}
        }

        match self.counter_sign(from, &request)? {
            RequestDecision::Signed(counter) => {
                log::info!("Signed {request} with {counter}");
                self.send(from, ChainMessage::HalfBlock(counter)).await;
            }
            RequestDecision::Refused { reason, crawl_from } => {
                self.reject(from, &request, reason).await?;
                if let Some(sequence_number) = crawl_from {
                    self.request_crawl(from, sequence_number).await;
                }
            }
        }
        Ok(())
    }

    /// Checks `request` and, when it holds up, appends our linked block and stores both halves.
    fn counter_sign(&self, from: PublicKey, request: &Block) -> Result<RequestDecision, SigningError> {
        let _chain = self.chain_guard.lock();

        match self
            .validator
            .check_incoming(request, self.pending.get(&request.public_key))
        {
            Ok(()) => {}
            Err(ValidationError::Storage(err)) => return Err(err.into()),
            Err(ValidationError::SequenceGap { known, received }) => {
                log::info!("Missing blocks {}..{received} of {from:?}", known + 1);
                return Ok(RequestDecision::Refused {
                    reason: RejectReason::SequenceGap,
                    crawl_from: Some(known + 1),
                });
            }
            Err(err @ (ValidationError::NoPending(_) | ValidationError::InsufficientPending { .. })) => {
                log::warn!("Rejecting {request}: {err}");
                return Ok(RequestDecision::Refused {
                    reason: RejectReason::InsufficientPending,
                    crawl_from: None,
                });
            }
            Err(err) => {
                log::warn!("Rejecting {request}: {err}");
                return Ok(RequestDecision::Refused {
                    reason: RejectReason::InvalidBlock,
                    crawl_from: None,
                });
            }
        }

        let latest = self.store.get_latest(&self.public_key())?;
        let counter = self.producer.create_linked(latest.as_ref(), request)?;
        self.store.add_blocks(&[request.clone(), counter.clone()])?;

        let tx = &request.transaction;
        if !self.pending.consume(from, tx.down, tx.up) {
            log::warn!("Pending bytes of {from:?} changed while signing {request}");
        }
        Ok(RequestDecision::Signed(counter))
    }

    fn on_counter_signature(&self, from: PublicKey, counter: Block) {
        if counter.link_public_key != self.public_key() {
            log::warn!("Counter signature {counter} is not addressed to us");
            return;
        }
        self.resolve(from, counter.link_sequence_number, ProposalReply::Counter(counter));
    }

    fn resolve(&self, from: PublicKey, sequence_number: u64, reply: ProposalReply) {
        let in_flight = self.in_flight.lock().remove(&(from, sequence_number));
        match in_flight {
            Some(proposal) => {
                if proposal.reply.send(reply).is_err() {
                    log::debug!("Proposal {sequence_number} was already abandoned");
                }
            }
            None => log::debug!("No proposal {sequence_number} waiting for {from:?}"),
        }
    }

    /// The counterparty's half must mirror `proposal` and be consistent with its known chain.
    fn accept_counter_signature(&self, proposal: &Block, counter: &Block) -> Result<(), ValidationError> {
        let links_back = counter.public_key == proposal.link_public_key
            && counter.link_public_key == proposal.public_key
            && counter.link_sequence_number == proposal.sequence_number;
        let mirrored = counter.transaction.interaction() == proposal.transaction.interaction().mirrored();
        if !links_back || !mirrored {
            return Err(ValidationError::LinkMismatch(counter.key()));
        }
        match self.validator.validate_block(counter)? {
            ValidationResult::Invalid(err) => Err(err),
            _ => Ok(()),
        }
    }

    async fn on_crawl_request(&self, from: PublicKey, sequence_number: u64) -> Result<(), SigningError> {
        let blocks = self
            .store
            .crawl(&self.public_key(), sequence_number, self.settings.crawl_limit)?;
        log::debug!("Answering crawl of {from:?} from {sequence_number} with {} blocks", blocks.len());
        self.send(from, ChainMessage::CrawlResponse { blocks }).await;
        Ok(())
    }

    fn on_crawl_response(&self, from: PublicKey, blocks: Vec<Block>) -> Result<(), SigningError> {
        let mut added = 0;
        for block in blocks {
            if block.public_key == self.public_key() || self.store.contains(&block)? {
                continue;
            }
            if let ValidationResult::Invalid(err) = self.validator.validate_block(&block)? {
                log::warn!("Dropping crawled block {block} from {from:?}: {err}");
                continue;
            }
            match self.store.add_block(&block) {
                Ok(_) => added += 1,
                Err(StorageError::DuplicateBlock(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        log::debug!("Stored {added} crawled blocks from {from:?}");
        Ok(())
    }

    async fn request_crawl(&self, from: PublicKey, sequence_number: u64) {
        let now = Instant::now();
        {
            let mut requests = self.crawl_requests.lock();
            if let Some(sent) = requests.get(&(from, sequence_number)) {
                if now.duration_since(*sent) < CRAWL_REQUEST_RETRY {
                    return;
                }
            }
            requests.put((from, sequence_number), now);
        }
        self.send(from, ChainMessage::CrawlRequest { sequence_number }).await;
    }

    async fn reject(&self, to: PublicKey, request: &Block, reason: RejectReason) -> Result<(), SigningError> {
        let message = ChainMessage::Reject {
            sequence_number: request.sequence_number,
            reason,
        };
        self.send(to, message).await;
        Ok(())
    }

    async fn send(&self, to: PublicKey, message: ChainMessage) {
        if let Err(err) = self.transport.send(to, message).await {
            log::error!("Failed to send message to {to:?}: {err}");
        }
    }
}
