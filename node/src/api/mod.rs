//! # TrustChain API
//!
//! Handle for Rust code embedding a node. Every call is sent to the node's event loop and
//! answered over a oneshot channel.
use std::fmt::Display;

use thiserror::Error;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::oneshot;

use crate::api::types::{ApiGraphRequest, ApiStatistics};
use crate::block::{Block, BlockKey, Interaction};
use crate::graph::Graph;
use crate::signing::{InteractionDecision, SignOutcome, SigningError};
use crate::storage::StorageError;
use crate::utilities::crypto::PublicKey;

pub mod types;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Block {0} is already stored")]
    DuplicateBlock(BlockKey),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("TrustChain node is not running")]
    NodeStopped,
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidParameter(reason) => ApiError::InvalidRequest(reason),
            StorageError::DuplicateBlock(key) => ApiError::DuplicateBlock(key),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<SigningError> for ApiError {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::SelfInteraction => ApiError::InvalidRequest(err.to_string()),
            SigningError::Storage(err) => err.into(),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, ApiError>>;

#[derive(Debug)]
pub(crate) enum ApiCmd {
    ReportInteraction(PublicKey, Interaction, Reply<InteractionDecision>),
    ShouldSign(Box<Block>, Reply<bool>),
    Sign(PublicKey, Interaction, Reply<SignOutcome>),
    GetStatistics(Option<PublicKey>, Reply<ApiStatistics>),
    GetGraph(ApiGraphRequest, Reply<Graph>),
    AddBlock(Box<Block>, Reply<Block>),
    GetLatestBlocks(PublicKey, i64, Reply<Vec<Block>>),
    Crawl(PublicKey, u64, i64, Reply<Vec<Block>>),
}

impl Display for ApiCmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiCmd::ReportInteraction(pk, interaction, _) => {
                write!(f, "ReportInteraction({}, {interaction})", pk.short())
            }
            ApiCmd::ShouldSign(block, _) => write!(f, "ShouldSign({block})"),
            ApiCmd::Sign(pk, interaction, _) => write!(f, "Sign({}, {interaction})", pk.short()),
            ApiCmd::GetStatistics(Some(pk), _) => write!(f, "GetStatistics({})", pk.short()),
            ApiCmd::GetStatistics(None, _) => write!(f, "GetStatistics"),
            ApiCmd::GetGraph(request, _) => write!(f, "GetGraph({request})"),
            ApiCmd::AddBlock(block, _) => write!(f, "AddBlock({block})"),
            ApiCmd::GetLatestBlocks(pk, limit, _) => write!(f, "GetLatestBlocks({}, {limit})", pk.short()),
            ApiCmd::Crawl(pk, seq, limit, _) => write!(f, "Crawl({}, {seq}, {limit})", pk.short()),
        }
    }
}

pub(crate) struct ApiListener {
    pub(crate) messages_rcv: Receiver<ApiCmd>,
}

impl ApiListener {
    pub(crate) fn new(messages_rcv: Receiver<ApiCmd>) -> Self {
        Self { messages_rcv }
    }
}

#[derive(Clone)]
pub struct TrustChainApi {
    pub(crate) commands_channel: Sender<ApiCmd>,
}

impl TrustChainApi {
    pub(crate) fn new() -> (TrustChainApi, ApiListener) {
        let (commands_channel, commands_rcv) = channel(100);
        let api_listener = ApiListener::new(commands_rcv);
        let api = TrustChainApi { commands_channel };
        (api, api_listener)
    }

    /// Reports bytes exchanged with `counterparty`, seen from the local side.
    ///
    /// Depending on the amounts the node either proposes a block after the configured delay or
    /// waits for the counterparty to propose one.
    pub async fn report_interaction(
        &self,
        counterparty: PublicKey,
        interaction: Interaction,
    ) -> Result<InteractionDecision, ApiError> {
        log::trace!("report_interaction({counterparty:?}, {interaction})");
        self.send_and_wait_response(|tx| ApiCmd::ReportInteraction(counterparty, interaction, tx))
            .await
    }

    /// Whether the node would counter sign `block` now.
    pub async fn should_sign(&self, block: Block) -> Result<bool, ApiError> {
        log::trace!("should_sign({block})");
        self.send_and_wait_response(|tx| ApiCmd::ShouldSign(Box::new(block), tx))
            .await
    }

    /// Proposes a block to `counterparty` right away and waits until it is resolved.
    pub async fn sign(&self, counterparty: PublicKey, interaction: Interaction) -> Result<SignOutcome, ApiError> {
        log::trace!("sign({counterparty:?}, {interaction})");
        self.send_and_wait_response(|tx| ApiCmd::Sign(counterparty, interaction, tx))
            .await
    }

    /// Statistics of `public_key`, of the local identity when `None`.
    pub async fn get_statistics(&self, public_key: Option<PublicKey>) -> Result<ApiStatistics, ApiError> {
        log::trace!("get_statistics({public_key:?})");
        self.send_and_wait_response(|tx| ApiCmd::GetStatistics(public_key, tx))
            .await
    }

    pub async fn get_graph(&self, request: ApiGraphRequest) -> Result<Graph, ApiError> {
        log::trace!("get_graph({request})");
        self.send_and_wait_response(|tx| ApiCmd::GetGraph(request, tx))
            .await
    }

    /// Stores a block received outside of the signing protocol after validating it.
    ///
    /// A block whose key is already stored is refused with [`ApiError::DuplicateBlock`].
    pub async fn add_block(&self, block: Block) -> Result<Block, ApiError> {
        log::trace!("add_block({block})");
        self.send_and_wait_response(|tx| ApiCmd::AddBlock(Box::new(block), tx))
            .await
    }

    /// Latest blocks of `public_key`, newest first. `limit` must be in `[1, 1000]`.
    pub async fn get_latest_blocks(&self, public_key: PublicKey, limit: i64) -> Result<Vec<Block>, ApiError> {
        log::trace!("get_latest_blocks({public_key:?}, {limit})");
        self.send_and_wait_response(|tx| ApiCmd::GetLatestBlocks(public_key, limit, tx))
            .await
    }

    /// Blocks involving `public_key` since its block at `sequence_number`. `limit` must be in `[1, 100]`.
    pub async fn crawl(&self, public_key: PublicKey, sequence_number: u64, limit: i64) -> Result<Vec<Block>, ApiError> {
        log::trace!("crawl({public_key:?}, {sequence_number}, {limit})");
        self.send_and_wait_response(|tx| ApiCmd::Crawl(public_key, sequence_number, limit, tx))
            .await
    }

    async fn send_and_wait_response<F, R>(&self, f: F) -> Result<R, ApiError>
    where
        F: FnOnce(oneshot::Sender<Result<R, ApiError>>) -> ApiCmd,
        R: Send + 'static,
    {
        let (tx, rcv) = oneshot::channel();
        let cmd = f(tx);
        if let Err(err) = self.commands_channel.send(cmd).await {
            log::error!("Failed to send command to TrustChain: {err}");
            return Err(ApiError::NodeStopped);
        }
        rcv.await.map_err(|err| {
            log::error!("Failed to receive response from TrustChain: {err:?}");
            ApiError::NodeStopped
        })?
    }
}
