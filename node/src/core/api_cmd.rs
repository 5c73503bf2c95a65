use crate::api::types::ApiStatistics;
use crate::api::{ApiCmd, ApiError, Reply};
use crate::block::Block;
use crate::core::node::TrustChainNode;
use crate::graph::score::score;
use crate::storage::StorageError;
use crate::utilities::crypto::PublicKey;
use crate::validation::ValidationResult;

pub(crate) struct ApiCmdProcessor;

impl ApiCmdProcessor {
    pub(crate) fn process_api_requests(node: &mut TrustChainNode, cmd: ApiCmd) {
        log::trace!("Processing API request: {cmd}");
        match cmd {
            ApiCmd::ReportInteraction(counterparty, interaction, reply) => {
                let decision = node.protocol.on_interaction(counterparty, interaction);
                respond(reply, Ok(decision));
            }
            ApiCmd::ShouldSign(block, reply) => {
                respond(reply, Ok(node.protocol.should_sign(&block)));
            }
            ApiCmd::Sign(counterparty, interaction, reply) => {
                // Waits for the counterparty, the event loop must keep running meanwhile.
                let protocol = node.protocol.clone();
                tokio::spawn(async move {
                    let outcome = protocol
                        .sign(counterparty, interaction)
                        .await
                        .map_err(ApiError::from);
                    respond(reply, outcome);
                });
            }
            ApiCmd::GetStatistics(public_key, reply) => {
                let public_key = public_key.unwrap_or(node.node_info.public_key);
                let statistics = Self::statistics(node, public_key).map_err(ApiError::from);
                respond(reply, statistics);
            }
            ApiCmd::GetGraph(request, reply) => {
                let graph = node
                    .graph
                    .build_graph(
                        request.focus,
                        request.neighbor_level,
                        request.extra_hop_budget,
                        &request.excluded,
                    )
                    .map_err(ApiError::from);
                respond(reply, graph);
            }
            ApiCmd::AddBlock(block, reply) => {
                respond(reply, Self::add_block(node, *block));
            }
            ApiCmd::GetLatestBlocks(public_key, limit, reply) => {
                let blocks = node
                    .store
                    .get_latest_blocks(&public_key, limit)
                    .map_err(ApiError::from);
                respond(reply, blocks);
            }
            ApiCmd::Crawl(public_key, sequence_number, limit, reply) => {
                let blocks = node
                    .store
                    .crawl(&public_key, sequence_number, limit)
                    .map_err(ApiError::from);
                respond(reply, blocks);
            }
        }
    }

    fn statistics(node: &TrustChainNode, public_key: PublicKey) -> Result<ApiStatistics, StorageError> {
        let latest_block = node.store.get_latest(&public_key)?;
        let (peers_helped, peers_helped_by) = node.store.num_unique_interactors(&public_key)?;
        let neighbors = node.store.total_traffic(&public_key)?.neighbors;
        let total_blocks = node.store.count_blocks(&public_key)?;
        let (total_up, total_down) = latest_block
            .as_ref()
            .map(|block| (block.transaction.total_up, block.transaction.total_down))
            .unwrap_or_default();
        let pending_counterparties =
            (public_key == node.node_info.public_key).then(|| node.protocol.pending().len());

        Ok(ApiStatistics {
            public_key,
            peers_helped,
            peers_helped_by,
            neighbors,
            total_blocks,
            total_up,
            total_down,
            score: score(total_up, total_down, node.node_info.initial_config.trustchain.score_boundary),
            latest_block,
            pending_counterparties,
        })
    }

    /// Stores a block that is not invalid.
    fn add_block(node: &TrustChainNode, block: Block) -> Result<Block, ApiError> {
        if let ValidationResult::Invalid(err) = node.validator.validate_block(&block)? {
            log::warn!("Refusing to store {block}: {err}");
            return Err(ApiError::InvalidBlock(err.to_string()));
        }
        Ok(node.store.add_block(&block)?)
    }
}

fn respond<T>(reply: Reply<T>, result: Result<T, ApiError>) {
    if reply.send(result).is_err() {
        log::warn!("API caller went away before the response");
    }
}
