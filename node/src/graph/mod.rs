//! Neighbourhood of an identity reconstructed from the ledger for visualization.
//!
//! The graph is expanded level by level from the focus identity over the pairwise traffic the
//! store aggregates. Node totals are the highest cumulative totals seen in the node's blocks,
//! edges carry the bytes sent from one node to the other.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::storage::{BlockStore, Result};
use crate::utilities::crypto::PublicKey;

pub mod score;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub public_key: PublicKey,
    pub total_up: u64,
    pub total_down: u64,
    /// Number of distinct counterparties in the ledger, not only those in the graph.
    pub neighbors: u64,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: PublicKey,
    pub to: PublicKey,
    /// Bytes sent from `from` to `to`.
    pub amount: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// In breadth-first order, the focus first.
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

pub(crate) struct GraphBuilder {
    store: Arc<dyn BlockStore>,
    score_boundary: u64,
}

impl GraphBuilder {
    pub(crate) fn new(store: Arc<dyn BlockStore>, score_boundary: u64) -> Self {
        Self { store, score_boundary }
    }

    /// Expands `neighbor_level` hops around `focus`.
    ///
    /// Identities in `excluded` are never visited. A node other than the focus adds at most
    /// `extra_hop_budget` new identities to the next level, those it exchanged the most with;
    /// 0 leaves it unlimited.
    pub(crate) fn build_graph(
        &self,
        focus: PublicKey,
        neighbor_level: u32,
        extra_hop_budget: usize,
        excluded: &HashSet<PublicKey>,
    ) -> Result<Graph> {
        let mut visited = vec![focus];
        let mut seen: HashSet<PublicKey> = HashSet::from([focus]);
        let mut edges: HashMap<(PublicKey, PublicKey), u64> = HashMap::new();
        let mut frontier = vec![focus];

        for level in 0..neighbor_level {
            let mut next = Vec::new();
            for node in &frontier {
                let mut added = 0;
                for neighbor in self.store.graph_neighbors(node)? {
                    let peer = neighbor.public_key;
                    if excluded.contains(&peer) {
                        continue;
                    }
                    let is_new = !seen.contains(&peer);
                    if is_new && *node != focus && extra_hop_budget > 0 && added >= extra_hop_budget {
                        continue;
                    }

                    add_edge(&mut edges, *node, peer, neighbor.sent);
                    add_edge(&mut edges, peer, *node, neighbor.received);
                    if is_new {
                        seen.insert(peer);
                        visited.push(peer);
                        next.push(peer);
                        added += 1;
                    }
                }
            }
            log::trace!("Graph level {} of {} adds {} nodes", level + 1, focus.short(), next.len());
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let nodes = visited
            .into_iter()
            .map(|public_key| self.node(public_key))
            .collect::<Result<Vec<_>>>()?;
        let mut edges = edges
            .into_iter()
            .map(|((from, to), amount)| GraphEdge { from, to, amount })
            .collect::<Vec<_>>();
        edges.sort_by(|a, b| (a.from, a.to).cmp(&(b.from, b.to)));

        log::debug!(
            "Built graph around {} with {} nodes and {} edges",
            focus.short(),
            nodes.len(),
            edges.len()
        );
        Ok(Graph { nodes, edges })
    }

    fn node(&self, public_key: PublicKey) -> Result<GraphNode> {
        let (total_up, total_down) = self
            .store
            .edge_watermarks(&public_key)?
            .iter()
            .fold((0, 0), |(up, down), mark| (up.max(mark.total_up), down.max(mark.total_down)));
        let neighbors = self.store.graph_neighbors(&public_key)?.len() as u64;
        Ok(GraphNode {
            public_key,
            total_up,
            total_down,
            neighbors,
            score: score::score(total_up, total_down, self.score_boundary),
        })
    }
}

/// Both ends of an exchange observe it, the larger observation wins.
fn add_edge(edges: &mut HashMap<(PublicKey, PublicKey), u64>, from: PublicKey, to: PublicKey, amount: u64) {
    if amount == 0 {
        return;
    }
    let entry = edges.entry((from, to)).or_default();
    *entry = (*entry).max(amount);
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use crate::block::types::block::test::keypair;
    use crate::config::DEFAULT_SCORE_BOUNDARY;
    use crate::storage::sqlite::test::{commit_exchange, open_storage};
    use crate::utilities::crypto::{Keypair, TrustChainKeypair};

    use super::*;

    struct Fixture {
        builder: GraphBuilder,
        alice: Keypair,
        bob: Keypair,
        carol: Keypair,
        dave: Keypair,
        erin: Keypair,
        _dir: TempDir,
    }

    /// alice - bob - carol - dave, and bob - erin with less traffic than bob - carol.
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn BlockStore> = Arc::new(open_storage(&dir));
        let (alice, bob, carol, dave, erin) = (
            keypair("alice"),
            keypair("bob"),
            keypair("carol"),
            keypair("dave"),
            keypair("erin"),
        );
        commit_exchange(store.as_ref(), &alice, &bob, 10, 5);
        commit_exchange(store.as_ref(), &bob, &carol, 100, 0);
        commit_exchange(store.as_ref(), &carol, &dave, 7, 3);
        commit_exchange(store.as_ref(), &erin, &bob, 1, 1);

        Fixture {
            builder: GraphBuilder::new(store, DEFAULT_SCORE_BOUNDARY),
            alice,
            bob,
            carol,
            dave,
            erin,
            _dir: dir,
        }
    }

    fn keys(graph: &Graph) -> Vec<PublicKey> {
        graph.nodes.iter().map(|node| node.public_key).collect()
    }

    #[test]
    fn level_zero_is_only_the_focus() {
        let f = fixture();
        let graph = f
            .builder
            .build_graph(f.alice.public_key(), 0, 0, &HashSet::new())
            .unwrap();

        assert_eq!(keys(&graph), vec![f.alice.public_key()]);
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn expands_one_level_per_hop() {
        let f = fixture();
        let graph = f
            .builder
            .build_graph(f.alice.public_key(), 2, 0, &HashSet::new())
            .unwrap();

        let nodes = keys(&graph);
        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes[..2], [f.alice.public_key(), f.bob.public_key()]);
        assert!(nodes.contains(&f.carol.public_key()));
        assert!(nodes.contains(&f.erin.public_key()));
        assert!(!nodes.contains(&f.dave.public_key()));
    }

    #[test]
    fn edges_are_deduplicated_per_direction() {
        let f = fixture();
        let graph = f
            .builder
            .build_graph(f.alice.public_key(), 2, 0, &HashSet::new())
            .unwrap();
        let amount = |from: &Keypair, to: &Keypair| {
            graph
                .edges
                .iter()
                .filter(|edge| edge.from == from.public_key() && edge.to == to.public_key())
                .map(|edge| edge.amount)
                .collect::<Vec<_>>()
        };

        assert_eq!(amount(&f.alice, &f.bob), vec![10]);
        assert_eq!(amount(&f.bob, &f.alice), vec![5]);
        assert_eq!(amount(&f.bob, &f.carol), vec![100]);
        assert!(amount(&f.carol, &f.bob).is_empty());
    }

    #[test]
    fn nodes_carry_watermarks_and_score() {
        let f = fixture();
        let graph = f
            .builder
            .build_graph(f.alice.public_key(), 1, 0, &HashSet::new())
            .unwrap();

        let bob = &graph.nodes[1];
        assert_eq!(bob.public_key, f.bob.public_key());
        // 5 up 10 down with alice, then 100 up to carol, then 1/1 with erin.
        assert_eq!((bob.total_up, bob.total_down), (106, 11));
        assert_eq!(bob.neighbors, 3);
        assert!(bob.score > 0.5);
    }

    #[test]
    fn excluded_identities_are_skipped() {
        let f = fixture();
        let excluded = HashSet::from([f.bob.public_key()]);
        let graph = f
            .builder
            .build_graph(f.alice.public_key(), 3, 0, &excluded)
            .unwrap();

        assert_eq!(keys(&graph), vec![f.alice.public_key()]);
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn hop_budget_keeps_busiest_neighbors() {
        let f = fixture();
        let graph = f
            .builder
            .build_graph(f.alice.public_key(), 3, 1, &HashSet::new())
            .unwrap();

        let nodes = keys(&graph);
        assert_eq!(
            nodes,
            vec![
                f.alice.public_key(),
                f.bob.public_key(),
                f.carol.public_key(),
                f.dave.public_key()
            ]
        );
    }
}
