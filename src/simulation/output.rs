//! Data left behind by a finished run

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    block::{BlockArena, BlockHash},
    event::Time,
    ledger::Ledger,
    node::Node,
    peer::{PeerId, TreeEntry},
    power_dist::PowerValue,
    transaction::{Transaction, TxnId},
};

/// Final state of one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub id: PeerId,
    /// Name of the protocol the peer followed.
    pub strategy: String,
    pub hash_power: PowerValue,
    pub successful_blocks: u64,
    pub tree: HashMap<BlockHash, TreeEntry>,
    pub leaves: BTreeSet<BlockHash>,
    pub pool: BTreeMap<TxnId, Transaction>,
    /// Blocks a selfish peer was still withholding, with their mining times.
    /// `None` for honest peers.
    pub private_chain: Option<Vec<(Time, BlockHash)>>,
}

impl From<&Node> for NodeSnapshot {
    fn from(node: &Node) -> Self {
        let peer = node.peer();
        let private_chain = match node {
            Node::Honest(_) => None,
            Node::Selfish(attacker) => {
                Some(attacker.private_chain().iter().copied().collect())
            }
        };

        NodeSnapshot {
            id: peer.id(),
            strategy: node.name(),
            hash_power: peer.hash_power(),
            successful_blocks: peer.successful_blocks(),
            tree: peer.tree().clone(),
            leaves: peer.leaves().clone(),
            pool: peer.pool().clone(),
            private_chain,
        }
    }
}

/// Contains the output data from a simulation.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub seed: u64,
    pub events_executed: usize,
    /// Timestamp of the last executed event.
    pub final_time: Time,
    pub genesis: Option<BlockHash>,
    /// Every block created during the run, including withheld ones.
    pub arena: BlockArena,
    /// Indexed by [`PeerId`].
    pub nodes: Vec<NodeSnapshot>,
}

impl SimulationOutput {
    #[inline]
    pub fn node(&self, peer: PeerId) -> &NodeSnapshot {
        &self.nodes[peer.get()]
    }

    /// Tip of the longest chain known to `observer`. Ties are broken by
    /// earliest arrival, then by hash, so the answer does not depend on any
    /// random draw.
    pub fn tip(&self, observer: PeerId) -> Option<BlockHash> {
        let node = self.node(observer);
        node.leaves.iter().copied().min_by(|a, b| {
            let (a_entry, b_entry) = (node.tree[a], node.tree[b]);
            b_entry
                .depth
                .cmp(&a_entry.depth)
                .then(a_entry.arrival_time.cmp(&b_entry.arrival_time))
                .then(a.cmp(b))
        })
    }

    /// Hashes along the longest chain known to `observer`, genesis first.
    /// Empty if the run ended before the genesis block was created.
    pub fn longest_chain(&self, observer: PeerId) -> Vec<BlockHash> {
        self.tip(observer)
            .map(|tip| self.arena.ancestors_of(tip))
            .unwrap_or_default()
    }

    /// Balances along the longest chain known to `observer`.
    pub fn ledger(&self, observer: PeerId) -> Option<Ledger> {
        self.tip(observer).map(|tip| Ledger::replay(&self.arena, tip))
    }

    /// Number of blocks each peer mined on the longest chain known to
    /// `observer`, not counting the genesis block.
    pub fn blocks_by_miner(&self, observer: PeerId) -> HashMap<PeerId, usize> {
        let mut counts = HashMap::new();
        for hash in self.longest_chain(observer) {
            if let Some(miner) = self.arena[&hash].miner() {
                *counts.entry(miner).or_default() += 1;
            }
        }

        counts
    }

    /// Fraction of the non-genesis blocks on `observer`'s longest chain that
    /// were mined by `miner`. Returns 0.0 if the chain holds only the genesis
    /// block.
    pub fn revenue(&self, observer: PeerId, miner: PeerId) -> f64 {
        let counts = self.blocks_by_miner(observer);
        let total: usize = counts.values().sum();
        if total == 0 {
            return 0.0;
        }

        counts.get(&miner).copied().unwrap_or(0) as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{NodeSnapshot, SimulationOutput};
    use crate::{
        attacker::Attacker,
        block::BlockArena,
        node::Node,
        peer::{tests::mined, tests::setup, PeerId},
        transaction::{Sender, Transaction, BLOCK_REWARD},
    };

    fn output_for(nodes: &[Node], arena: BlockArena) -> SimulationOutput {
        SimulationOutput {
            seed: 0,
            events_executed: 0,
            final_time: 0,
            genesis: None,
            arena,
            nodes: nodes.iter().map(NodeSnapshot::from).collect(),
        }
    }

    #[test]
    fn revenue_counts_coinbase_recipients() {
        let (mut arena, genesis, mut peers, _) = setup(2);
        let b1 = mined(&mut arena, genesis, 10, 0, vec![]);
        let b2 = mined(&mut arena, b1, 20, 1, vec![]);
        let b3 = mined(&mut arena, b2, 30, 1, vec![]);
        for (t, hash) in [(10, b1), (20, b2), (30, b3)] {
            peers[0].validate_block(&arena, t, hash).unwrap();
        }

        let nodes: Vec<_> = peers.into_iter().map(Node::Honest).collect();
        let output = output_for(&nodes, arena);
        let observer = PeerId::from(0);

        assert_eq!(output.longest_chain(observer), vec![genesis, b1, b2, b3]);
        assert_eq!(output.revenue(observer, PeerId::from(1)), 2.0 / 3.0);
        assert_eq!(output.revenue(PeerId::from(1), PeerId::from(1)), 0.0);
    }

    #[test]
    fn ledger_follows_observer_chain() {
        let (mut arena, genesis, mut peers, _) = setup(2);
        let payment =
            Transaction::new(12, Sender::Peer(1.into()), 0.into(), 300, 0);
        let b1 = mined(&mut arena, genesis, 10, 0, vec![]);
        let b2 = mined(&mut arena, b1, 20, 1, vec![payment]);
        for (t, hash) in [(10, b1), (20, b2)] {
            peers[0].validate_block(&arena, t, hash).unwrap();
        }

        let nodes: Vec<_> = peers.into_iter().map(Node::Honest).collect();
        let output = output_for(&nodes, arena);

        let reward = BLOCK_REWARD as i64;
        let ledger = output.ledger(PeerId::from(0)).unwrap();
        assert_eq!(ledger.balance(0.into()), 1000 + reward + 300);
        assert_eq!(ledger.balance(1.into()), 1000 + reward - 300);
        assert_eq!(
            output.ledger(PeerId::from(1)).unwrap().balance(1.into()),
            1000
        );
    }

    #[test]
    fn tip_prefers_earliest_arrival() {
        let (mut arena, genesis, mut peers, _) = setup(2);
        let late = mined(&mut arena, genesis, 10, 0, vec![]);
        let early = mined(&mut arena, genesis, 11, 1, vec![]);
        peers[0].validate_block(&arena, 5, early).unwrap();
        peers[0].validate_block(&arena, 7, late).unwrap();

        let nodes: Vec<_> = peers.into_iter().map(Node::Honest).collect();
        let output = output_for(&nodes, arena);
        assert_eq!(output.tip(PeerId::from(0)), Some(early));
    }

    #[test]
    fn snapshots_record_roles() {
        let (arena, genesis, mut peers, _) = setup(2);
        let honest = peers.pop().unwrap();
        let selfish = Attacker::new(peers.pop().unwrap());
        let nodes = vec![Node::Selfish(selfish), Node::Honest(honest)];

        let output = output_for(&nodes, arena);
        assert_eq!(output.nodes[0].strategy, "Selfish");
        assert_eq!(output.nodes[0].private_chain, Some(vec![]));
        assert_eq!(output.nodes[1].strategy, "Honest");
        assert_eq!(output.nodes[1].private_chain, None);
        assert_eq!(output.nodes[1].leaves, BTreeSet::from([genesis]));
    }
}
