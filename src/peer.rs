//! Honest peers: block-tree view, transaction pool and the honest mining
//! protocol.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use rand::{seq::SliceRandom, Rng};
use thiserror::Error;

use crate::{
    block::{Block, BlockArena, BlockHash},
    event::{EventId, EventKind, PendingEvent, Time},
    ledger::Ledger,
    network::Link,
    power_dist::PowerValue,
    transaction::{Sender, Transaction, TxnId, BLOCK_REWARD},
};

/// Maximum number of pooled transactions placed in one block, not counting
/// the coinbase.
pub const MAX_BLOCK_TXNS: usize = 999;

/// Unique identifier of a peer. Peers are numbered from 0.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PeerId(usize);

impl PeerId {
    /// Returns the [`usize`] corresponding to this [`PeerId`].
    pub fn get(&self) -> usize {
        self.0
    }
}

impl From<usize> for PeerId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Whether a peer may start a new mining attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MiningStatus {
    #[default]
    Free,
    /// Mining a block at `depth`. `completion` is the event which finishes
    /// the attempt, once it has been scheduled.
    Mining {
        depth: u64,
        completion: Option<EventId>,
    },
}

/// A peer's local knowledge of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeEntry {
    /// Time at which the peer accepted the block.
    pub arrival_time: Time,
    pub depth: u64,
}

/// Reasons a peer refuses to add a block to its tree view. These are routine
/// outcomes of an asynchronous network, not failures of the simulation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockRejection {
    #[error("block is already in the tree")]
    Duplicate,
    #[error("block does not name a parent")]
    NoParentGiven,
    #[error("parent block {0:?} is not in the tree")]
    ParentUnknown(BlockHash),
    #[error("block does not start with a coinbase transaction")]
    MissingCoinbase,
    #[error("coinbase transaction {0:?} is malformed")]
    InvalidCoinbase(TxnId),
    #[error("transaction {0:?} spends from the genesis issuer")]
    IssuerPayment(TxnId),
    #[error("transaction {0:?} is already included in the chain")]
    DoubleInclusion(TxnId),
    #[error("sender of transaction {0:?} has an insufficient balance")]
    InsufficientBalance(TxnId),
    #[error("a chain of depth {0} overtook the block's parent")]
    StaleParent(u64),
}

/// An honest peer. Mines on the longest chain it knows of and publishes every
/// block as soon as it is found.
#[derive(Debug, Clone)]
pub struct Peer {
    id: PeerId,
    hash_power: PowerValue,
    links: Vec<Link>,
    status: MiningStatus,
    successful_blocks: u64,
    tree: HashMap<BlockHash, TreeEntry>,
    leaves: BTreeSet<BlockHash>,
    pool: BTreeMap<TxnId, Transaction>,
    seen_blocks: HashSet<BlockHash>,
    /// Blocks waiting for their parent, keyed by the parent's hash.
    orphans: HashMap<BlockHash, Vec<BlockHash>>,
    txn_nonce: u64,
}

impl Peer {
    pub fn new(id: PeerId, hash_power: PowerValue, links: Vec<Link>) -> Self {
        Peer {
            id,
            hash_power,
            links,
            status: MiningStatus::Free,
            successful_blocks: 0,
            tree: HashMap::new(),
            leaves: BTreeSet::new(),
            pool: BTreeMap::new(),
            seen_blocks: HashSet::new(),
            orphans: HashMap::new(),
            txn_nonce: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> PeerId {
        self.id
    }

    #[inline]
    pub fn hash_power(&self) -> PowerValue {
        self.hash_power
    }

    #[inline]
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    #[inline]
    pub fn status(&self) -> MiningStatus {
        self.status
    }

    /// Number of blocks this peer has mined which made it into its own view
    /// (or, for a selfish peer, into its private chain).
    #[inline]
    pub fn successful_blocks(&self) -> u64 {
        self.successful_blocks
    }

    /// Every block this peer has accepted.
    #[inline]
    pub fn tree(&self) -> &HashMap<BlockHash, TreeEntry> {
        &self.tree
    }

    /// Blocks in the tree view with no known child.
    #[inline]
    pub fn leaves(&self) -> &BTreeSet<BlockHash> {
        &self.leaves
    }

    /// Transactions this peer has heard of.
    #[inline]
    pub fn pool(&self) -> &BTreeMap<TxnId, Transaction> {
        &self.pool
    }

    #[inline]
    pub fn knows_block(&self, hash: &BlockHash) -> bool {
        self.tree.contains_key(hash)
    }

    /// Adds the genesis block to the tree view.
    pub fn init_genesis(&mut self, genesis: &Block) {
        assert!(genesis.is_genesis(), "{:?} is not a genesis block", genesis);

        self.tree.insert(
            genesis.hash,
            TreeEntry { arrival_time: genesis.created_at, depth: 0 },
        );
        self.leaves.insert(genesis.hash);
        self.seen_blocks.insert(genesis.hash);
    }

    /// Creates a payment of 1 to 10 coins to a uniformly chosen peer (possibly
    /// this one) and adds it to the pool.
    pub fn create_transaction<R: Rng + ?Sized>(
        &mut self,
        num_peers: usize,
        now: Time,
        rng: &mut R,
    ) -> Transaction {
        let recipient = PeerId(rng.gen_range(0..num_peers));
        let amount = rng.gen_range(1..=10);

        let txn = Transaction::new(
            now,
            Sender::Peer(self.id),
            recipient,
            amount,
            self.txn_nonce,
        );
        self.txn_nonce += 1;
        self.pool.insert(txn.id, txn.clone());

        txn
    }

    /// Adds `txn` to the pool. Returns `false` if the transaction had already
    /// been heard, in which case it must not be forwarded again.
    pub fn receive_transaction(&mut self, txn: Transaction) -> bool {
        use std::collections::btree_map::Entry;

        match self.pool.entry(txn.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(txn);
                true
            }
        }
    }

    /// Records that `hash` has been heard. Returns `false` if it was heard
    /// before, in which case it must not be processed or forwarded again.
    pub fn mark_block_seen(&mut self, hash: BlockHash) -> bool {
        self.seen_blocks.insert(hash)
    }

    /// Returns the tip of the longest chain in the tree view: the deepest
    /// leaf, then the earliest to arrive. Remaining ties are broken uniformly
    /// at random.
    pub fn choose_longest_chain<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> BlockHash {
        let mut leaves: Vec<_> = self.leaves.iter().copied().collect();
        leaves.shuffle(rng);

        let mut best: Option<(BlockHash, TreeEntry)> = None;
        for hash in leaves {
            let entry = self.entry(&hash);
            let better = match best {
                None => true,
                Some((_, b)) => {
                    entry.depth > b.depth
                        || (entry.depth == b.depth
                            && entry.arrival_time < b.arrival_time)
                }
            };

            if better {
                best = Some((hash, entry));
            }
        }

        best.expect("tree view must contain at least one leaf").0
    }

    /// Depth of the deepest leaf in the tree view.
    pub fn max_leaf_depth(&self) -> u64 {
        self.leaves
            .iter()
            .map(|hash| self.entry(hash).depth)
            .max()
            .expect("tree view must contain at least one leaf")
    }

    /// Starts mining a block on the tip of the longest chain. The new block is
    /// stored in `arena`, and its hash returned.
    pub fn create_block<R: Rng + ?Sized>(
        &mut self,
        arena: &mut BlockArena,
        now: Time,
        rng: &mut R,
    ) -> BlockHash {
        let tip = self.choose_longest_chain(rng);
        self.assemble_block(arena, tip, now, rng)
    }

    /// Builds a block on `parent` from a random selection of pooled
    /// transactions which are valid on that chain, and marks this peer as
    /// mining it.
    pub(crate) fn assemble_block<R: Rng + ?Sized>(
        &mut self,
        arena: &mut BlockArena,
        parent: BlockHash,
        now: Time,
        rng: &mut R,
    ) -> BlockHash {
        let mut ledger = Ledger::replay(arena, parent);

        let mut candidates: Vec<_> = self
            .pool
            .keys()
            .filter(|id| !ledger.contains(id))
            .copied()
            .collect();
        let mut wanted =
            rng.gen_range(0..=candidates.len().min(MAX_BLOCK_TXNS));
        candidates.shuffle(rng);

        let mut transactions = vec![Transaction::coinbase(now, self.id)];
        for id in candidates {
            if wanted == 0 {
                break;
            }

            let txn = &self.pool[&id];
            if ledger.apply(txn) {
                transactions.push(txn.clone());
                wanted -= 1;
            }
        }

        let block = Block::new(now, &arena[&parent], transactions);
        self.status = MiningStatus::Mining {
            depth: block.depth,
            completion: None,
        };

        arena.insert(block)
    }

    /// Associates the current mining attempt with the event that completes it.
    pub fn track_mining(&mut self, completion: EventId) {
        if let MiningStatus::Mining { depth, .. } = self.status {
            self.status = MiningStatus::Mining {
                depth,
                completion: Some(completion),
            };
        }
    }

    /// Returns true iff a block at `depth` makes the current mining attempt
    /// useless, i.e. the block being mined can no longer extend the longest
    /// chain.
    pub fn should_abandon_mining(&self, depth: u64) -> bool {
        matches!(
            self.status,
            MiningStatus::Mining { depth: d, .. } if depth >= d
        )
    }

    /// Stops the current mining attempt, returning the id of its completion
    /// event so it can be cancelled.
    pub fn abandon_mining(&mut self) -> Option<EventId> {
        let completion = match self.status {
            MiningStatus::Mining { completion, .. } => completion,
            MiningStatus::Free => None,
        };
        self.status = MiningStatus::Free;

        completion
    }

    /// Publishes a freshly mined block to this peer's own view, provided its
    /// parent is still at the tip of the longest chain. The peer is free to
    /// mine again afterwards in either case.
    pub fn broadcast_block(
        &mut self,
        arena: &BlockArena,
        hash: BlockHash,
        now: Time,
    ) -> Result<(), BlockRejection> {
        self.status = MiningStatus::Free;

        let block = &arena[&hash];
        let parent = block.parent.ok_or(BlockRejection::NoParentGiven)?;
        let max_depth = self.max_leaf_depth();
        if max_depth > block.depth - 1 {
            return Err(BlockRejection::StaleParent(max_depth));
        }

        assert!(
            self.leaves.contains(&parent),
            "parent {:?} of a mined block must be a leaf",
            parent
        );
        self.insert_block(block, now);
        self.record_success();

        Ok(())
    }

    /// Validates a block received from the network against the chain it
    /// extends. A block is accepted only if every transaction in it is valid,
    /// in which case it is added to the tree view and its transactions to the
    /// pool.
    pub fn validate_block(
        &mut self,
        arena: &BlockArena,
        now: Time,
        hash: BlockHash,
    ) -> Result<(), BlockRejection> {
        use BlockRejection::*;

        if self.knows_block(&hash) {
            return Err(Duplicate);
        }

        let block = &arena[&hash];
        let parent = block.parent.ok_or(NoParentGiven)?;
        if !self.knows_block(&parent) {
            return Err(ParentUnknown(parent));
        }

        if !block.transactions.first().is_some_and(Transaction::is_coinbase) {
            return Err(MissingCoinbase);
        }

        let mut ledger = Ledger::replay(arena, parent);
        for (i, txn) in block.transactions.iter().enumerate() {
            if txn.is_coinbase() {
                if i != 0 || txn.amount != BLOCK_REWARD {
                    return Err(InvalidCoinbase(txn.id));
                }
                continue;
            }

            if txn.sender == Sender::GenesisIssuer {
                return Err(IssuerPayment(txn.id));
            }
            if ledger.contains(&txn.id) {
                return Err(DoubleInclusion(txn.id));
            }
            if !ledger.apply(txn) {
                return Err(InsufficientBalance(txn.id));
            }
        }

        self.insert_block(block, now);
        for txn in block.transactions.iter().filter(|t| !t.is_coinbase()) {
            self.pool.entry(txn.id).or_insert_with(|| txn.clone());
        }

        Ok(())
    }

    pub(crate) fn record_success(&mut self) {
        self.successful_blocks += 1;
    }

    /// Holds on to a block whose parent has not arrived yet.
    pub(crate) fn buffer_orphan(
        &mut self,
        parent: BlockHash,
        child: BlockHash,
    ) {
        self.orphans.entry(parent).or_default().push(child);
    }

    /// Removes and returns the blocks waiting on `parent`.
    pub(crate) fn take_orphans(
        &mut self,
        parent: &BlockHash,
    ) -> Vec<BlockHash> {
        self.orphans.remove(parent).unwrap_or_default()
    }

    /// Builds events delivering a message of `size_kb` kilobytes to every
    /// neighbour except `except`.
    pub(crate) fn send_to_neighbours<R: Rng + ?Sized>(
        &self,
        kind: &EventKind,
        size_kb: u64,
        now: Time,
        except: Option<PeerId>,
        rng: &mut R,
    ) -> Vec<PendingEvent> {
        self.links
            .iter()
            .filter(|link| Some(link.peer) != except)
            .map(|link| {
                PendingEvent::new(
                    now.saturating_add(link.latency(size_kb, rng)),
                    link.peer,
                    kind.clone(),
                )
            })
            .collect()
    }

    /// Adds `block` to the tree view and moves the leaf marker from its parent
    /// to it.
    pub(crate) fn insert_block(&mut self, block: &Block, now: Time) {
        self.tree.insert(
            block.hash,
            TreeEntry { arrival_time: now, depth: block.depth },
        );
        if let Some(parent) = &block.parent {
            self.leaves.remove(parent);
        }
        self.leaves.insert(block.hash);
        self.seen_blocks.insert(block.hash);
    }

    fn entry(&self, hash: &BlockHash) -> TreeEntry {
        *self
            .tree
            .get(hash)
            .unwrap_or_else(|| panic!("leaf {:?} missing from tree view", hash))
    }
}
