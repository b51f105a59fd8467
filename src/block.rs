//! Blocks and the arena which owns them

use std::{collections::HashMap, ops::Index};

use crate::{
    event::Time,
    hash::{Hash, HashBuilder},
    peer::PeerId,
    transaction::Transaction,
};

/// Identifier of a [`Block`].
pub type BlockHash = Hash;

/// Representation of a block of transactions. Blocks never change after
/// creation, and their [`BlockHash`] is derived from their content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub created_at: Time,
    /// Hash of the previous block. `None` only for the genesis block.
    pub parent: Option<BlockHash>,
    pub hash: BlockHash,
    /// Length of the path from this block to the genesis block.
    pub depth: u64,
    /// Ordered transactions. For mined blocks, index 0 is the coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Creates the genesis block, granting `initial_balance` coins to each of
    /// `peers`.
    pub fn genesis<I>(peers: I, initial_balance: u64) -> Self
    where
        I: IntoIterator<Item = PeerId>,
    {
        let transactions = peers
            .into_iter()
            .map(|peer| Transaction::genesis_grant(peer, initial_balance))
            .collect();

        Self::build(0, None, 0, transactions)
    }

    /// Creates a block extending `parent`.
    pub fn new(
        created_at: Time,
        parent: &Block,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self::build(
            created_at,
            Some(parent.hash),
            parent.depth + 1,
            transactions,
        )
    }

    fn build(
        created_at: Time,
        parent: Option<BlockHash>,
        depth: u64,
        transactions: Vec<Transaction>,
    ) -> Self {
        let hash = Self::compute_hash(created_at, &transactions, parent);

        Block { created_at, parent, hash, depth, transactions }
    }

    /// Hash of a block's content: its timestamp, the ids of its transactions
    /// in order, and its parent's hash.
    pub fn compute_hash(
        created_at: Time,
        transactions: &[Transaction],
        parent: Option<BlockHash>,
    ) -> BlockHash {
        let mut builder = HashBuilder::new()
            .u64(created_at)
            .u64(transactions.len() as u64);
        for txn in transactions {
            builder = builder.hash(&txn.id);
        }

        match parent {
            Some(parent) => builder.hash(&parent).finish(),
            None => builder.none().finish(),
        }
    }

    #[inline]
    pub fn is_genesis(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns the peer paid by this block's coinbase transaction.
    pub fn miner(&self) -> Option<PeerId> {
        self.transactions
            .first()
            .filter(|txn| txn.is_coinbase())
            .map(|txn| txn.recipient)
    }

    /// Size of this block on the wire, in kilobytes. Each transaction takes up
    /// one kilobyte.
    #[inline]
    pub fn size_kb(&self) -> u64 {
        self.transactions.len() as u64
    }
}

/// Owner of every block created during a simulation, keyed by hash. Peers
/// refer to blocks only through their hashes.
#[derive(Debug, Clone, Default)]
pub struct BlockArena {
    blocks: HashMap<BlockHash, Block>,
}

impl BlockArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `block`, returning its hash. Inserting a block with the same
    /// content twice keeps the first copy.
    pub fn insert(&mut self, block: Block) -> BlockHash {
        let hash = block.hash;
        self.blocks.entry(hash).or_insert(block);

        hash
    }

    #[inline]
    pub fn get(&self, hash: &BlockHash) -> Option<&Block> {
        self.blocks.get(hash)
    }

    #[inline]
    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns the hashes of all blocks from `tip` back to the genesis block,
    /// in order of ascending depth and including `tip`.
    ///
    /// ## Panics
    /// Panics if `tip` or one of its ancestors is not in the arena.
    pub fn ancestors_of(&self, tip: BlockHash) -> Vec<BlockHash> {
        let mut ancestors = vec![];
        let mut curr = Some(tip);
        while let Some(hash) = curr {
            ancestors.push(hash);
            curr = self[&hash].parent;
        }

        ancestors.reverse();
        ancestors
    }

    /// Iterates over the blocks from `tip` to the genesis block, tip first.
    pub fn chain(&self, tip: BlockHash) -> impl Iterator<Item = &Block> {
        let mut curr = Some(tip);
        std::iter::from_fn(move || {
            let block = &self[&curr?];
            curr = block.parent;
            Some(block)
        })
    }
}

impl Index<&BlockHash> for BlockArena {
    type Output = Block;

    fn index(&self, index: &BlockHash) -> &Self::Output {
        self.blocks
            .get(index)
            .unwrap_or_else(|| panic!("block {:?} is not in the arena", index))
    }
}

#[cfg(test)]
mod tests {
    use super::{Block, BlockArena};
    use crate::{peer::PeerId, transaction::Transaction};

    fn genesis() -> Block {
        Block::genesis((0..3).map(PeerId::from), 1000)
    }

    #[test]
    fn hash_is_pure_function_of_content() {
        let g = genesis();
        let txns = vec![Transaction::coinbase(4, 1.into())];
        let a = Block::new(4, &g, txns.clone());
        let b = Block::new(4, &g, txns);

        assert_eq!(a.hash, b.hash);
        assert_eq!(
            a.hash,
            Block::compute_hash(a.created_at, &a.transactions, a.parent)
        );

        let c = Block::new(5, &g, vec![Transaction::coinbase(4, 1.into())]);
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn depth_follows_parent() {
        let g = genesis();
        assert!(g.is_genesis());
        assert_eq!(g.depth, 0);

        let b1 = Block::new(1, &g, vec![Transaction::coinbase(1, 0.into())]);
        let b2 = Block::new(2, &b1, vec![Transaction::coinbase(2, 0.into())]);
        assert_eq!(b1.depth, 1);
        assert_eq!(b2.depth, 2);
        assert_eq!(b2.parent, Some(b1.hash));
        assert_eq!(b2.miner(), Some(0.into()));
    }

    #[test]
    fn arena_walks_ancestors() {
        let mut arena = BlockArena::new();
        let g = genesis();
        let b1 = Block::new(1, &g, vec![Transaction::coinbase(1, 2.into())]);
        let b2 = Block::new(2, &b1, vec![Transaction::coinbase(2, 2.into())]);
        let (gh, h1, h2) = (g.hash, b1.hash, b2.hash);

        arena.insert(g);
        arena.insert(b1);
        arena.insert(b2.clone());
        assert_eq!(arena.insert(b2), h2);
        assert_eq!(arena.len(), 3);

        assert_eq!(arena.ancestors_of(h2), vec![gh, h1, h2]);
        let depths: Vec<_> = arena.chain(h2).map(|b| b.depth).collect();
        assert_eq!(depths, vec![2, 1, 0]);
    }
}
