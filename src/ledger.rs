//! Account balances reconstructed from a chain of blocks

use std::collections::{HashMap, HashSet};

use crate::{
    block::{BlockArena, BlockHash},
    peer::PeerId,
    transaction::{Sender, Transaction, TxnId},
};

/// Balances and included transactions along one chain, as seen from its tip.
///
/// Balances of the genesis issuer are tracked separately from peer balances,
/// since the issuer is allowed to go negative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    balances: HashMap<PeerId, i64>,
    issuer_balance: i64,
    included: HashSet<TxnId>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks from `tip` back to the genesis block and accumulates the effect
    /// of every transaction on the way. Blocks on the chain are assumed to
    /// have been validated already.
    ///
    /// ## Panics
    /// Panics if `tip` or one of its ancestors is not in `arena`.
    pub fn replay(arena: &BlockArena, tip: BlockHash) -> Self {
        let mut ledger = Ledger::new();
        for block in arena.chain(tip) {
            for txn in &block.transactions {
                ledger.credit(txn.recipient, txn.amount);
                if !txn.is_coinbase() {
                    ledger.debit(txn.sender, txn.amount);
                    ledger.included.insert(txn.id);
                }
            }
        }

        ledger
    }

    /// Applies a non-coinbase `txn` on top of this ledger. Returns `false`,
    /// leaving the ledger untouched, if the sender cannot cover the amount.
    /// Spends by the genesis issuer always succeed.
    ///
    /// Transactions applied one after another are checked against the running
    /// balances, so two payments spending the same coins cannot both succeed.
    pub fn apply(&mut self, txn: &Transaction) -> bool {
        debug_assert!(!txn.is_coinbase(), "coinbase applied as a payment");

        let amount = txn.amount as i64;
        if let Sender::Peer(sender) = txn.sender {
            if self.balance(sender) < amount {
                return false;
            }
        }

        self.debit(txn.sender, txn.amount);
        self.credit(txn.recipient, txn.amount);
        self.included.insert(txn.id);

        true
    }

    /// Returns the balance of `peer`. Peers never seen on the chain hold 0.
    #[inline]
    pub fn balance(&self, peer: PeerId) -> i64 {
        self.balances.get(&peer).copied().unwrap_or(0)
    }

    #[inline]
    pub fn issuer_balance(&self) -> i64 {
        self.issuer_balance
    }

    /// Iterates over every peer seen on the chain with its balance.
    pub fn balances(&self) -> impl Iterator<Item = (PeerId, i64)> + '_ {
        self.balances.iter().map(|(&peer, &balance)| (peer, balance))
    }

    /// Sum of all peer balances, not counting the genesis issuer.
    pub fn total_peer_balance(&self) -> i64 {
        self.balances.values().sum()
    }

    /// Returns true iff a non-coinbase transaction with id `id` is included
    /// in the chain.
    #[inline]
    pub fn contains(&self, id: &TxnId) -> bool {
        self.included.contains(id)
    }

    /// Number of non-coinbase transactions included in the chain.
    #[inline]
    pub fn included_len(&self) -> usize {
        self.included.len()
    }

    fn credit(&mut self, peer: PeerId, amount: u64) {
        *self.balances.entry(peer).or_default() += amount as i64;
    }

    fn debit(&mut self, sender: Sender, amount: u64) {
        match sender {
            Sender::Coinbase => (),
            Sender::GenesisIssuer => self.issuer_balance -= amount as i64,
            Sender::Peer(peer) => {
                *self.balances.entry(peer).or_default() -= amount as i64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Ledger;
    use crate::{
        block::{Block, BlockArena},
        peer::PeerId,
        transaction::{Sender, Transaction, BLOCK_REWARD},
    };

    fn pay(from: usize, to: usize, amount: u64, nonce: u64) -> Transaction {
        Transaction::new(1, Sender::Peer(from.into()), to.into(), amount, nonce)
    }

    #[test]
    fn replay_counts_grants_and_rewards() {
        let mut arena = BlockArena::new();
        let g = Block::genesis((0..2).map(PeerId::from), 1000);
        let b1 = Block::new(
            5,
            &g,
            vec![Transaction::coinbase(5, 0.into()), pay(0, 1, 10, 0)],
        );
        arena.insert(g);
        let tip = arena.insert(b1);

        let ledger = Ledger::replay(&arena, tip);
        assert_eq!(ledger.balance(0.into()), 1000 + BLOCK_REWARD as i64 - 10);
        assert_eq!(ledger.balance(1.into()), 1010);
        assert_eq!(ledger.issuer_balance(), -2000);
        assert_eq!(
            ledger.total_peer_balance(),
            2000 + BLOCK_REWARD as i64
        );
        // Two genesis grants and one payment.
        assert_eq!(ledger.included_len(), 3);
    }

    #[test]
    fn sequential_apply_prevents_double_spend() {
        let mut arena = BlockArena::new();
        let tip = arena.insert(Block::genesis([PeerId::from(0)], 10));
        let mut ledger = Ledger::replay(&arena, tip);

        assert!(ledger.apply(&pay(0, 1, 8, 0)));
        assert!(!ledger.apply(&pay(0, 2, 8, 1)));
        assert_eq!(ledger.balance(0.into()), 2);
        assert_eq!(ledger.balance(2.into()), 0);
    }

    #[test]
    fn issuer_may_go_negative() {
        let mut ledger = Ledger::new();
        let grant = Transaction::genesis_grant(4.into(), 500);
        assert!(ledger.apply(&grant));
        assert_eq!(ledger.issuer_balance(), -500);
        assert_eq!(ledger.balance(4.into()), 500);
        assert!(ledger.contains(&grant.id));
    }
}
