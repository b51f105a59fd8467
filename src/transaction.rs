//! Payments and coinbase rewards

use crate::{
    event::Time,
    hash::{Hash, HashBuilder},
    peer::PeerId,
};

/// Identifier of a [`Transaction`].
pub type TxnId = Hash;

/// Reward paid by the coinbase transaction of every mined block.
pub const BLOCK_REWARD: u64 = 50;

/// Who pays for a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    /// Newly minted coins paid to the miner of a block.
    Coinbase,
    /// Initial allocation made by the genesis block. The issuer is not a real
    /// account and its balance is allowed to go negative.
    GenesisIssuer,
    /// A regular payment from a peer.
    Peer(PeerId),
}

/// An immutable transfer of coins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: TxnId,
    pub created_at: Time,
    pub sender: Sender,
    pub recipient: PeerId,
    pub amount: u64,
}

impl Transaction {
    /// Creates a transaction. `nonce` distinguishes otherwise identical
    /// payments made by the same sender at the same time.
    pub fn new(
        created_at: Time,
        sender: Sender,
        recipient: PeerId,
        amount: u64,
        nonce: u64,
    ) -> Self {
        assert!(amount > 0, "transaction amount must be positive");

        let builder = HashBuilder::new().u64(created_at);
        let builder = match sender {
            Sender::Coinbase => builder.none(),
            Sender::GenesisIssuer => builder.none().none(),
            Sender::Peer(peer) => builder.u64(peer.get() as u64),
        };
        let id = builder
            .u64(recipient.get() as u64)
            .u64(amount)
            .u64(nonce)
            .finish();

        Transaction { id, created_at, sender, recipient, amount }
    }

    /// Creates the coinbase transaction paying [`BLOCK_REWARD`] to `miner`.
    pub fn coinbase(created_at: Time, miner: PeerId) -> Self {
        Self::new(created_at, Sender::Coinbase, miner, BLOCK_REWARD, 0)
    }

    /// Creates a genesis allocation of `amount` coins to `recipient`.
    pub fn genesis_grant(recipient: PeerId, amount: u64) -> Self {
        Self::new(0, Sender::GenesisIssuer, recipient, amount, 0)
    }

    #[inline]
    pub fn is_coinbase(&self) -> bool {
        self.sender == Sender::Coinbase
    }
}

#[cfg(test)]
mod tests {
    use super::{Sender, Transaction, BLOCK_REWARD};

    #[test]
    fn coinbase_pays_fixed_reward() {
        let txn = Transaction::coinbase(10, 3.into());
        assert!(txn.is_coinbase());
        assert_eq!(txn.amount, BLOCK_REWARD);
        assert_eq!(txn.sender, Sender::Coinbase);
    }

    #[test]
    fn nonce_separates_identical_payments() {
        let a = Transaction::new(5, Sender::Peer(0.into()), 1.into(), 3, 0);
        let b = Transaction::new(5, Sender::Peer(0.into()), 1.into(), 3, 1);
        let c = Transaction::new(5, Sender::Peer(0.into()), 1.into(), 3, 0);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id, c.id);
    }
}
