//! Selfish mining on top of the honest peer primitives.
//!
//! Follows the withholding strategy described by
//! [Eyal and Sirer](https://doi.org/10.48550/arXiv.1311.0243): blocks found
//! while ahead of the public chain are kept private and released only as the
//! honest network catches up.

use std::collections::VecDeque;

use rand::Rng;
use tracing::debug;

use crate::{
    block::{BlockArena, BlockHash},
    event::Time,
    peer::{BlockRejection, MiningStatus, Peer},
};

/// Position of a selfish miner relative to the public chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfishState {
    /// No private blocks; mining on the public longest chain.
    Idle,
    /// `n` mined blocks are being withheld.
    Leading(usize),
    /// A single private block was just released to tie the public tip, and
    /// the attacker keeps mining on it.
    Racing,
}

/// How a selfish miner responds to a block received from the network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reaction {
    /// Private blocks released to the network, oldest first.
    pub released: Vec<BlockHash>,
    /// True if the current mining attempt no longer builds on the chain the
    /// attacker wants to extend and must be restarted.
    pub restart_mining: bool,
}

/// A selfish miner. Holds a public view of the chain, exactly like a
/// [`Peer`], plus a private chain of withheld blocks.
#[derive(Debug, Clone)]
pub struct Attacker {
    peer: Peer,
    private_chain: VecDeque<(Time, BlockHash)>,
    /// Tip of the attacker's own chain, public or private.
    last_block: Option<BlockHash>,
    racing: bool,
}

impl Attacker {
    pub fn new(peer: Peer) -> Self {
        Attacker {
            peer,
            private_chain: VecDeque::new(),
            last_block: None,
            racing: false,
        }
    }

    /// The public view and shared peer state.
    #[inline]
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    #[inline]
    pub fn peer_mut(&mut self) -> &mut Peer {
        &mut self.peer
    }

    /// Withheld blocks, oldest first, with the time each was mined.
    #[inline]
    pub fn private_chain(&self) -> &VecDeque<(Time, BlockHash)> {
        &self.private_chain
    }

    #[inline]
    pub fn last_block(&self) -> Option<BlockHash> {
        self.last_block
    }

    pub fn state(&self) -> SelfishState {
        if self.racing {
            SelfishState::Racing
        } else if self.private_chain.is_empty() {
            SelfishState::Idle
        } else {
            SelfishState::Leading(self.private_chain.len())
        }
    }

    /// Starts mining. While racing or leading, the new block extends the
    /// attacker's own tip; otherwise it extends the public longest chain.
    pub fn create_block<R: Rng + ?Sized>(
        &mut self,
        arena: &mut BlockArena,
        now: Time,
        rng: &mut R,
    ) -> BlockHash {
        let parent = match self.state() {
            SelfishState::Idle => {
                let tip = self.peer.choose_longest_chain(rng);
                self.last_block = Some(tip);
                tip
            }
            SelfishState::Leading(_) | SelfishState::Racing => self
                .last_block
                .expect("a leading or racing attacker has a tip"),
        };

        self.peer.assemble_block(arena, parent, now, rng)
    }

    /// Handles the end of a mining attempt. Returns the blocks which become
    /// public as a result (only when racing), or a rejection if the public
    /// chain overtook the block's parent while it was being mined.
    pub fn finished_block(
        &mut self,
        arena: &BlockArena,
        hash: BlockHash,
        now: Time,
    ) -> Result<Vec<BlockHash>, BlockRejection> {
        let block = &arena[&hash];
        let parent_depth = block
            .depth
            .checked_sub(1)
            .ok_or(BlockRejection::NoParentGiven)?;

        // Free to mine again regardless of the outcome.
        self.peer.abandon_mining();

        let max_depth = self.peer.max_leaf_depth();
        if max_depth > parent_depth {
            debug!(
                attacker = %self.peer.id(),
                block = %hash.short(),
                max_depth,
                "private lead overtaken, abandoning"
            );
            self.reset();
            return Err(BlockRejection::StaleParent(max_depth));
        }

        self.peer.record_success();
        if self.racing {
            self.peer.insert_block(block, now);
            self.reset();
            debug!(
                attacker = %self.peer.id(),
                block = %hash.short(),
                "won race, publishing"
            );

            Ok(vec![hash])
        } else {
            self.private_chain.push_back((now, hash));
            self.last_block = Some(hash);
            debug!(
                attacker = %self.peer.id(),
                block = %hash.short(),
                lead = self.private_chain.len(),
                "withholding block"
            );

            Ok(vec![])
        }
    }

    /// Reacts to a block of depth `depth` which has just been accepted into
    /// the public view.
    pub fn on_public_block(
        &mut self,
        arena: &BlockArena,
        depth: u64,
        now: Time,
    ) -> Reaction {
        let state = self.state();
        if state == SelfishState::Idle {
            return Reaction {
                released: vec![],
                restart_mining: self.peer.should_abandon_mining(depth),
            };
        }

        let last = arena[&self
            .last_block
            .expect("a leading or racing attacker has a tip")]
            .depth;

        if depth > last {
            // The honest chain is strictly ahead; give up and adopt it.
            let released = self.release_all(arena, now);
            self.reset();
            debug!(attacker = %self.peer.id(), depth, "adopting public chain");

            return Reaction { released, restart_mining: true };
        }

        let SelfishState::Leading(_) = state else {
            return Reaction::default();
        };

        let (_, front) = self.private_chain[0];
        let start = arena[&front].depth - 1;
        if depth <= start {
            return Reaction::default();
        }

        let released = match last - depth {
            0 => {
                let released = self.release_all(arena, now);
                self.racing = true;
                debug!(attacker = %self.peer.id(), depth, "racing");
                released
            }
            1 => {
                let released = self.release_all(arena, now);
                debug!(
                    attacker = %self.peer.id(),
                    depth,
                    "lead down to one, releasing private chain"
                );
                released
            }
            _ => {
                let (_, hash) = self
                    .private_chain
                    .pop_front()
                    .expect("private chain is not empty");
                self.peer.insert_block(&arena[&hash], now);
                debug!(
                    attacker = %self.peer.id(),
                    depth,
                    lead = self.private_chain.len(),
                    "releasing oldest private block"
                );
                vec![hash]
            }
        };

        Reaction { released, restart_mining: false }
    }

    /// Moves the whole private chain into the public view.
    fn release_all(&mut self, arena: &BlockArena, now: Time) -> Vec<BlockHash> {
        self.private_chain
            .drain(..)
            .map(|(_, hash)| {
                self.peer.insert_block(&arena[&hash], now);
                hash
            })
            .collect()
    }

    fn reset(&mut self) {
        self.private_chain.clear();
        self.last_block = None;
        self.racing = false;
    }

    /// True iff the attacker is in the middle of a mining attempt.
    #[inline]
    pub fn is_mining(&self) -> bool {
        matches!(self.peer.status(), MiningStatus::Mining { .. })
    }
}
