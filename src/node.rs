//! Per-event dispatch to honest and selfish peers

use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::{
    attacker::{Attacker, SelfishState},
    block::{BlockArena, BlockHash},
    event::{Event, EventId, EventKind, PendingEvent, Time},
    network::{sample_exponential, TRANSACTION_SIZE_KB},
    peer::{BlockRejection, MiningStatus, Peer, PeerId},
};

/// A peer together with the protocol it follows.
#[derive(Debug, Clone)]
pub enum Node {
    Honest(Peer),
    Selfish(Attacker),
}

/// Parameters shared by every node during a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Params {
    pub num_peers: usize,
    pub mean_block_interval: f64,
    pub mean_txn_interval: f64,
}

/// Mutable simulation state a node may touch while handling an event.
pub(crate) struct Context<'a> {
    pub arena: &'a mut BlockArena,
    pub rng: &'a mut ChaCha8Rng,
    pub params: &'a Params,
}

/// Everything a handled event asks of the scheduler.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub schedule: Vec<PendingEvent>,
    pub cancel: Vec<EventId>,
    /// Completion of a newly started mining attempt. Its id must be handed
    /// back to the node through [`Peer::track_mining`].
    pub mining: Option<PendingEvent>,
}

impl Node {
    #[inline]
    pub fn peer(&self) -> &Peer {
        match self {
            Node::Honest(peer) => peer,
            Node::Selfish(attacker) => attacker.peer(),
        }
    }

    #[inline]
    pub fn peer_mut(&mut self) -> &mut Peer {
        match self {
            Node::Honest(peer) => peer,
            Node::Selfish(attacker) => attacker.peer_mut(),
        }
    }

    #[inline]
    pub fn id(&self) -> PeerId {
        self.peer().id()
    }

    #[inline]
    pub fn is_selfish(&self) -> bool {
        matches!(self, Node::Selfish(_))
    }

    /// Name of the strategy followed by this node.
    pub fn name(&self) -> String {
        match self {
            Node::Honest(_) => "Honest".into(),
            Node::Selfish(_) => "Selfish".into(),
        }
    }

    /// Runs `event` against this node.
    ///
    /// ## Panics
    /// Panics if the event is a genesis event, or if a completion event is
    /// routed to a node following the other protocol.
    pub(crate) fn handle(
        &mut self,
        event: &Event,
        ctx: &mut Context,
    ) -> Outcome {
        let now = event.timestamp;
        let mut outcome = Outcome::default();

        match &event.kind {
            EventKind::Genesis => {
                unreachable!("genesis events are handled by the simulation")
            }
            EventKind::CreateTransaction => {
                self.create_transaction(now, ctx, &mut outcome)
            }
            EventKind::ReceiveTransaction(txn) => {
                if self.peer_mut().receive_transaction(txn.clone()) {
                    outcome.schedule.extend(self.peer().send_to_neighbours(
                        &event.kind,
                        TRANSACTION_SIZE_KB,
                        now,
                        event.created_by,
                        ctx.rng,
                    ));
                } else {
                    trace!(
                        peer = %self.id(),
                        txn = %txn.id.short(),
                        "transaction already heard"
                    );
                }
            }
            EventKind::CreateBlock => self.create_block(now, ctx, &mut outcome),
            EventKind::BroadcastBlock(hash) => {
                let id = self.id();
                let result = match self {
                    Node::Honest(peer) => peer
                        .broadcast_block(ctx.arena, *hash, now)
                        .map(|()| vec![*hash]),
                    Node::Selfish(_) => {
                        panic!("broadcast event routed to selfish peer {}", id)
                    }
                };
                self.finish_mining(result, *hash, now, ctx, &mut outcome);
            }
            EventKind::FinishedBlock(hash) => {
                let id = self.id();
                let result = match self {
                    Node::Selfish(attacker) => {
                        attacker.finished_block(ctx.arena, *hash, now)
                    }
                    Node::Honest(_) => {
                        panic!("finished event routed to honest peer {}", id)
                    }
                };
                self.finish_mining(result, *hash, now, ctx, &mut outcome);
            }
            EventKind::ReceiveBlock(hash) => {
                if self.peer_mut().mark_block_seen(*hash) {
                    let from = event.created_by;
                    self.receive_block(*hash, now, from, ctx, &mut outcome);
                } else {
                    trace!(
                        peer = %self.id(),
                        block = %hash.short(),
                        "block already heard"
                    );
                }
            }
        }

        outcome
    }

    /// Publishes whatever a completed mining attempt released, then starts
    /// the next attempt.
    fn finish_mining(
        &mut self,
        result: Result<Vec<BlockHash>, BlockRejection>,
        hash: BlockHash,
        now: Time,
        ctx: &mut Context,
        outcome: &mut Outcome,
    ) {
        match result {
            Ok(released) => {
                trace!(peer = %self.id(), block = %hash.short(), "mined block");
                let announced = self.announce(&released, now, None, ctx);
                outcome.schedule.extend(announced);
            }
            Err(err) => {
                debug!(
                    peer = %self.id(),
                    block = %hash.short(),
                    %err,
                    "dropping mined block"
                );
            }
        }
        outcome.schedule.push(self.mine_now(now));
    }

    fn create_transaction(
        &mut self,
        now: Time,
        ctx: &mut Context,
        outcome: &mut Outcome,
    ) {
        let params = ctx.params;
        let txn =
            self.peer_mut()
                .create_transaction(params.num_peers, now, ctx.rng);
        trace!(
            peer = %self.id(),
            txn = %txn.id.short(),
            amount = txn.amount,
            "created transaction"
        );

        outcome.schedule.extend(self.peer().send_to_neighbours(
            &EventKind::ReceiveTransaction(txn),
            TRANSACTION_SIZE_KB,
            now,
            None,
            ctx.rng,
        ));

        let delay = sample_exponential(params.mean_txn_interval, ctx.rng);
        outcome.schedule.push(PendingEvent::new(
            now.saturating_add(delay.ceil() as Time),
            self.id(),
            EventKind::CreateTransaction,
        ));
    }

    fn create_block(
        &mut self,
        now: Time,
        ctx: &mut Context,
        outcome: &mut Outcome,
    ) {
        let hash_power = self.peer().hash_power();
        if hash_power <= 0.0 {
            return;
        }
        if let MiningStatus::Mining { .. } = self.peer().status() {
            trace!(peer = %self.id(), "already mining");
            return;
        }

        let (hash, kind) = match self {
            Node::Honest(peer) => {
                let hash = peer.create_block(ctx.arena, now, ctx.rng);
                (hash, EventKind::BroadcastBlock(hash))
            }
            Node::Selfish(attacker) => {
                let hash = attacker.create_block(ctx.arena, now, ctx.rng);
                (hash, EventKind::FinishedBlock(hash))
            }
        };

        let mean = ctx.params.mean_block_interval / hash_power;
        let delay = sample_exponential(mean, ctx.rng).ceil() as Time;
        let done_at = now.saturating_add(delay);
        trace!(
            peer = %self.id(),
            block = %hash.short(),
            depth = ctx.arena[&hash].depth,
            done_at,
            "started mining"
        );

        outcome.mining = Some(PendingEvent::new(done_at, self.id(), kind));
    }

    fn receive_block(
        &mut self,
        hash: BlockHash,
        now: Time,
        from: Option<PeerId>,
        ctx: &mut Context,
        outcome: &mut Outcome,
    ) {
        let mut pending = vec![(hash, from)];
        while let Some((hash, from)) = pending.pop() {
            match self.peer_mut().validate_block(ctx.arena, now, hash) {
                Ok(()) => (),
                Err(BlockRejection::ParentUnknown(parent)) => {
                    trace!(
                        peer = %self.id(),
                        block = %hash.short(),
                        "buffering orphan"
                    );
                    self.peer_mut().buffer_orphan(parent, hash);
                    continue;
                }
                Err(err) => {
                    debug!(
                        peer = %self.id(),
                        block = %hash.short(),
                        %err,
                        "rejected block"
                    );
                    continue;
                }
            }

            let block = &ctx.arena[&hash];
            let (depth, size_kb) = (block.depth, block.size_kb());
            outcome.schedule.extend(self.peer().send_to_neighbours(
                &EventKind::ReceiveBlock(hash),
                size_kb,
                now,
                from,
                ctx.rng,
            ));

            let (restart, released) = match self {
                Node::Honest(peer) => {
                    (peer.should_abandon_mining(depth), vec![])
                }
                Node::Selfish(attacker) => {
                    let before = attacker.state();
                    let reaction =
                        attacker.on_public_block(ctx.arena, depth, now);
                    let released = reaction.released.len();
                    if before != SelfishState::Idle || released > 0 {
                        debug!(
                            peer = %attacker.peer().id(),
                            depth,
                            ?before,
                            after = ?attacker.state(),
                            released,
                            "selfish transition"
                        );
                    }
                    (reaction.restart_mining, reaction.released)
                }
            };
            outcome.schedule.extend(self.announce(&released, now, None, ctx));

            if restart {
                if let Some(stale) = self.peer_mut().abandon_mining() {
                    outcome.cancel.push(stale);
                }
                outcome.schedule.push(self.mine_now(now));
            }

            for child in self.peer_mut().take_orphans(&hash) {
                pending.push((child, None));
            }
        }
    }

    /// Sends each of `blocks` to every neighbour, in order.
    fn announce(
        &self,
        blocks: &[BlockHash],
        now: Time,
        except: Option<PeerId>,
        ctx: &mut Context,
    ) -> Vec<PendingEvent> {
        blocks
            .iter()
            .flat_map(|hash| {
                self.peer().send_to_neighbours(
                    &EventKind::ReceiveBlock(*hash),
                    ctx.arena[hash].size_kb(),
                    now,
                    except,
                    ctx.rng,
                )
            })
            .collect()
    }

    fn mine_now(&self, now: Time) -> PendingEvent {
        PendingEvent::new(now, self.id(), EventKind::CreateBlock)
    }
}
