//! Building and running discrete-event simulations of a mining network

use std::num::NonZeroUsize;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{info, trace};

use crate::{
    attacker::Attacker,
    block::{Block, BlockArena, BlockHash},
    event::{Event, EventKind, EventQueue, Time},
    network::{sample_exponential, Topology},
    node::{Context, Node, Params},
    peer::{Peer, PeerId},
    power_dist::PowerValue,
};

pub mod builder;
pub mod output;

pub use builder::{Edge, SimulationBuildError, SimulationBuilder};
pub use output::{NodeSnapshot, SimulationOutput};

/// Validated settings shared by every run in a [`SimulationGroup`].
#[derive(Debug, Clone)]
pub(crate) struct SimulationConfig {
    pub power_values: Vec<PowerValue>,
    /// The first `num_attackers` peers follow the selfish protocol.
    pub num_attackers: usize,
    pub topology: Topology,
    pub params: Params,
    pub initial_balance: u64,
    pub max_events: NonZeroUsize,
}

/// Container for a group of simulations which run on the same network with
/// different seeds. Created by [`SimulationBuilder::build`].
#[derive(Debug, Clone)]
pub struct SimulationGroup {
    config: SimulationConfig,
    seed: u64,
    repeat_all: NonZeroUsize,
}

impl SimulationGroup {
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    /// Number of runs in this group.
    #[inline]
    pub fn num_runs(&self) -> usize {
        self.repeat_all.get()
    }

    /// Creates each run of the group without executing it. Run `i` is seeded
    /// with `seed + i`.
    pub fn simulations(&self) -> impl Iterator<Item = Simulation> + '_ {
        (0..self.repeat_all.get()).map(|i| {
            Simulation::new(&self.config, self.seed.wrapping_add(i as u64))
        })
    }

    /// Executes every run of the group, in parallel when the `rayon` feature
    /// is enabled. Outputs are returned in seed order.
    pub fn run_all(self) -> Vec<SimulationOutput> {
        let sims: Vec<_> = self.simulations().collect();

        #[cfg(feature = "rayon")]
        let outputs = sims.into_par_iter().map(Simulation::run).collect();
        #[cfg(not(feature = "rayon"))]
        let outputs = sims.into_iter().map(Simulation::run).collect();

        outputs
    }
}

/// A single seeded run of the network.
///
/// # Details
/// The queue starts with one genesis event at time 0. Events are executed in
/// timestamp order until `max_events` of them have run or the queue is empty.
/// Cancelled events are dropped without counting towards the budget.
#[derive(Debug)]
pub struct Simulation {
    nodes: Vec<Node>,
    arena: BlockArena,
    queue: EventQueue,
    rng: ChaCha8Rng,
    params: Params,
    initial_balance: u64,
    max_events: usize,
    seed: u64,
    events_executed: usize,
    now: Time,
    genesis: Option<BlockHash>,
}

impl Simulation {
    pub(crate) fn new(config: &SimulationConfig, seed: u64) -> Self {
        let links = config.topology.clone().into_links();
        let nodes = config
            .power_values
            .iter()
            .zip(links)
            .enumerate()
            .map(|(i, (&power, links))| {
                let peer = Peer::new(i.into(), power, links);
                if i < config.num_attackers {
                    Node::Selfish(Attacker::new(peer))
                } else {
                    Node::Honest(peer)
                }
            })
            .collect();

        let mut queue = EventQueue::new();
        queue.schedule(0, None, None, EventKind::Genesis);

        Simulation {
            nodes,
            arena: BlockArena::new(),
            queue,
            rng: ChaCha8Rng::seed_from_u64(seed),
            params: config.params,
            initial_balance: config.initial_balance,
            max_events: config.max_events.get(),
            seed,
            events_executed: 0,
            now: 0,
            genesis: None,
        }
    }

    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[inline]
    pub fn node(&self, peer: PeerId) -> &Node {
        &self.nodes[peer.get()]
    }

    #[inline]
    pub fn arena(&self) -> &BlockArena {
        &self.arena
    }

    /// Timestamp of the most recently executed event.
    #[inline]
    pub fn now(&self) -> Time {
        self.now
    }

    #[inline]
    pub fn events_executed(&self) -> usize {
        self.events_executed
    }

    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Hash of the genesis block, once the genesis event has run.
    #[inline]
    pub fn genesis(&self) -> Option<BlockHash> {
        self.genesis
    }

    /// Returns true if the event budget has been used up.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.events_executed >= self.max_events
    }

    /// Executes the next event and returns it. Returns `None` once the
    /// budget is used up or no events remain.
    pub fn step(&mut self) -> Option<Event> {
        if self.is_finished() {
            return None;
        }

        let event = self.queue.pop()?;
        debug_assert!(
            event.timestamp >= self.now,
            "event scheduled in the past"
        );
        self.now = event.timestamp;
        self.events_executed += 1;
        trace!(
            id = event.id.get(),
            time = event.timestamp,
            peer = ?event.executed_by,
            kind = ?event.kind,
            "executing event"
        );

        match (&event.kind, event.executed_by) {
            (EventKind::Genesis, _) => self.run_genesis(event.timestamp),
            (_, Some(peer)) => self.dispatch(peer, &event),
            (_, None) => {
                unreachable!("event {:?} has no target peer", event.id)
            }
        }

        Some(event)
    }

    /// Executes events until the budget is used up or no events remain.
    pub fn run(mut self) -> SimulationOutput {
        info!(
            seed = self.seed,
            peers = self.nodes.len(),
            attackers = self.nodes.iter().filter(|n| n.is_selfish()).count(),
            max_events = self.max_events,
            "starting simulation"
        );

        while self.step().is_some() {}

        info!(
            seed = self.seed,
            events = self.events_executed,
            final_time = self.now,
            blocks = self.arena.len(),
            "simulation finished"
        );

        self.into_output()
    }

    /// Creates the genesis block, gives it to every peer, then starts each
    /// peer's transaction and mining loops.
    fn run_genesis(&mut self, now: Time) {
        let block = Block::genesis(
            self.nodes.iter().map(Node::id),
            self.initial_balance,
        );
        for node in self.nodes.iter_mut() {
            node.peer_mut().init_genesis(&block);
        }
        self.genesis = Some(self.arena.insert(block));

        for i in 0..self.nodes.len() {
            let peer = PeerId::from(i);
            let mean = self.params.mean_txn_interval;
            let delay = sample_exponential(mean, &mut self.rng);
            self.queue.schedule(
                now.saturating_add(delay.ceil() as Time),
                None,
                Some(peer),
                EventKind::CreateTransaction,
            );
            self.queue
                .schedule(now, None, Some(peer), EventKind::CreateBlock);
        }
    }

    fn dispatch(&mut self, peer: PeerId, event: &Event) {
        let node = &mut self.nodes[peer.get()];
        let mut ctx = Context {
            arena: &mut self.arena,
            rng: &mut self.rng,
            params: &self.params,
        };
        let outcome = node.handle(event, &mut ctx);

        for id in outcome.cancel {
            self.queue.cancel(id);
        }
        for pending in outcome.schedule {
            self.queue.schedule(
                pending.timestamp,
                Some(peer),
                Some(pending.executed_by),
                pending.kind,
            );
        }
        if let Some(mining) = outcome.mining {
            let id = self.queue.schedule(
                mining.timestamp,
                Some(peer),
                Some(mining.executed_by),
                mining.kind,
            );
            node.peer_mut().track_mining(id);
        }
    }

    fn into_output(self) -> SimulationOutput {
        SimulationOutput {
            seed: self.seed,
            events_executed: self.events_executed,
            final_time: self.now,
            genesis: self.genesis,
            nodes: self.nodes.iter().map(NodeSnapshot::from).collect(),
            arena: self.arena,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SimulationBuilder, SimulationGroup};
    use crate::{
        event::EventKind, ledger::Ledger, peer::PeerId,
        transaction::BLOCK_REWARD,
    };

    fn group(
        attackers: &[f64],
        honest: usize,
        events: usize,
    ) -> SimulationGroup {
        let mut builder = SimulationBuilder::new()
            .with_honest_peers(honest)
            .with_block_interval(2_000.0)
            .with_transaction_interval(200.0)
            .with_max_events(events)
            .with_seed(42);
        for &power in attackers {
            builder = builder.add_attacker(power);
        }

        builder.build().expect("valid simulation build")
    }

    #[test]
    fn genesis_runs_first() {
        let mut sim = group(&[], 3, 100).simulations().next().unwrap();
        assert!(sim.genesis().is_none());

        let event = sim.step().unwrap();
        assert_eq!(event.kind, EventKind::Genesis);
        assert_eq!(event.timestamp, 0);

        let genesis = sim.genesis().unwrap();
        for node in sim.nodes() {
            assert_eq!(node.peer().tree().len(), 1);
            assert!(node.peer().leaves().contains(&genesis));
        }
    }

    #[test]
    fn same_seed_same_run() {
        let group = group(&[0.3], 4, 5_000);
        let mut sims = group.simulations();
        let a = sims.next().unwrap().run();

        let b = group.simulations().next().unwrap().run();
        assert_eq!(a.events_executed, b.events_executed);
        assert_eq!(a.final_time, b.final_time);
        assert_eq!(a.nodes, b.nodes);
        assert_eq!(a.arena.len(), b.arena.len());
    }

    #[test]
    fn cancelled_events_do_not_use_budget() {
        let budget = 12;
        let mut sim = group(&[], 2, budget).simulations().next().unwrap();
        assert_eq!(sim.step().unwrap().kind, EventKind::Genesis);

        // Queued behind the genesis follow-ups at time 0, then cancelled.
        let cancelled: Vec<_> = (0..5)
            .map(|i| {
                let id = sim.queue.schedule(
                    0,
                    None,
                    Some(PeerId::from(i % 2)),
                    EventKind::CreateTransaction,
                );
                sim.queue.cancel(id);
                id
            })
            .collect();

        let mut executed = vec![];
        while let Some(event) = sim.step() {
            assert!(!cancelled.contains(&event.id));
            executed.push(event);
        }

        // Genesis plus every event returned by `step`.
        assert_eq!(executed.len() + 1, budget);
        assert_eq!(sim.events_executed(), budget);
        assert!(sim.is_finished());

        let newest_cancelled = *cancelled.iter().max().unwrap();
        assert!(executed.iter().any(|e| e.id > newest_cancelled));
        assert!(executed.last().unwrap().timestamp > 0);
    }

    #[test]
    fn honest_chains_keep_ledger_invariants() {
        let honest = 5;
        let output =
            group(&[], honest, 20_000).simulations().next().unwrap().run();

        for node in &output.nodes {
            for leaf in &node.leaves {
                let ledger = Ledger::replay(&output.arena, *leaf);
                let depth = output.arena[leaf].depth as i64;

                assert!(ledger.balances().all(|(_, balance)| balance >= 0));
                assert_eq!(ledger.issuer_balance(), -(honest as i64) * 1000);
                assert_eq!(
                    ledger.total_peer_balance(),
                    honest as i64 * 1000 + depth * BLOCK_REWARD as i64
                );
            }
        }

        let chain = output.longest_chain(PeerId::from(0));
        assert_eq!(chain.first(), output.genesis.as_ref());
        assert!(chain.len() > 1);
    }

    #[test]
    fn selfish_run_end_to_end() {
        let output =
            group(&[0.45], 4, 30_000).simulations().next().unwrap().run();

        let attacker = &output.nodes[0];
        assert_eq!(attacker.strategy, "Selfish");
        assert!(attacker.private_chain.is_some());
        assert!(attacker.successful_blocks > 0);
        assert!(output.nodes[1..].iter().all(|n| n.private_chain.is_none()));

        let observer = PeerId::from(1);
        let total: f64 = (0..5)
            .map(|m| output.revenue(observer, PeerId::from(m)))
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn run_all_uses_consecutive_seeds() {
        let outputs = SimulationBuilder::new()
            .with_honest_peers(3)
            .with_max_events(500)
            .with_seed(10)
            .repeat_all(3)
            .build()
            .unwrap()
            .run_all();

        let seeds: Vec<_> = outputs.iter().map(|o| o.seed).collect();
        assert_eq!(seeds, vec![10, 11, 12]);
    }
}
