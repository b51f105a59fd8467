use std::num::NonZeroUsize;

use crate::{
    network::{Topology, TopologyError},
    node::Params,
    power_dist::{PowerDistribution, PowerDistributionError, PowerValue},
};

use super::{SimulationConfig, SimulationGroup};

/// An undirected link `(a, b, propagation_delay, link_speed)`.
pub type Edge = (usize, usize, f64, f64);

/// Builds a [SimulationGroup].
#[derive(Debug, Default)]
pub struct SimulationBuilder {
    honest_peers: usize,
    attackers: Vec<PowerValue>,
    power_dist: Option<PowerDistribution>,
    topology: Option<Topology>,
    edges: Option<Vec<Edge>>,
    mean_block_interval: Option<f64>,
    mean_txn_interval: Option<f64>,
    initial_balance: Option<u64>,
    max_events: Option<usize>,
    seed: Option<u64>,
    repeat_all: Option<usize>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SimulationBuildError {
    #[error("a simulation needs at least 2 peers, {0} given")]
    TooFewPeers(usize),
    #[error("event budget must be greater than 0")]
    ZeroMaxEvents,
    #[error("cannot repeat a simulation 0 times")]
    RepeatZero,
    #[error("mean {0} interval must be positive and finite, not {1}")]
    BadInterval(&'static str, f64),
    #[error(transparent)]
    PowerDistributionError(#[from] PowerDistributionError),
    #[error(transparent)]
    TopologyError(#[from] TopologyError),
}

impl SimulationBuilder {
    /// Mean time between blocks across the whole network, in ticks.
    pub const DEFAULT_BLOCK_INTERVAL: f64 = 10_000.0;
    /// Mean time between transactions created by one peer, in ticks.
    pub const DEFAULT_TXN_INTERVAL: f64 = 1_000.0;
    pub const DEFAULT_INITIAL_BALANCE: u64 = 1000;
    pub const DEFAULT_MAX_EVENTS: usize = 100_000;
    /// Propagation delay of the links in the default complete topology.
    pub const DEFAULT_LINK_DELAY: f64 = 50.0;
    /// Speed of the links in the default complete topology, in bits per tick.
    pub const DEFAULT_LINK_SPEED: f64 = 100_000.0;

    /// Creates a new [SimulationBuilder].
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `num` honest peers to the simulation.
    pub fn with_honest_peers(mut self, num: usize) -> Self {
        self.honest_peers += num;

        self
    }

    /// Adds a selfish peer holding `power` of the total mining power. Honest
    /// peers split the remaining power equally. Selfish peers take the lowest
    /// peer ids, in order of addition.
    pub fn add_attacker(mut self, power: PowerValue) -> Self {
        self.attackers.push(power);

        self
    }

    /// Sets the mining power of every peer directly, overriding the powers
    /// given to [`add_attacker`](Self::add_attacker). Values are listed in
    /// peer id order.
    pub fn with_power_values<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = PowerValue>,
    {
        let dist = values.into_iter().collect();
        self.power_dist = Some(PowerDistribution::SetValues(dist));

        self
    }

    /// Sets the peer-to-peer network. A complete graph with
    /// [`DEFAULT_LINK_DELAY`](Self::DEFAULT_LINK_DELAY) and
    /// [`DEFAULT_LINK_SPEED`](Self::DEFAULT_LINK_SPEED) is used otherwise.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self.edges = None;

        self
    }

    /// Sets the peer-to-peer network from a list of undirected links,
    /// replacing any topology given before. Edges naming unknown peers are
    /// reported by [`build`](Self::build).
    pub fn with_edges<I>(mut self, edges: I) -> Self
    where
        I: IntoIterator<Item = Edge>,
    {
        self.edges = Some(edges.into_iter().collect());
        self.topology = None;

        self
    }

    /// Sets the mean time between blocks across the whole network.
    pub fn with_block_interval(mut self, mean: f64) -> Self {
        self.mean_block_interval = Some(mean);

        self
    }

    /// Sets the mean time between transactions created by each peer.
    pub fn with_transaction_interval(mut self, mean: f64) -> Self {
        self.mean_txn_interval = Some(mean);

        self
    }

    /// Sets the coins granted to each peer by the genesis block.
    pub fn with_initial_balance(mut self, amount: u64) -> Self {
        self.initial_balance = Some(amount);

        self
    }

    /// Sets the number of events each run executes before stopping.
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = Some(max_events);

        self
    }

    /// Sets the seed of the first run (default 0).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);

        self
    }

    /// The simulation will run `num` times, with seeds `seed..seed + num`.
    pub fn repeat_all(mut self, num: usize) -> Self {
        self.repeat_all = Some(num);

        self
    }

    /// Creates a [SimulationGroup] from the specified parameters.
    pub fn build(self) -> Result<SimulationGroup, SimulationBuildError> {
        use SimulationBuildError::*;

        let SimulationBuilder {
            honest_peers,
            attackers,
            power_dist,
            topology,
            edges,
            mean_block_interval,
            mean_txn_interval,
            initial_balance,
            max_events,
            seed,
            repeat_all,
        } = self;

        let num_peers = honest_peers + attackers.len();
        if num_peers < 2 {
            return Err(TooFewPeers(num_peers));
        }

        let max_events =
            NonZeroUsize::new(max_events.unwrap_or(Self::DEFAULT_MAX_EVENTS))
                .ok_or(ZeroMaxEvents)?;
        let repeat_all =
            NonZeroUsize::new(repeat_all.unwrap_or(1)).ok_or(RepeatZero)?;

        let interval = |name, value: Option<f64>, default| {
            let value = value.unwrap_or(default);
            if value.is_finite() && value > 0.0 {
                Ok(value)
            } else {
                Err(BadInterval(name, value))
            }
        };
        let params = Params {
            num_peers,
            mean_block_interval: interval(
                "block",
                mean_block_interval,
                Self::DEFAULT_BLOCK_INTERVAL,
            )?,
            mean_txn_interval: interval(
                "transaction",
                mean_txn_interval,
                Self::DEFAULT_TXN_INTERVAL,
            )?,
        };

        let power_dist = match power_dist {
            Some(dist) => dist,
            None if attackers.is_empty() => PowerDistribution::Equal,
            None => PowerDistribution::FixedLeading(attackers.clone()),
        };
        let power_values = power_dist.values(num_peers)?;

        let topology = match (topology, edges) {
            (Some(topology), _) => topology,
            (None, Some(edges)) => Topology::from_edges(num_peers, edges)?,
            (None, None) => Topology::complete(
                num_peers,
                Self::DEFAULT_LINK_DELAY,
                Self::DEFAULT_LINK_SPEED,
            ),
        };
        topology.validate(num_peers)?;

        Ok(SimulationGroup {
            config: SimulationConfig {
                power_values,
                num_attackers: attackers.len(),
                topology,
                params,
                initial_balance: initial_balance
                    .unwrap_or(Self::DEFAULT_INITIAL_BALANCE),
                max_events,
            },
            seed: seed.unwrap_or(0),
            repeat_all,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{SimulationBuildError, SimulationBuilder};
    use crate::{
        network::{Topology, TopologyError},
        power_dist::PowerDistributionError,
    };

    #[test]
    fn example_build() {
        let group = SimulationBuilder::new()
            .with_honest_peers(3)
            .add_attacker(0.25)
            .repeat_all(4)
            .build()
            .expect("valid simulation build");

        assert_eq!(group.num_runs(), 4);
        assert_eq!(group.config.num_attackers, 1);
        assert_eq!(group.config.power_values, vec![0.25; 4]);
    }

    #[test]
    fn rejects_tiny_networks() {
        assert_eq!(
            SimulationBuilder::new().with_honest_peers(1).build().unwrap_err(),
            SimulationBuildError::TooFewPeers(1)
        );
    }

    #[test]
    fn rejects_zero_budgets_and_repeats() {
        let base = || SimulationBuilder::new().with_honest_peers(2);

        assert_eq!(
            base().with_max_events(0).build().unwrap_err(),
            SimulationBuildError::ZeroMaxEvents
        );
        assert_eq!(
            base().repeat_all(0).build().unwrap_err(),
            SimulationBuildError::RepeatZero
        );
        assert_eq!(
            base().with_block_interval(0.0).build().unwrap_err(),
            SimulationBuildError::BadInterval("block", 0.0)
        );
    }

    #[test]
    fn rejects_attackers_holding_all_power() {
        let err = SimulationBuilder::new()
            .with_honest_peers(2)
            .add_attacker(0.5)
            .add_attacker(0.5)
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            SimulationBuildError::PowerDistributionError(
                PowerDistributionError::FixedPowerTooHigh(1.0)
            )
        );
    }

    #[test]
    fn rejects_mismatched_topology() {
        let err = SimulationBuilder::new()
            .with_honest_peers(3)
            .with_topology(Topology::complete(2, 10.0, 100.0))
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            SimulationBuildError::TopologyError(TopologyError::WrongNumPeers(
                2, 3
            ))
        );
    }

    #[test]
    fn rejects_edges_to_unknown_peers() {
        let edges =
            [(0, 1, 10.0, 100.0), (1, 2, 10.0, 100.0), (2, 7, 10.0, 100.0)];
        let err = SimulationBuilder::new()
            .with_honest_peers(3)
            .with_edges(edges)
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            SimulationBuildError::TopologyError(TopologyError::UnknownPeer(
                2.into(),
                7.into()
            ))
        );
    }

    #[test]
    fn edges_build_a_ring() {
        let ring = (0..4).map(|i| (i, (i + 1) % 4, 10.0, 100.0));
        let group = SimulationBuilder::new()
            .with_honest_peers(4)
            .with_edges(ring)
            .build()
            .expect("valid simulation build");

        for i in 0..4 {
            assert_eq!(group.config.topology.links(i.into()).len(), 2);
        }
    }
}
