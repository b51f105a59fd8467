//! Peer links and the message latency model

use rand::Rng;

use crate::{event::Time, peer::PeerId};

/// Bits in one kilobyte of message data.
pub const BITS_PER_KB: f64 = 8000.0;

/// Numerator of the mean queueing delay at a link, in bits.
pub const QUEUEING_BITS: f64 = 96_000.0;

/// Size of a transaction message, in kilobytes.
pub const TRANSACTION_SIZE_KB: u64 = 1;

/// A directed connection to a neighbouring peer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub peer: PeerId,
    /// Speed-of-light delay of the link, in ticks.
    pub propagation_delay: f64,
    /// Bandwidth of the link, in bits per tick.
    pub link_speed: f64,
}

impl Link {
    /// Time taken for a message of `size_kb` kilobytes to cross this link:
    /// propagation delay, plus transmission time, plus an exponentially
    /// distributed queueing delay with mean `96000 / link_speed`. Rounded up
    /// to whole ticks.
    pub fn latency<R: Rng + ?Sized>(&self, size_kb: u64, rng: &mut R) -> Time {
        let transmission = size_kb as f64 * BITS_PER_KB / self.link_speed;
        let queueing = sample_exponential(QUEUEING_BITS / self.link_speed, rng);

        (self.propagation_delay + transmission + queueing).ceil() as Time
    }
}

/// Draws from an exponential distribution with the given mean.
pub fn sample_exponential<R: Rng + ?Sized>(mean: f64, rng: &mut R) -> f64 {
    // 1 - u lies in (0, 1], so the logarithm is always finite.
    let u: f64 = rng.gen();
    -mean * (1.0 - u).ln()
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TopologyError {
    #[error("topology has {0} peers but the simulation has {1}")]
    WrongNumPeers(usize, usize),
    #[error("peer {0} is linked to itself")]
    SelfLink(PeerId),
    #[error(
        "link from {0} to {1} must have positive speed and non-negative delay"
    )]
    BadLink(PeerId, PeerId),
    #[error("link from {0} to {1} names a peer outside the network")]
    UnknownPeer(PeerId, PeerId),
    #[error("peer {0} has no neighbours")]
    Isolated(PeerId),
}

/// Neighbour lists for every peer. Built by the caller; the simulation only
/// reads it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    links: Vec<Vec<Link>>,
}

impl Topology {
    /// Creates a topology with `num_peers` peers and no links.
    pub fn new(num_peers: usize) -> Self {
        Topology { links: vec![vec![]; num_peers] }
    }

    /// Creates a topology from undirected edges of the form
    /// `(a, b, propagation_delay, link_speed)`. Fails if an edge names a peer
    /// outside `0..num_peers`.
    pub fn from_edges<I>(
        num_peers: usize,
        edges: I,
    ) -> Result<Self, TopologyError>
    where
        I: IntoIterator<Item = (usize, usize, f64, f64)>,
    {
        let mut topology = Self::new(num_peers);
        for (a, b, delay, speed) in edges {
            topology.connect(a.into(), b.into(), delay, speed)?;
        }

        Ok(topology)
    }

    /// Creates a topology in which every pair of peers is connected by a link
    /// with the given delay and speed.
    pub fn complete(num_peers: usize, delay: f64, speed: f64) -> Self {
        let mut topology = Self::new(num_peers);
        for a in 0..num_peers {
            for b in a + 1..num_peers {
                topology.link(a.into(), b.into(), delay, speed);
            }
        }

        topology
    }

    /// Adds a link in both directions between `a` and `b`.
    pub fn connect(
        &mut self,
        a: PeerId,
        b: PeerId,
        delay: f64,
        speed: f64,
    ) -> Result<(), TopologyError> {
        let n = self.num_peers();
        if a.get() >= n || b.get() >= n {
            return Err(TopologyError::UnknownPeer(a, b));
        }

        self.link(a, b, delay, speed);
        Ok(())
    }

    #[inline]
    pub fn num_peers(&self) -> usize {
        self.links.len()
    }

    /// Returns the links leaving `peer`.
    #[inline]
    pub fn links(&self, peer: PeerId) -> &[Link] {
        &self.links[peer.get()]
    }

    /// Checks that this topology describes `num_peers` peers whose links are
    /// well formed.
    pub fn validate(&self, num_peers: usize) -> Result<(), TopologyError> {
        use TopologyError::*;

        if self.links.len() != num_peers {
            return Err(WrongNumPeers(self.links.len(), num_peers));
        }

        for (i, links) in self.links.iter().enumerate() {
            let from = PeerId::from(i);
            if links.is_empty() {
                return Err(Isolated(from));
            }

            for link in links {
                if link.peer == from {
                    return Err(SelfLink(from));
                }
                if link.link_speed.is_nan()
                    || link.link_speed <= 0.0
                    || link.propagation_delay.is_nan()
                    || link.propagation_delay < 0.0
                {
                    return Err(BadLink(from, link.peer));
                }
            }
        }

        Ok(())
    }

    pub(crate) fn into_links(self) -> Vec<Vec<Link>> {
        self.links
    }

    fn link(&mut self, a: PeerId, b: PeerId, delay: f64, speed: f64) {
        self.links[a.get()].push(Link {
            peer: b,
            propagation_delay: delay,
            link_speed: speed,
        });
        self.links[b.get()].push(Link {
            peer: a,
            propagation_delay: delay,
            link_speed: speed,
        });
    }
}
