/*!
Re-export of common values and datatypes used for running and analyzing
simulations. Must be imported manually.

```
use p2p_mining_sim::prelude::*;
```
*/

use crate::{
    attacker, block, event, hash, ledger, network, node, peer, power_dist,
    simulation, transaction,
};

pub use attacker::{Attacker, SelfishState};

pub use block::{Block, BlockArena, BlockHash};

pub use event::{Event, EventKind, Time};

pub use hash::Hash;

pub use ledger::Ledger;

pub use network::{Link, Topology, TopologyError};

pub use node::Node;

pub use peer::{BlockRejection, Peer, PeerId};

pub use power_dist::{PowerDistribution, PowerDistributionError, PowerValue};

pub use simulation::{
    NodeSnapshot, Simulation, SimulationBuildError, SimulationBuilder,
    SimulationGroup, SimulationOutput,
};

pub use transaction::{Sender, Transaction, TxnId, BLOCK_REWARD};
