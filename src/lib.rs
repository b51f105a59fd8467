/*!
Discrete-event simulator of selfish mining on a proof-of-work peer-to-peer
network.

Honest peers mine on the longest chain they know of and publish blocks
immediately. Selfish peers withhold the blocks they mine and release them
strategically to orphan honest work. Every run is driven by a single seeded
event queue, so the same configuration and seed always produce the same run.

```
use p2p_mining_sim::prelude::*;

let output = SimulationBuilder::new()
    .with_honest_peers(4)
    .add_attacker(0.3)
    .with_max_events(2_000)
    .with_seed(7)
    .build()?
    .run_all()
    .remove(0);

assert_eq!(output.events_executed, 2_000);
assert!(!output.longest_chain(PeerId::from(1)).is_empty());
# Ok::<(), SimulationBuildError>(())
```
*/

pub mod attacker;
pub mod block;
pub mod event;
pub mod hash;
pub mod ledger;
pub mod network;
pub mod node;
pub mod peer;
pub mod power_dist;
pub mod prelude;
pub mod simulation;
pub mod transaction;
