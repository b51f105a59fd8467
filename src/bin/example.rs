use std::{error::Error, time::Instant};

use p2p_mining_sim::prelude::*;
use tracing_subscriber::EnvFilter;

const ATTACKER_POWER: PowerValue = 0.35;
const HONEST_PEERS: usize = 9;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let start = Instant::now();

    // Ring of peers with a few long-range shortcuts.
    let n = HONEST_PEERS + 1;
    let ring = (0..n).map(|i| (i, (i + 1) % n, 40.0, 50_000.0));
    let chords = (0..n / 2).map(|i| (i, i + n / 2, 120.0, 20_000.0));
    let topology = Topology::from_edges(n, ring.chain(chords))?;

    let outputs = SimulationBuilder::new()
        .add_attacker(ATTACKER_POWER)
        .with_honest_peers(HONEST_PEERS)
        .with_topology(topology)
        .with_block_interval(6_000.0)
        .with_transaction_interval(2_000.0)
        .with_max_events(200_000)
        .repeat_all(4)
        .build()?
        .run_all();

    let attacker = PeerId::from(0);
    let observer = PeerId::from(n - 1);
    println!("attacker power: {ATTACKER_POWER}");
    for output in &outputs {
        let chain = output.longest_chain(observer);
        println!(
            "seed {:>2}: {:>7} events, {:>8} ticks, chain length {:>4}, \
             blocks mined {:>4}, attacker revenue {:.4}",
            output.seed,
            output.events_executed,
            output.final_time,
            chain.len() - 1,
            output.arena.len() - 1,
            output.revenue(observer, attacker),
        );
    }
    println!("Elapsed time: {:.4} secs", start.elapsed().as_secs_f64());

    Ok(())
}
