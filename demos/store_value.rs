use std::time::Duration;

use overlay_dht::{Id, LookupOutcome, Testnet};

use clap::Parser;

use tracing::Level;
use tracing_subscriber;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Application key, hashed into the Id space
    key: String,
    /// Value to store on the DHT
    value: String,
    /// Number of nodes in the in-memory network
    #[arg(short, long, default_value_t = 30)]
    nodes: usize,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let mut testnet = Testnet::bootstrapped(cli.nodes).expect("testnet");
    let (Some(writer), Some(reader)) = (testnet.nodes.first().cloned(), testnet.nodes.last().cloned())
    else {
        println!("Nothing to store on, the network has no nodes");
        return;
    };
    let key = Id::from_key(cli.key.as_bytes());

    println!("\nStoring {:?} under {} ...", cli.value, key);

    writer
        .iterative_store(key, &cli.value, None, Duration::ZERO)
        .expect("store failed");
    testnet.run_until_idle();

    let holders: Vec<_> = testnet
        .nodes
        .iter()
        .filter(|node| node.get_value(&key).is_some())
        .map(|node| node.local_contact())
        .collect();

    println!("Stored at: {:?} nodes", holders.len());
    for node in holders {
        println!("   {}", node);
    }

    let receiver = reader.lookup(key, overlay_dht::Call::FindValue);
    testnet.run_until_idle();

    match receiver.try_recv() {
        Ok(LookupOutcome::Value(value)) => println!("\n{} read back {:?}", reader.guid(), value),
        Ok(outcome) => println!("\nValue not found, lookup ended with {:?}", outcome),
        Err(_) => println!("\nLookup did not complete"),
    }
}
