use std::time::Instant;

use overlay_dht::{Call, LookupOutcome, Testnet};

use clap::Parser;

use tracing::Level;
use tracing_subscriber;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of nodes in the in-memory network
    #[arg(short, long, default_value_t = 50)]
    nodes: usize,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let start = Instant::now();
    let mut testnet = Testnet::bootstrapped(cli.nodes).expect("testnet");

    println!(
        "Bootstrapped {} nodes in {:?} milliseconds, {} messages delivered",
        testnet.nodes.len(),
        start.elapsed().as_millis(),
        testnet.sent_messages().len()
    );

    for node in &testnet.nodes {
        println!(
            "  {} knows {} nodes",
            node.local_contact(),
            node.routing_table().size()
        );
    }

    let (Some(first), Some(last)) = (testnet.nodes.first().cloned(), testnet.nodes.last()) else {
        println!("Nothing to look up, the network has no nodes");
        return;
    };
    let target = last.guid();

    println!("\nLooking up {} from {}", target, first.guid());

    let receiver = first.lookup(target, Call::FindNode);
    testnet.run_until_idle();

    match receiver.try_recv() {
        Ok(LookupOutcome::Node(node)) => println!("Found {}", node),
        Ok(outcome) => println!("Lookup ended with {:?}", outcome),
        Err(_) => println!("Lookup did not complete"),
    }
}
