//! In-process network of Dht nodes, for tests and demos.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    common::{messages::Message, Contact, Id},
    config::Config,
    transport::{HandshakeCallback, Transport},
    Dht, Result,
};

/// Nodes listen on consecutive ports from here.
const BASE_PORT: u16 = 45000;
/// Upper bound on deliveries per [Testnet::run_until_idle].
const MAX_DELIVERIES: usize = 1_000_000;

enum Envelope {
    Message { to: SocketAddr, bytes: Vec<u8> },
    Handshake { to: SocketAddr, on_complete: HandshakeCallback },
}

impl Debug for Envelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::Message { to, bytes } => write!(f, "Message({}, {} bytes)", to, bytes.len()),
            Envelope::Handshake { to, .. } => write!(f, "Handshake({})", to),
        }
    }
}

#[derive(Debug, Clone)]
/// [Transport] queueing everything on the [Testnet]'s channel.
pub struct MemoryTransport {
    sender: flume::Sender<Envelope>,
}

impl Transport for MemoryTransport {
    fn send(&self, to: &Contact, message: Message) {
        match message.to_bytes() {
            Ok(bytes) => {
                let _ = self.sender.send(Envelope::Message {
                    to: to.address,
                    bytes,
                });
            }
            Err(error) => debug!(?error, "Failed to encode message"),
        }
    }

    fn start_handshake(&self, peer: &Contact, on_complete: HandshakeCallback) {
        let _ = self.sender.send(Envelope::Handshake {
            to: peer.address,
            on_complete,
        });
    }
}

#[derive(Debug)]
/// Dht nodes exchanging messages through one in-memory queue.
///
/// Nothing is delivered until [Testnet::run_until_idle] is called.
pub struct Testnet {
    pub nodes: Vec<Dht>,
    by_address: HashMap<SocketAddr, Dht>,
    sender: flume::Sender<Envelope>,
    receiver: flume::Receiver<Envelope>,
    delivered: Vec<(SocketAddr, Message)>,
}

impl Testnet {
    /// Create `count` nodes with random identities, not connected to each other.
    pub fn new(count: usize) -> Result<Testnet> {
        let (sender, receiver) = flume::unbounded();

        let mut testnet = Testnet {
            nodes: Vec::with_capacity(count),
            by_address: HashMap::new(),
            sender,
            receiver,
            delivered: Vec::new(),
        };

        for _ in 0..count {
            testnet.add_node(Config::default())?;
        }

        Ok(testnet)
    }

    /// Create `count` nodes, each started from the first one.
    pub fn bootstrapped(count: usize) -> Result<Testnet> {
        let mut testnet = Testnet::new(count)?;
        testnet.bootstrap();

        Ok(testnet)
    }

    // === Getters ===

    /// The node listening at `address`.
    pub fn node(&self, address: &SocketAddr) -> Option<&Dht> {
        self.by_address.get(address)
    }

    /// The node with this GUID.
    pub fn node_by_guid(&self, guid: &Id) -> Option<&Dht> {
        self.nodes.iter().find(|node| &node.guid() == guid)
    }

    /// Every message delivered so far, with the address it was delivered to.
    pub fn sent_messages(&self) -> &[(SocketAddr, Message)] {
        &self.delivered
    }

    // === Public Methods ===

    /// Add a node on the next free port. The address in `config` is ignored.
    pub fn add_node(&mut self, config: Config) -> Result<Dht> {
        let port = BASE_PORT + self.nodes.len() as u16;
        let address = SocketAddr::from(([127, 0, 0, 1], port));

        let transport = Arc::new(MemoryTransport {
            sender: self.sender.clone(),
        });

        let dht = Dht::new(Config { address, ..config }, transport)?;

        self.nodes.push(dht.clone());
        self.by_address.insert(address, dht.clone());

        Ok(dht)
    }

    /// Add a node with a chosen GUID.
    pub fn add_node_with_guid(&mut self, guid: Id) -> Result<Dht> {
        self.add_node(Config {
            guid: Some(guid),
            ..Default::default()
        })
    }

    /// Start every node but the first from the first, one at a time.
    pub fn bootstrap(&mut self) {
        let Some(seed) = self.nodes.first().map(|node| node.local_contact()) else {
            return;
        };

        let others: Vec<Dht> = self.nodes.iter().skip(1).cloned().collect();

        for node in others {
            node.start(seed.clone());
            self.run_until_idle();
        }
    }

    /// Deliver queued envelopes until none are left, returning how many were delivered.
    ///
    /// Envelopes to unknown addresses are dropped.
    pub fn run_until_idle(&mut self) -> usize {
        let mut count = 0;

        while let Ok(envelope) = self.receiver.try_recv() {
            if count >= MAX_DELIVERIES {
                warn!(count, "Testnet did not settle, giving up");
                break;
            }

            count += 1;
            self.deliver(envelope);
        }

        count
    }

    /// Forget the delivery log.
    pub fn clear_sent_messages(&mut self) {
        self.delivered.clear();
    }

    // === Private Methods ===

    fn deliver(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Message { to, bytes } => {
                let Some(node) = self.by_address.get(&to) else {
                    debug!(?to, "No node at address, dropping message");
                    return;
                };

                match Message::from_bytes(&bytes) {
                    Ok(message) => {
                        self.delivered.push((to, message.clone()));
                        node.handle_message(message);
                    }
                    Err(error) => debug!(?error, ?to, "Dropping undecodable message"),
                }
            }
            Envelope::Handshake { to, on_complete } => match self.by_address.get(&to) {
                Some(node) => on_complete(node.local_contact()),
                None => debug!(?to, "No node at address, handshake failed"),
            },
        }
    }
}
