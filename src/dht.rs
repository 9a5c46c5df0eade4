//! Dht node.

mod maintenance;
mod search;
mod state;

use std::{
    fmt::{self, Debug, Formatter},
    sync::{Arc, Weak},
    time::Duration,
};

use ed25519_dalek::{SigningKey, VerifyingKey};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use crate::{
    common::{
        messages::{FindNodeRequest, FindNodeResponse, Message, StoreRequest},
        to_hex, unix_now, Contact, Id, RoutingTable,
    },
    config::{Config, MAX_VALUE_SIZE},
    store::StoredItem,
    transport::Transport,
    Error, Result,
};

pub use search::{Call, LookupCallback, LookupOutcome};

use search::Purpose;
use state::{DhtState, Effects};

#[derive(Debug, Clone)]
/// A Dht node.
///
/// Cheap to clone, every clone drives the same node. Each method locks the
/// node once, and only talks to the [Transport] or runs lookup callbacks
/// after releasing the lock, so both may call back into the node freely.
pub struct Dht(Arc<Inner>);

struct Inner {
    local: Contact,
    signing_key: SigningKey,
    state: Mutex<DhtState>,
    transport: Arc<dyn Transport>,
}

impl Debug for Inner {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dht")
            .field("local", &self.local)
            .field("transport", &self.transport)
            .finish()
    }
}

impl Dht {
    /// Create a new node that reaches other nodes through `transport`.
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        if config.k == 0 || config.alpha == 0 {
            return Err(Error::InvalidConfig("k and alpha must be positive"));
        }

        let signing_key = config
            .signing_key
            .clone()
            .unwrap_or_else(|| SigningKey::from_bytes(&rand::thread_rng().gen()));
        let verifying_key = signing_key.verifying_key().to_bytes();

        let guid = config.guid.unwrap_or_else(|| Id::from_key(&verifying_key));

        let local = Contact::new(
            guid,
            config.address,
            &to_hex(&verifying_key),
            &config.nickname,
        );

        debug!(local = %local, "Created Dht node");

        Ok(Dht(Arc::new(Inner {
            state: Mutex::new(DhtState::new(config, local.clone())),
            local,
            signing_key,
            transport,
        })))
    }

    // === Getters ===

    /// This node's GUID.
    pub fn guid(&self) -> Id {
        self.0.local.guid
    }

    /// This node as other nodes see it.
    pub fn local_contact(&self) -> Contact {
        self.0.local.clone()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.0.signing_key.verifying_key()
    }

    pub fn config(&self) -> Config {
        self.0.state.lock().config().clone()
    }

    /// Snapshot of the handshaken peers.
    pub fn active_peers(&self) -> Vec<Contact> {
        self.0.state.lock().active_peers().to_vec()
    }

    /// Snapshot of every peer this node has heard of.
    pub fn known_nodes(&self) -> Vec<Contact> {
        self.0.state.lock().known_nodes().to_vec()
    }

    /// Snapshot of the routing table.
    pub fn routing_table(&self) -> RoutingTable {
        self.0.state.lock().routing_table().clone()
    }

    /// The find_ids of the searches still in progress.
    pub fn searches(&self) -> Vec<Id> {
        self.0.state.lock().searches().copied().collect()
    }

    /// The value stored locally under `key`, if any.
    pub fn get_value(&self, key: &Id) -> Option<StoredItem> {
        self.0.state.lock().data_store().get(key).cloned()
    }

    /// Snapshot of the locally stored keys.
    pub fn stored_keys(&self) -> Vec<Id> {
        self.0.state.lock().data_store().keys()
    }

    /// Up to K contacts closest to `key`, never `excluded`.
    pub fn close_nodes(&self, key: &Id, excluded: &Id) -> Vec<Contact> {
        self.0.state.lock().close_nodes(key, excluded)
    }

    // === Peers ===

    /// Join the network through `seed`, then look up this node's own GUID.
    pub fn start(&self, seed: Contact) {
        self.with_state(|state| state.start(seed))
    }

    /// Register a peer, handshaking with it if it is new.
    ///
    /// Returns [Error::MissingUri] if `uri` is empty.
    pub fn add_peer(&self, uri: &str, pubkey: &str, guid: Id, nickname: &str) -> Result<()> {
        let contact = Contact::from_uri(guid, uri, pubkey, nickname)?;

        self.with_state(|state| state.add_peer(contact));

        Ok(())
    }

    /// Promote a handshaken peer into the active peers and the routing table.
    pub fn add_as_active_peer(&self, peer: Contact) {
        self.with_state(|state| state.add_as_active_peer(peer))
    }

    // === Inbound ===

    /// Handle a message received from the network.
    pub fn handle_message(&self, message: Message) {
        self.with_state(|state| state.handle_message(message))
    }

    /// Decode and handle a message. Undecodable bytes are logged and dropped.
    pub fn handle_bytes(&self, bytes: &[u8]) {
        match Message::from_bytes(bytes) {
            Ok(message) => self.handle_message(message),
            Err(error) => warn!(?error, "Dropping undecodable message"),
        }
    }

    pub fn on_find_node(&self, request: FindNodeRequest) {
        self.with_state(|state| state.on_find_node(request))
    }

    pub fn on_find_node_response(&self, response: FindNodeResponse) {
        self.with_state(|state| state.on_find_node_response(response))
    }

    pub fn on_store_value(&self, request: StoreRequest) {
        self.with_state(|state| state.on_store_value(request, unix_now()))
    }

    // === Lookups ===

    /// Find the node with GUID `key`, or the nodes closest to it.
    pub fn iterative_find_node<F>(&self, key: Id, callback: F) -> Id
    where
        F: FnOnce(LookupOutcome) + Send + 'static,
    {
        self.iterative_find(key, None, Call::FindNode, Some(Box::new(callback)))
    }

    /// Find the value stored under `key`, or the nodes closest to it.
    pub fn iterative_find_value<F>(&self, key: Id, callback: F) -> Id
    where
        F: FnOnce(LookupOutcome) + Send + 'static,
    {
        self.iterative_find(key, None, Call::FindValue, Some(Box::new(callback)))
    }

    /// Start a search and return its find_id.
    ///
    /// Without `startup_shortlist` the search starts from the closest contacts in
    /// the routing table, and completes right away with no nodes if there are none.
    pub fn iterative_find(
        &self,
        key: Id,
        startup_shortlist: Option<Vec<Contact>>,
        call: Call,
        callback: Option<LookupCallback>,
    ) -> Id {
        self.with_state(|state| {
            state.iterative_find(key, startup_shortlist, call, Purpose::Callback(callback))
        })
    }

    /// Start a search and receive its outcome on a channel.
    ///
    /// The channel disconnects without a message if the search is cancelled.
    pub fn lookup(&self, key: Id, call: Call) -> flume::Receiver<LookupOutcome> {
        self.lookup_with_id(key, call).1
    }

    /// Blocking [Dht::lookup], giving up after `timeout`.
    ///
    /// A search that times out is cancelled and returns [Error::LookupTimeout].
    pub fn lookup_timeout(&self, key: Id, call: Call, timeout: Duration) -> Result<LookupOutcome> {
        let (find_id, receiver) = self.lookup_with_id(key, call);

        match receiver.recv_timeout(timeout) {
            Ok(outcome) => Ok(outcome),
            Err(flume::RecvTimeoutError::Timeout) => {
                debug!(?find_id, ?timeout, "Lookup timed out, cancelling");
                self.cancel_search(&find_id);

                Err(Error::LookupTimeout)
            }
            Err(flume::RecvTimeoutError::Disconnected) => Err(Error::LookupDropped),
        }
    }

    pub(crate) fn lookup_with_id(
        &self,
        key: Id,
        call: Call,
    ) -> (Id, flume::Receiver<LookupOutcome>) {
        let (sender, receiver) = flume::bounded::<LookupOutcome>(1);

        let find_id = self.iterative_find(
            key,
            None,
            call,
            Some(Box::new(move |outcome| {
                let _ = sender.send(outcome);
            })),
        );

        (find_id, receiver)
    }

    /// Stop a search, returning false if it already completed.
    pub fn cancel_search(&self, find_id: &Id) -> bool {
        self.with_state(|state| state.cancel_search(find_id))
    }

    // === Storage ===

    /// Store a value at the nodes closest to `key`.
    ///
    /// `original_publisher_id` defaults to this node, `age` is the time since the
    /// original publication.
    pub fn iterative_store(
        &self,
        key: Id,
        value: &str,
        original_publisher_id: Option<Id>,
        age: Duration,
    ) -> Result<()> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(Error::ValueTooLarge(value.len()));
        }

        let publisher = original_publisher_id.unwrap_or(self.0.local.guid);

        self.with_state(|state| {
            state.iterative_store(key, value.to_string(), publisher, age.as_secs())
        });

        Ok(())
    }

    /// Store a value locally, merging index updates, and push it to `nodes`.
    pub fn store_key_value(
        &self,
        nodes: Vec<Contact>,
        key: Id,
        value: &str,
        original_publisher_id: Id,
        age: Duration,
    ) -> Result<()> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(Error::ValueTooLarge(value.len()));
        }

        self.with_state(|state| {
            state.store_key_value(
                nodes,
                key,
                value.to_string(),
                original_publisher_id,
                age.as_secs(),
                unix_now(),
            )
        });

        Ok(())
    }

    // === Maintenance ===

    /// Look up one Id in every bucket.
    pub fn refresh_routing_table(&self) {
        self.with_state(|state| state.refresh_routing_table(true))
    }

    /// Republish own values, replicate stale replicas, and drop expired values.
    pub fn republish_data(&self) {
        self.with_state(|state| state.republish_data(unix_now()))
    }

    /// [Dht::refresh_routing_table] and [Dht::republish_data] at once.
    pub fn refresh_node(&self) {
        self.with_state(|state| {
            state.refresh_routing_table(true);
            state.republish_data(unix_now());
        })
    }

    /// Run the maintenance that is due. Call this periodically.
    pub fn tick(&self) {
        self.with_state(|state| state.tick(unix_now()))
    }

    // === Private Methods ===

    /// Run `f` under the lock, then dispatch its effects.
    fn with_state<T>(&self, f: impl FnOnce(&mut DhtState) -> T) -> T {
        let (result, effects) = {
            let mut state = self.0.state.lock();
            let result = f(&mut state);

            (result, state.take_effects())
        };

        if !effects.is_empty() {
            self.dispatch(effects);
        }

        result
    }

    fn dispatch(&self, effects: Effects) {
        let Effects {
            messages,
            handshakes,
            completions,
        } = effects;

        for (to, message) in messages {
            self.0.transport.send(&to, message);
        }

        for peer in handshakes {
            let weak: Weak<Inner> = Arc::downgrade(&self.0);

            self.0.transport.start_handshake(
                &peer,
                Box::new(move |peer| {
                    if let Some(inner) = weak.upgrade() {
                        Dht(inner).add_as_active_peer(peer);
                    }
                }),
            );
        }

        for (callback, outcome) in completions {
            callback(outcome);
        }
    }
}
