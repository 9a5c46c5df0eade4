//! Mutable state of a Dht node, only ever touched under the node's lock.

mod lookup;
mod storage;

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug, Formatter};

use tracing::{debug, trace, warn};

use crate::common::{
    messages::{FindNodeRequest, FindNodeResponse, Found, Message, StoreRequest},
    Contact, Id, RoutingTable,
};
use crate::config::Config;
use crate::store::DataStore;

use super::maintenance::Maintenance;
use super::search::{DhtSearch, LookupCallback, LookupOutcome};

/// Side effects collected while holding the lock, dispatched after releasing it.
#[derive(Default)]
pub(crate) struct Effects {
    pub messages: Vec<(Contact, Message)>,
    pub handshakes: Vec<Contact>,
    pub completions: Vec<(LookupCallback, LookupOutcome)>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.handshakes.is_empty() && self.completions.is_empty()
    }
}

impl Debug for Effects {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effects")
            .field("messages", &self.messages.len())
            .field("handshakes", &self.handshakes.len())
            .field("completions", &self.completions.len())
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct DhtState {
    config: Config,
    local: Contact,
    /// Every peer this node has heard of, handshaken or not.
    known_nodes: Vec<Contact>,
    /// Handshaken peers, never two with the same guid or address.
    active_peers: Vec<Contact>,
    routing_table: RoutingTable,
    data_store: DataStore,
    searches: HashMap<Id, DhtSearch>,
    maintenance: Maintenance,
    effects: Effects,
}

impl DhtState {
    pub fn new(config: Config, local: Contact) -> Self {
        let routing_table = RoutingTable::new(local.guid).with_k(config.k);
        let data_store = DataStore::new(config.max_values);
        let maintenance = Maintenance::new(config.refresh_timeout);

        DhtState {
            config,
            local,
            known_nodes: Vec::new(),
            active_peers: Vec::new(),
            routing_table,
            data_store,
            searches: HashMap::new(),
            maintenance,
            effects: Effects::default(),
        }
    }

    // === Getters ===

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn known_nodes(&self) -> &[Contact] {
        &self.known_nodes
    }

    pub fn active_peers(&self) -> &[Contact] {
        &self.active_peers
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn data_store(&self) -> &DataStore {
        &self.data_store
    }

    pub fn searches(&self) -> impl Iterator<Item = &Id> {
        self.searches.keys()
    }

    /// Take the effects accumulated since the last call.
    pub fn take_effects(&mut self) -> Effects {
        std::mem::take(&mut self.effects)
    }

    // === Peers ===

    /// Record the seed, connect to it, and look up our own guid to fill the
    /// routing table.
    pub fn start(&mut self, seed: Contact) {
        if seed.guid == self.local.guid {
            warn!(?seed, "Refusing to bootstrap from ourselves");
            return;
        }

        debug!(seed = %seed, "Bootstrapping");

        self.remember(seed.clone());
        self.add_as_active_peer(seed.clone());
        self.effects.handshakes.push(seed);

        let own_guid = self.local.guid;
        self.find_without_callback(own_guid);
    }

    /// Idempotent upsert of a peer.
    ///
    /// Unknown peers are remembered and handshaken, and only become active once
    /// the handshake completes.
    pub fn add_peer(&mut self, contact: Contact) {
        if contact.guid == self.local.guid {
            return;
        }

        if self.active_peers.contains(&contact) {
            let diverged = match self.routing_table.get_contact(&contact.guid) {
                Some(existing) => {
                    existing.address != contact.address || existing.pubkey != contact.pubkey
                }
                None => true,
            };

            if diverged {
                trace!(peer = %contact, "Refreshing routing table entry");
                self.routing_table.remove_contact(&contact.guid);
                self.routing_table.add_contact(contact);
            }

            return;
        }

        if self.active_peers.iter().any(|p| p.same_peer(&contact)) {
            debug!(peer = %contact, "Updating active peer");
            self.add_as_active_peer(contact);

            return;
        }

        if self.known_nodes.contains(&contact) {
            trace!(peer = %contact, "Handshake already pending");
            return;
        }

        trace!(peer = %contact, "Connecting to new peer");
        self.remember(contact.clone());
        self.effects.handshakes.push(contact);
    }

    /// Promote a handshaken peer, replacing any peer with the same guid or address.
    pub fn add_as_active_peer(&mut self, peer: Contact) {
        if peer.guid == self.local.guid {
            return;
        }

        let (replaced, kept): (Vec<Contact>, Vec<Contact>) =
            std::mem::take(&mut self.active_peers)
                .into_iter()
                .partition(|p| p.same_peer(&peer));
        self.active_peers = kept;

        for old in &replaced {
            self.routing_table.remove_contact(&old.guid);
        }

        if !self.routing_table.add_contact(peer.clone()) {
            trace!(peer = %peer, "Bucket full, peer stays out of the routing table");
        }

        self.active_peers.push(peer.clone());
        self.remember(peer);
    }

    /// Up to K contacts closest to `key`, never `excluded`, without duplicates.
    pub fn close_nodes(&self, key: &Id, excluded: &Id) -> Vec<Contact> {
        let mut nodes = self
            .routing_table
            .find_close_nodes(key, self.config.k, Some(excluded));

        let mut seen = HashSet::new();
        nodes.retain(|contact| seen.insert(contact.clone()));

        nodes
    }

    // === Inbound ===

    pub fn handle_message(&mut self, message: Message) {
        match message {
            Message::FindNode(request) => self.on_find_node(request),
            Message::FindNodeResponse(response) => self.on_find_node_response(response),
            Message::Store(request) => self.on_store_value(request, crate::common::unix_now()),
        }
    }

    pub fn on_find_node(&mut self, request: FindNodeRequest) {
        if request.sender_guid == self.local.guid {
            warn!(find_id = ?request.find_id, "Ignoring findNode from ourselves");
            return;
        }

        if request.pubkey.is_empty() {
            warn!(from = ?request.sender_guid, "Ignoring findNode without pubkey");
            return;
        }

        let sender = match Contact::from_uri(
            request.sender_guid,
            &request.uri,
            &request.pubkey,
            &request.sender_nick,
        ) {
            Ok(sender) => sender,
            Err(error) => {
                warn!(?error, from = ?request.sender_guid, "Ignoring findNode with invalid uri");
                return;
            }
        };

        trace!(from = %sender, key = ?request.key, find_id = ?request.find_id, "Received findNode");

        let moved = self
            .routing_table
            .get_contact(&sender.guid)
            .map(|known| known.address != sender.address)
            .unwrap_or(false);

        if moved {
            debug!(from = %sender, "Sender address changed");
            self.routing_table.remove_contact(&sender.guid);
            self.routing_table.add_contact(sender.clone());
        }

        self.add_peer(sender.clone());

        let stored = if request.find_value {
            self.data_store.get(&request.key).map(|item| item.value.clone())
        } else {
            None
        };

        let found = if let Some(value) = stored {
            Found::Key(value)
        } else if request.key == self.local.guid {
            Found::Node(self.local.clone())
        } else {
            let nodes = self.close_nodes(&request.key, &sender.guid);

            match nodes.iter().find(|contact| contact.guid == request.key) {
                Some(exact) => Found::Node(exact.clone()),
                None => Found::Nodes(nodes),
            }
        };

        let response = Message::FindNodeResponse(FindNodeResponse {
            sender_guid: self.local.guid,
            uri: self.local.uri(),
            pubkey: self.local.pubkey.clone(),
            sender_nick: self.local.nickname.clone(),
            find_id: request.find_id,
            found,
        });

        self.send(sender, response);
    }

    // === Private Methods ===

    fn send(&mut self, to: Contact, message: Message) {
        self.effects.messages.push((to, message));
    }

    /// Upsert into `known_nodes`.
    fn remember(&mut self, contact: Contact) {
        match self
            .known_nodes
            .iter_mut()
            .find(|known| known.same_peer(&contact))
        {
            Some(known) => *known = contact,
            None => self.known_nodes.push(contact),
        }
    }

    /// The contact to reach a guid at, if any.
    fn live_contact(&self, guid: &Id) -> Option<Contact> {
        self.active_peers
            .iter()
            .chain(self.known_nodes.iter())
            .find(|contact| &contact.guid == guid)
            .or_else(|| self.routing_table.get_contact(guid))
            .cloned()
    }

    fn find_node_request(&self, key: Id, find_id: Id, find_value: bool) -> Message {
        Message::FindNode(FindNodeRequest {
            sender_guid: self.local.guid,
            uri: self.local.uri(),
            key,
            find_value,
            sender_nick: self.local.nickname.clone(),
            find_id,
            pubkey: self.local.pubkey.clone(),
        })
    }

    fn store_request(
        &self,
        key: Id,
        value: String,
        original_publisher_id: Id,
        age: u64,
    ) -> Message {
        Message::Store(StoreRequest {
            sender_guid: self.local.guid,
            uri: self.local.uri(),
            pubkey: self.local.pubkey.clone(),
            sender_nick: self.local.nickname.clone(),
            key,
            value,
            original_publisher_id,
            age,
        })
    }
}
