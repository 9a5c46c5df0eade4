//! Iterative Kademlia lookups driven by findNode responses.

use tracing::{debug, error, trace};

use crate::common::{
    messages::{FindNodeResponse, Found},
    parse_uri, Contact, Id,
};
use crate::dht::search::{Call, DhtSearch, LookupOutcome, Purpose};

use super::DhtState;

impl DhtState {
    /// Start a new search for `key`, returning its find_id.
    ///
    /// Without a startup shortlist the search is seeded with the closest
    /// contacts of the routing table.
    pub fn iterative_find(
        &mut self,
        key: Id,
        startup_shortlist: Option<Vec<Contact>>,
        call: Call,
        purpose: Purpose,
    ) -> Id {
        let mut search = DhtSearch::new(key, call, purpose);
        let find_id = search.find_id;

        debug!(?key, ?find_id, ?call, "New search");

        match startup_shortlist {
            None => {
                let closest = self.routing_table.find_close_nodes(
                    &key,
                    self.config.alpha,
                    Some(&self.local.guid),
                );
                self.routing_table.touch_kbucket(&key);

                if closest.is_empty() {
                    debug!(?key, ?find_id, "No known contacts to search from");
                    self.finish(search, LookupOutcome::Nodes(Vec::new()));

                    return find_id;
                }

                search.add_to_shortlist(closest);
            }
            Some(shortlist) => {
                let own_guid = self.local.guid;
                let shortlist: Vec<Contact> = shortlist
                    .into_iter()
                    .filter(|contact| contact.guid != own_guid)
                    .collect();

                for contact in &shortlist {
                    self.add_peer(contact.clone());
                }

                search.add_to_shortlist(shortlist);
            }
        }

        self.searches.insert(find_id, search);
        self.search_iteration(&find_id);

        find_id
    }

    /// Look up `key` only for the side effect of learning about nodes.
    pub fn find_without_callback(&mut self, key: Id) -> Id {
        self.iterative_find(key, None, Call::FindNode, Purpose::Callback(None))
    }

    /// Stop a search. Late responses for it are ignored and its callback never fires.
    pub fn cancel_search(&mut self, find_id: &Id) -> bool {
        self.searches.remove(find_id).is_some()
    }

    pub fn on_find_node_response(&mut self, response: FindNodeResponse) {
        let FindNodeResponse {
            sender_guid,
            uri,
            pubkey,
            sender_nick,
            find_id,
            found,
        } = response;

        self.refresh_active_peer(&sender_guid, &pubkey, &sender_nick);

        let call = match self.searches.get(&find_id) {
            Some(search) => search.call,
            None => {
                debug!(?find_id, from = ?sender_guid, "Response for an unknown search, ignoring");
                return;
            }
        };

        match found {
            Found::Key(_) if call == Call::FindNode => {
                debug!(?find_id, from = ?sender_guid, "Value for a node search, ignoring");
            }
            Found::Key(value) => {
                trace!(?find_id, from = ?sender_guid, "Found value");

                if let Some(search) = self.searches.remove(&find_id) {
                    self.finish(search, LookupOutcome::Value(value));
                }
            }
            Found::Node(node) => {
                trace!(?find_id, from = ?sender_guid, node = %node, "Found exact node");

                if node.guid != self.local.guid {
                    self.add_peer(node.clone());
                }

                if let Some(search) = self.searches.remove(&find_id) {
                    self.finish(search, LookupOutcome::Node(node));
                }
            }
            Found::Nodes(nodes) => {
                let own_guid = self.local.guid;
                let sender_address = parse_uri(&uri).ok();

                let nodes: Vec<Contact> = nodes
                    .into_iter()
                    .filter(|node| {
                        node.guid != own_guid
                            && node.guid != sender_guid
                            && Some(node.address) != sender_address
                    })
                    .collect();

                trace!(?find_id, from = ?sender_guid, count = nodes.len(), "Found nodes");

                let grew = self.extend_shortlist(&find_id, nodes);

                let in_flight = match self.searches.get_mut(&find_id) {
                    Some(search) => {
                        search.active_probes.remove(&sender_guid);
                        search.already_contacted.insert(sender_guid);
                        search.active_probes.len()
                    }
                    None => return,
                };

                if grew {
                    self.search_iteration(&find_id);
                } else if in_flight == 0 {
                    if let Some(mut search) = self.searches.remove(&find_id) {
                        let closest = search.closest(self.config.k);
                        self.finish(search, LookupOutcome::Nodes(closest));
                    }
                } else {
                    trace!(?find_id, in_flight, "Waiting for remaining probes");
                }
            }
        }
    }

    /// Add the new candidates of a response to the search's shortlist and
    /// connect to the ones not already active. Returns whether the shortlist grew.
    pub fn extend_shortlist(&mut self, find_id: &Id, found_nodes: Vec<Contact>) -> bool {
        let added: Vec<Contact> = match self.searches.get_mut(find_id) {
            Some(search) => {
                let mut added = Vec::new();

                for node in found_nodes {
                    if search.add_to_shortlist([node.clone()]) > 0 {
                        added.push(node);
                    }
                }

                added
            }
            None => return false,
        };

        let grew = !added.is_empty();

        for node in added {
            let is_active = self.active_peers.iter().any(|p| p.guid == node.guid);

            if node.guid != self.local.guid && !is_active {
                self.add_peer(node);
            }
        }

        grew
    }

    /// One round of a search: probe every shortlisted node not contacted yet.
    pub(crate) fn search_iteration(&mut self, find_id: &Id) {
        let mut search = match self.searches.remove(find_id) {
            Some(search) => search,
            None => {
                debug!(?find_id, "Search was cancelled");
                return;
            }
        };

        let key = search.key;
        let slow_node_count = search.active_probes.len();

        self.active_peers.sort_by_key(|peer| peer.guid.xor(&key));
        search.previous_closest_node = self.active_peers.first().cloned();
        search.sort_shortlist();

        trace!(?find_id, ?key, slow_node_count, "Search iteration");

        let own_guid = self.local.guid;
        let candidates: Vec<Id> = search
            .shortlist
            .iter()
            .map(|contact| contact.guid)
            .filter(|guid| guid != &own_guid && !search.already_contacted.contains(guid))
            .collect();

        let find_value = search.call == Call::FindValue;

        for guid in candidates {
            search.already_contacted.insert(guid);

            match self.live_contact(&guid) {
                Some(contact) => {
                    search.active_probes.insert(guid);

                    let request = self.find_node_request(key, *find_id, find_value);
                    self.send(contact, request);
                }
                None => {
                    error!(?guid, ?find_id, "No live contact to probe, skipping");
                }
            }
        }

        if search.active_probes.is_empty() {
            let closest = search.closest(self.config.k);
            self.finish(search, LookupOutcome::Nodes(closest));
        } else {
            self.searches.insert(*find_id, search);
        }
    }

    /// Resolve a completed search according to its purpose.
    pub(crate) fn finish(&mut self, search: DhtSearch, outcome: LookupOutcome) {
        let DhtSearch {
            key,
            find_id,
            purpose,
            ..
        } = search;

        debug!(?key, ?find_id, "Search done");

        if key == self.local.guid {
            debug!(
                table_size = self.routing_table.size(),
                "Populated the routing table"
            );
        }

        match purpose {
            Purpose::Callback(Some(callback)) => {
                self.effects.completions.push((callback, outcome));
            }
            Purpose::Callback(None) => {}
            Purpose::Store {
                value,
                original_publisher_id,
                age,
            } => {
                let now = crate::common::unix_now();
                self.store_key_value(
                    outcome.into_nodes(),
                    key,
                    value,
                    original_publisher_id,
                    age,
                    now,
                );
            }
            Purpose::Refresh { mut remaining } => {
                if !remaining.is_empty() {
                    let next = remaining.remove(0);
                    self.iterative_find(next, None, Call::FindNode, Purpose::Refresh { remaining });
                }
            }
        }
    }

    /// Keep an active peer's cached pubkey and nickname current.
    fn refresh_active_peer(&mut self, guid: &Id, pubkey: &str, nickname: &str) {
        let updated = match self.active_peers.iter_mut().find(|peer| &peer.guid == guid) {
            Some(peer) if peer.pubkey != pubkey || peer.nickname != nickname => {
                peer.pubkey = pubkey.to_string();
                peer.nickname = nickname.to_string();
                peer.clone()
            }
            _ => return,
        };

        trace!(peer = %updated, "Refreshed peer details");

        if self.routing_table.get_contact(guid).is_some() {
            self.routing_table.add_contact(updated.clone());
        }
        self.remember(updated);
    }
}
