//! Storing values, replicating them, and expiring stale ones.

use tracing::{debug, trace, warn};

use crate::common::{messages::StoreRequest, Contact, Id};
use crate::config::MAX_VALUE_SIZE;
use crate::dht::search::{Call, Purpose};
use crate::store::StoredValue;

use super::DhtState;

impl DhtState {
    /// Find the nodes closest to `key`, then store the value with them.
    pub fn iterative_store(&mut self, key: Id, value: String, original_publisher_id: Id, age: u64) {
        self.iterative_find(
            key,
            None,
            Call::FindNode,
            Purpose::Store {
                value,
                original_publisher_id,
                age,
            },
        );
    }

    /// Resolve the value against the local copy, store it, and push it to `nodes`.
    pub fn store_key_value(
        &mut self,
        nodes: Vec<Contact>,
        key: Id,
        value: String,
        original_publisher_id: Id,
        age: u64,
        now: u64,
    ) {
        let existing = self.data_store.get(&key).map(|item| item.value.clone());

        let value = match StoredValue::decode(&value).resolve(existing.as_deref()) {
            Some(value) => value,
            None => {
                debug!(?key, "Removed member is not in the index, nothing to store");
                return;
            }
        };

        self.data_store.set_item(
            key,
            value.clone(),
            now,
            now.saturating_sub(age),
            original_publisher_id,
        );

        for node in nodes {
            if node.guid == self.local.guid {
                continue;
            }

            if self.live_contact(&node.guid).is_none() {
                self.add_peer(node.clone());
            }

            trace!(?key, to = %node, "Storing value");

            let request = self.store_request(key, value.clone(), original_publisher_id, age);
            self.send(node, request);
        }
    }

    /// Persist a value as told, without merging.
    pub fn on_store_value(&mut self, request: StoreRequest, now: u64) {
        trace!(key = ?request.key, from = ?request.sender_guid, age = request.age, "Received store");

        if request.value.len() > MAX_VALUE_SIZE {
            warn!(
                key = ?request.key,
                from = ?request.sender_guid,
                size = request.value.len(),
                "Dropping oversized store"
            );
            return;
        }

        self.data_store.set_item(
            request.key,
            request.value,
            now,
            now.saturating_sub(request.age),
            request.original_publisher_id,
        );
    }

    /// Look up one random Id in each bucket, one lookup at a time.
    ///
    /// Unless `force`, only buckets untouched for the refresh timeout are refreshed.
    pub fn refresh_routing_table(&mut self, force: bool) {
        let mut ids = self
            .routing_table
            .get_refresh_list(0, force, self.config.refresh_timeout);

        debug!(buckets = ids.len(), force, "Refreshing routing table");

        if ids.is_empty() {
            return;
        }

        let first = ids.remove(0);
        self.iterative_find(
            first,
            None,
            Call::FindNode,
            Purpose::Refresh { remaining: ids },
        );
    }

    /// Republish own values, replicate others' values, and drop the expired ones.
    pub fn republish_data(&mut self, now: u64) {
        let expire = self.config.data_expire_timeout.as_secs();
        let replicate = self.config.replicate_interval.as_secs();

        for key in self.data_store.keys() {
            let item = match self.data_store.get(&key) {
                Some(item) => item.clone(),
                None => continue,
            };

            let age = item.age(now);

            if item.original_publisher_id == self.local.guid {
                if age >= expire {
                    debug!(?key, age, "Republishing own value");
                    self.iterative_store(key, item.value, self.local.guid, 0);
                }
            } else if age >= expire {
                debug!(?key, age, "Value expired, dropping local copy");
                self.data_store.remove(&key);
            } else if now.saturating_sub(item.last_published) >= replicate {
                debug!(?key, age, "Replicating value");
                self.iterative_store(key, item.value, item.original_publisher_id, age);
            }
        }
    }

    /// Run whatever maintenance is due.
    pub fn tick(&mut self, now: u64) {
        let decisions = self.maintenance.decisions(self.routing_table.is_empty());

        if decisions.should_refresh_table {
            self.refresh_routing_table(false);
        }

        if decisions.should_republish {
            self.republish_data(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::common::{messages::Message, unix_now};
    use crate::dht::state::tests::{contact, guid, state};

    use super::*;

    const DAY: u64 = 24 * 60 * 60;

    fn stores(state: &mut DhtState) -> Vec<(Id, StoreRequest)> {
        state
            .take_effects()
            .messages
            .into_iter()
            .filter_map(|(to, message)| match message {
                Message::Store(request) => Some((to.guid, request)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn store_key_value_stores_locally_and_pushes() {
        let mut state = state(1);
        let key = guid(9);
        state.add_as_active_peer(contact(2));

        state.store_key_value(
            vec![contact(1), contact(2)],
            key,
            "value".to_string(),
            guid(5),
            30,
            1000,
        );

        let item = state.data_store().get(&key).cloned().unwrap();
        assert_eq!(item.value, "value");
        assert_eq!(item.original_publish_time, 970);
        assert_eq!(item.last_published, 1000);
        assert_eq!(item.original_publisher_id, guid(5));

        let stores = stores(&mut state);
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].0, guid(2));
        assert_eq!(stores[0].1.age, 30);
        assert_eq!(stores[0].1.original_publisher_id, guid(5));
    }

    #[test]
    fn store_key_value_connects_to_unknown_nodes() {
        let mut state = state(1);

        state.store_key_value(vec![contact(3)], guid(9), "v".to_string(), guid(1), 0, 1000);

        let effects = state.take_effects();
        assert_eq!(effects.handshakes, vec![contact(3)]);
        assert_eq!(effects.messages.len(), 1);
    }

    #[test]
    fn index_values_merge_at_the_coordinator() {
        let mut state = state(1);
        let key = guid(9);
        state.add_as_active_peer(contact(2));

        state.store_key_value(vec![], key, r#"{"listings": ["A"]}"#.to_string(), guid(1), 0, 1);
        state.store_key_value(
            vec![contact(2)],
            key,
            r#"{"keyword_index_add": "X"}"#.to_string(),
            guid(1),
            0,
            2,
        );

        let stored: serde_json::Value =
            serde_json::from_str(&state.data_store().get(&key).unwrap().value).unwrap();
        assert_eq!(stored, serde_json::json!({"listings": ["A", "X"]}));
        assert_eq!(stores(&mut state)[0].1.value, r#"{"listings":["A","X"]}"#);

        state.store_key_value(
            vec![contact(2)],
            key,
            r#"{"keyword_index_remove": "Z"}"#.to_string(),
            guid(1),
            0,
            3,
        );

        assert!(stores(&mut state).is_empty());
        assert_eq!(state.data_store().get_last_published(&key), Some(2));
    }

    #[test]
    fn on_store_value_does_not_merge() {
        let mut state = state(1);
        let key = guid(9);
        state.store_key_value(vec![], key, r#"{"listings": ["A"]}"#.to_string(), guid(1), 0, 1);

        state.on_store_value(
            StoreRequest {
                sender_guid: guid(2),
                uri: contact(2).uri(),
                pubkey: contact(2).pubkey,
                sender_nick: contact(2).nickname,
                key,
                value: r#"{"keyword_index_add": "X"}"#.to_string(),
                original_publisher_id: guid(2),
                age: 10,
            },
            100,
        );

        let item = state.data_store().get(&key).unwrap();
        assert_eq!(item.value, r#"{"keyword_index_add": "X"}"#);
        assert_eq!(item.original_publish_time, 90);
        assert_eq!(item.original_publisher_id, guid(2));
    }

    #[test]
    fn on_store_value_drops_oversized_values() {
        let mut state = state(1);
        let key = guid(9);

        state.on_store_value(
            StoreRequest {
                sender_guid: guid(2),
                uri: contact(2).uri(),
                pubkey: contact(2).pubkey,
                sender_nick: contact(2).nickname,
                key,
                value: "x".repeat(MAX_VALUE_SIZE + 1),
                original_publisher_id: guid(2),
                age: 0,
            },
            100,
        );

        assert!(state.data_store().get(&key).is_none());
    }

    #[test]
    fn expired_foreign_values_are_dropped() {
        let mut state = state(1);
        let now = unix_now();
        let key = guid(9);
        state.on_store_value(
            StoreRequest {
                sender_guid: guid(2),
                uri: contact(2).uri(),
                pubkey: contact(2).pubkey,
                sender_nick: contact(2).nickname,
                key,
                value: "v".to_string(),
                original_publisher_id: guid(2),
                age: DAY,
            },
            now,
        );

        state.republish_data(now);

        assert!(!state.data_store().contains(&key));
    }

    #[test]
    fn expired_own_values_are_republished() {
        let mut state = state(1);
        let now = unix_now();
        let key = guid(9);
        state.store_key_value(vec![], key, "v".to_string(), guid(1), 2 * DAY, now);

        state.republish_data(now);

        let item = state.data_store().get(&key).unwrap();
        assert!(item.original_publish_time >= now);
        assert_eq!(item.original_publisher_id, guid(1));
    }

    #[test]
    fn stale_replicas_are_pushed_again() {
        let mut state = state(1);
        let now = unix_now();
        let key = guid(9);
        state.add_as_active_peer(contact(2));
        state.store_key_value(vec![], key, "v".to_string(), guid(7), 100, now - 2 * 3600);

        state.republish_data(now);
        // Find the replica holders first.
        let find_id = *state.searches().next().unwrap();
        let probes = state.take_effects().messages;
        assert_eq!(probes.len(), 1);

        state.on_find_node_response(crate::common::messages::FindNodeResponse {
            sender_guid: guid(2),
            uri: contact(2).uri(),
            pubkey: contact(2).pubkey,
            sender_nick: contact(2).nickname,
            find_id,
            found: crate::common::messages::Found::Nodes(vec![]),
        });

        let stores = stores(&mut state);
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].0, guid(2));
        assert_eq!(stores[0].1.original_publisher_id, guid(7));
        assert!(stores[0].1.age >= 2 * 3600 + 100);
    }

    #[test]
    fn fresh_values_are_left_alone() {
        let mut state = state(1);
        let now = unix_now();
        state.store_key_value(vec![], guid(9), "v".to_string(), guid(7), 0, now);
        state.store_key_value(vec![], guid(8), "v".to_string(), guid(1), 0, now);

        state.republish_data(now);

        assert_eq!(state.data_store().len(), 2);
        assert_eq!(state.searches().count(), 0);
        assert!(state.take_effects().is_empty());
    }

    #[test]
    fn forced_refresh_looks_up_every_bucket() {
        let mut state = state(0);
        state.add_as_active_peer(contact(1));
        state.add_as_active_peer(contact(2));

        state.refresh_routing_table(false);
        assert_eq!(state.searches().count(), 0);

        state.refresh_routing_table(true);

        // Lookups run one after the other.
        assert_eq!(state.searches().count(), 1);
    }
}
