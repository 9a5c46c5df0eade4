//! Simplified Kademlia routing table

use std::collections::BTreeMap;
use std::slice::Iter;
use std::time::{Duration, Instant};

use crate::common::{Contact, Id};

/// K = the default maximum size of a k-bucket.
pub const MAX_BUCKET_SIZE_K: usize = 20;

#[derive(Debug, Clone)]
/// Simplified Kademlia routing table
///
/// Buckets are keyed by [Id::distance] from the local Id, so bucket `160` holds
/// the furthest half of the Id space and bucket `1` the single closest Id.
pub struct RoutingTable {
    id: Id,
    k: usize,
    buckets: BTreeMap<u8, KBucket>,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        RoutingTable {
            id,
            k: MAX_BUCKET_SIZE_K,
            buckets: BTreeMap::new(),
        }
    }

    // === Options ===

    /// Set the maximum number of contacts per bucket.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Returns the map of distances and their [KBucket]
    pub fn buckets(&self) -> &BTreeMap<u8, KBucket> {
        &self.buckets
    }

    // === Public Methods ===

    /// XOR distance between two Ids, comparable as an integer.
    pub fn distance(&self, a: &Id, b: &Id) -> Id {
        a.xor(b)
    }

    /// Attempts to add a contact to this routing table, and return `true` if it did.
    ///
    /// A contact already in the table is replaced and moved to the tail of its
    /// bucket (most recently seen). A new contact is rejected if its bucket is full.
    pub fn add_contact(&mut self, contact: Contact) -> bool {
        let distance = self.id.distance(&contact.guid);

        if distance == 0 {
            // Do not add self to the routing_table
            return false;
        }

        let k = self.k;
        let bucket = self.buckets.entry(distance).or_default();

        bucket.add(contact, k)
    }

    /// Remove a contact from this routing table.
    pub fn remove_contact(&mut self, guid: &Id) {
        let distance = self.id.distance(guid);

        if let Some(bucket) = self.buckets.get_mut(&distance) {
            bucket.remove(guid);

            if bucket.is_empty() {
                self.buckets.remove(&distance);
            }
        }
    }

    /// Returns the contact with this guid if it is in the table.
    pub fn get_contact(&self, guid: &Id) -> Option<&Contact> {
        let distance = self.id.distance(guid);

        self.buckets
            .get(&distance)
            .and_then(|bucket| bucket.iter().find(|contact| &contact.guid == guid))
    }

    /// Return up to `count` contacts sorted by XOR distance to `key`, never
    /// including `exclude`.
    pub fn find_close_nodes(&self, key: &Id, count: usize, exclude: Option<&Id>) -> Vec<Contact> {
        let mut closest: Vec<Contact> = self
            .contacts()
            .filter(|contact| Some(&contact.guid) != exclude)
            .cloned()
            .collect();

        closest.sort_by_key(|contact| contact.guid.xor(key));
        closest.truncate(count);

        closest
    }

    /// Mark the bucket `key` falls into as recently looked up.
    pub fn touch_kbucket(&mut self, key: &Id) {
        self.touch_kbucket_at(key, Instant::now())
    }

    /// One random Id per bucket, starting at bucket `start_distance`, for the buckets
    /// that were not touched within `refresh_timeout` (or all of them if `force`).
    pub fn get_refresh_list(
        &self,
        start_distance: u8,
        force: bool,
        refresh_timeout: Duration,
    ) -> Vec<Id> {
        self.buckets
            .range(start_distance..)
            .filter(|(_, bucket)| force || bucket.last_accessed.elapsed() >= refresh_timeout)
            .map(|(distance, _)| self.id.random_within_bucket(*distance))
            .collect()
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|bucket| bucket.is_empty())
    }

    /// Return the number of contacts in this routing table.
    pub fn size(&self) -> usize {
        self.buckets
            .values()
            .fold(0, |acc, bucket| acc + bucket.contacts.len())
    }

    /// Returns an iterator over the contacts in this routing table.
    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }

    /// Export an owned vector of contacts from this routing table.
    pub fn to_owned_contacts(&self) -> Vec<Contact> {
        self.contacts().cloned().collect()
    }

    // === Private Methods ===

    fn touch_kbucket_at(&mut self, key: &Id, now: Instant) {
        let distance = self.id.distance(key);

        if let Some(bucket) = self.buckets.get_mut(&distance) {
            bucket.last_accessed = now;
        }
    }

    #[cfg(test)]
    fn contains(&self, guid: &Id) -> bool {
        self.get_contact(guid).is_some()
    }
}

/// Kbuckets hold up to `k` contacts within one distance range from the local Id,
/// sorted by the least recently seen.
#[derive(Debug, Clone)]
pub struct KBucket {
    contacts: Vec<Contact>,
    /// Last time a lookup targeted this bucket.
    last_accessed: Instant,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            contacts: Vec::with_capacity(MAX_BUCKET_SIZE_K),
            last_accessed: Instant::now(),
        }
    }

    // === Public Methods ===

    pub fn add(&mut self, incoming: Contact, k: usize) -> bool {
        if let Some(index) = self.contacts.iter().position(|c| c.guid == incoming.guid) {
            self.contacts.remove(index);
            self.contacts.push(incoming);

            true
        } else if self.contacts.len() < k {
            self.contacts.push(incoming);

            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, guid: &Id) {
        self.contacts.retain(|contact| &contact.guid != guid);
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn iter(&self) -> Iter<'_, Contact> {
        self.contacts.iter()
    }

    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;
    use std::str::FromStr;

    use super::*;

    fn contact(id: Id, port: u16) -> Contact {
        Contact::new(id, SocketAddr::from(([127, 0, 0, 1], port)), "00", "node")
    }

    fn random_contact() -> Contact {
        contact(Id::random(), rand::random())
    }

    #[test]
    fn table_is_empty() {
        let mut table = RoutingTable::new(Id::random());
        assert!(table.is_empty());

        table.add_contact(random_contact());
        assert!(!table.is_empty());
    }

    #[test]
    fn contains() {
        let mut table = RoutingTable::new(Id::random());

        let node = random_contact();

        assert!(!table.contains(&node.guid));

        table.add_contact(node.clone());
        assert!(table.contains(&node.guid));
        assert_eq!(table.get_contact(&node.guid), Some(&node));
    }

    #[test]
    fn remove() {
        let mut table = RoutingTable::new(Id::random());

        let node = random_contact();

        table.add_contact(node.clone());
        assert!(table.contains(&node.guid));

        table.remove_contact(&node.guid);
        assert!(!table.contains(&node.guid));
        assert!(table.buckets().is_empty());
    }

    #[test]
    fn buckets_are_sets() {
        let mut table = RoutingTable::new(Id::random());

        let node1 = random_contact();
        let node2 = contact(node1.guid, node1.address.port());

        table.add_contact(node1);
        table.add_contact(node2);

        assert_eq!(table.size(), 1);
    }

    #[test]
    fn should_not_add_self() {
        let mut table = RoutingTable::new(Id::random());
        let node = contact(*table.id(), 0);

        assert!(!table.add_contact(node));
        assert!(table.is_empty())
    }

    #[test]
    fn should_not_add_more_than_k() {
        let mut bucket = KBucket::new();

        for i in 0..MAX_BUCKET_SIZE_K {
            assert!(bucket.add(random_contact(), MAX_BUCKET_SIZE_K), "Failed to add node {i}");
        }

        assert!(!bucket.add(random_contact(), MAX_BUCKET_SIZE_K));
        assert_eq!(bucket.len(), MAX_BUCKET_SIZE_K);
    }

    #[test]
    fn should_update_existing_contact() {
        let mut bucket = KBucket::new();

        let node1 = random_contact();
        let moved = contact(node1.guid, node1.address.port().wrapping_add(1));

        bucket.add(node1.clone(), MAX_BUCKET_SIZE_K);
        bucket.add(random_contact(), MAX_BUCKET_SIZE_K);

        assert_ne!(bucket.contacts[1].guid, node1.guid);

        bucket.add(moved.clone(), MAX_BUCKET_SIZE_K);

        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.contacts[1], moved);
    }

    #[test]
    fn find_close_nodes_is_sorted_and_excludes() {
        let mut table = RoutingTable::new(Id::random());

        let contacts: Vec<Contact> = (0..100).map(|_| random_contact()).collect();
        for contact in &contacts {
            table.add_contact(contact.clone());
        }

        let key = Id::random();
        let excluded = contacts[0].guid;

        let closest = table.find_close_nodes(&key, MAX_BUCKET_SIZE_K, Some(&excluded));

        assert!(closest.len() <= MAX_BUCKET_SIZE_K);
        assert!(closest.iter().all(|c| c.guid != excluded));

        let distances: Vec<Id> = closest.iter().map(|c| table.distance(&c.guid, &key)).collect();
        let mut sorted = distances.clone();
        sorted.sort();

        assert_eq!(distances, sorted);
    }

    #[test]
    fn closest() {
        let ids = [
            "fb449c17f6c34fadea26a5a83e1952e815e001ea",
            "e63b72f95aacee40ad087f83afb475645739f669",
            "58c65677e3833cb0f15733a6363cc4cb1352f90a",
            "fd042ff1404b495720ad8345404ff5f25acd02a8",
            "dbed34a2c8db568fe59c10adcca9e81825b3dcfd",
            "079d40b746b5721f59972ebde423429739844914",
            "094f1d2fb4b95ba2c3250b014a9f06d13cd9eb9a",
            "98805a55523458c56d59339266bdcecc82370ecd",
            "0a1d6cce47c60f2c7357e9fec2910192de6eb336",
            "fb689ce0e18c2c22f316976d3ae524aed4137773",
        ];

        let local_id = Id::from_str("ba3042eb2d373b19e7c411ce6826e31b37be0b2e").unwrap();
        let mut table = RoutingTable::new(local_id);

        for (i, id) in ids.iter().enumerate() {
            table.add_contact(contact(Id::from_str(id).unwrap(), i as u16));
        }

        let target = Id::from_str("fb449c17f6c34fadea26a5a83e1952e815e001eb").unwrap();
        let closest: Vec<String> = table
            .find_close_nodes(&target, 3, None)
            .iter()
            .map(|c| c.guid.to_string())
            .collect();

        assert_eq!(
            closest,
            vec![
                "fb449c17f6c34fadea26a5a83e1952e815e001ea",
                "fb689ce0e18c2c22f316976d3ae524aed4137773",
                "fd042ff1404b495720ad8345404ff5f25acd02a8",
            ]
        );
    }

    #[test]
    fn refresh_list_covers_populated_buckets() {
        let mut table = RoutingTable::new(Id::random());

        for _ in 0..30 {
            table.add_contact(random_contact());
        }

        let forced = table.get_refresh_list(0, true, Duration::from_secs(3600));
        assert_eq!(forced.len(), table.buckets().len());

        for id in &forced {
            assert!(table.buckets().contains_key(&table.id().distance(id)));
        }

        assert!(table
            .get_refresh_list(0, false, Duration::from_secs(3600))
            .is_empty());
        assert_eq!(
            table.get_refresh_list(0, false, Duration::ZERO).len(),
            table.buckets().len()
        );
    }

    #[test]
    fn touch_kbucket_updates_last_accessed() {
        let mut table = RoutingTable::new(Id::random());
        let node = random_contact();
        table.add_contact(node.clone());

        let distance = table.id().distance(&node.guid);
        let later = Instant::now() + Duration::from_secs(60);

        table.touch_kbucket_at(&node.guid, later);

        assert_eq!(table.buckets()[&distance].last_accessed(), later);
    }
}
