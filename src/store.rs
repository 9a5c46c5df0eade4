//! Local key-value store with publish metadata.

pub mod value;

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::common::Id;
use crate::config::MAX_VALUES;

pub use value::{IndexKind, StoredValue};

#[derive(Debug, Clone, PartialEq, Eq)]
/// A value held by this node on behalf of the network.
pub struct StoredItem {
    pub value: String,
    /// Unix seconds of the last time this node stored or pushed the value.
    pub last_published: u64,
    /// Unix seconds of the original publication by the publisher.
    pub original_publish_time: u64,
    pub original_publisher_id: Id,
}

impl StoredItem {
    /// Seconds since the original publication.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.original_publish_time)
    }
}

#[derive(Debug)]
/// Bounded store of [StoredItem]s keyed by their [Id].
pub struct DataStore {
    items: LruCache<Id, StoredItem>,
}

impl DataStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or(NonZeroUsize::new(MAX_VALUES).expect("MAX_VALUES is NonZeroUsize"));

        DataStore {
            items: LruCache::new(capacity),
        }
    }

    // === Getters ===

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &Id) -> bool {
        self.items.contains(key)
    }

    /// Returns the item without touching its recency.
    pub fn get(&self, key: &Id) -> Option<&StoredItem> {
        self.items.peek(key)
    }

    pub fn get_original_publisher_id(&self, key: &Id) -> Option<Id> {
        self.get(key).map(|item| item.original_publisher_id)
    }

    pub fn get_original_publish_time(&self, key: &Id) -> Option<u64> {
        self.get(key).map(|item| item.original_publish_time)
    }

    pub fn get_last_published(&self, key: &Id) -> Option<u64> {
        self.get(key).map(|item| item.last_published)
    }

    /// Snapshot of the stored keys.
    pub fn keys(&self) -> Vec<Id> {
        self.items.iter().map(|(key, _)| *key).collect()
    }

    // === Public Methods ===

    pub fn set_item(
        &mut self,
        key: Id,
        value: String,
        now: u64,
        originally_published: u64,
        original_publisher_id: Id,
    ) {
        self.items.put(
            key,
            StoredItem {
                value,
                last_published: now,
                original_publish_time: originally_published,
                original_publisher_id,
            },
        );
    }

    pub fn remove(&mut self, key: &Id) -> Option<StoredItem> {
        self.items.pop(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut store = DataStore::new(10);
        let key = Id::random();
        let publisher = Id::random();

        store.set_item(key, "value".to_string(), 100, 40, publisher);

        assert!(store.contains(&key));
        assert_eq!(store.get_original_publisher_id(&key), Some(publisher));
        assert_eq!(store.get_original_publish_time(&key), Some(40));
        assert_eq!(store.get_last_published(&key), Some(100));
        assert_eq!(store.get(&key).map(|item| item.age(100)), Some(60));

        assert!(store.remove(&key).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut store = DataStore::new(2);
        let keys = [Id::random(), Id::random(), Id::random()];

        for key in keys {
            store.set_item(key, "v".to_string(), 0, 0, key);
        }

        assert_eq!(store.len(), 2);
        assert!(!store.contains(&keys[0]));
        assert!(store.contains(&keys[2]));
    }

    #[test]
    fn zero_capacity_falls_back_to_default() {
        let store = DataStore::new(0);

        assert_eq!(store.items.cap().get(), MAX_VALUES);
    }

    #[test]
    fn age_never_underflows() {
        let item = StoredItem {
            value: String::new(),
            last_published: 10,
            original_publish_time: 10,
            original_publisher_id: Id::random(),
        };

        assert_eq!(item.age(5), 0);
    }
}
