//! AsyncDht node.

use std::time::Duration;

use crate::{
    common::{Contact, Id},
    dht::{Call, Dht, LookupOutcome},
    Error, Result,
};

impl Dht {
    /// Return an async version of the Dht node.
    pub fn as_async(self) -> AsyncDht {
        AsyncDht(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dht node.
pub struct AsyncDht(Dht);

impl AsyncDht {
    // === Getters ===

    /// Returns a reference to the blocking [Dht] node.
    pub fn as_sync(&self) -> &Dht {
        &self.0
    }

    pub fn guid(&self) -> Id {
        self.0.guid()
    }

    // === Public Methods ===

    /// Wait until a lookup of this node's own GUID is done.
    ///
    /// Returns true if it found any node.
    pub async fn bootstrapped(&self) -> Result<bool> {
        let outcome = self.find_node(self.0.guid()).await?;

        Ok(!outcome.into_nodes().is_empty())
    }

    /// Join the network through `seed`.
    pub fn start(&self, seed: Contact) {
        self.0.start(seed)
    }

    // === Lookups ===

    /// Find the node with GUID `key`, or the nodes closest to it.
    pub async fn find_node(&self, key: Id) -> Result<LookupOutcome> {
        self.lookup(key, Call::FindNode).await
    }

    /// Find the value stored under `key`, or the nodes closest to it.
    pub async fn find_value(&self, key: Id) -> Result<LookupOutcome> {
        self.lookup(key, Call::FindValue).await
    }

    /// Find a value and return it if any node had it.
    pub async fn get_value(&self, key: Id) -> Result<Option<String>> {
        match self.find_value(key).await? {
            LookupOutcome::Value(value) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    // === Storage ===

    /// Store a value at the nodes closest to `key`, published by this node.
    pub fn store(&self, key: Id, value: &str) -> Result<()> {
        self.0.iterative_store(key, value, None, Duration::ZERO)
    }

    // === Private Methods ===

    async fn lookup(&self, key: Id, call: Call) -> Result<LookupOutcome> {
        let (find_id, receiver) = self.0.lookup_with_id(key, call);
        let guard = CancelOnDrop {
            dht: &self.0,
            find_id,
        };

        let outcome = receiver.recv_async().await.map_err(|_| Error::LookupDropped);
        std::mem::forget(guard);

        outcome
    }
}

/// Cancels a search whose lookup future is dropped before it resolves.
struct CancelOnDrop<'a> {
    dht: &'a Dht,
    find_id: Id,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        self.dht.cancel_search(&self.find_id);
    }
}

#[cfg(test)]
mod test {
    use std::future::Future;

    use crate::Testnet;

    use super::*;

    #[test]
    fn find_node() {
        async fn test() {
            let mut testnet = Testnet::bootstrapped(10).unwrap();
            let target = testnet.nodes[9].guid();
            let node = testnet.nodes[0].clone().as_async();

            let (outcome, _) =
                futures::join!(node.find_node(target), async { testnet.run_until_idle() });

            assert!(matches!(outcome, Ok(LookupOutcome::Node(found)) if found.guid == target));
        }

        futures::executor::block_on(test());
    }

    #[test]
    fn store_then_get_value() {
        async fn test() {
            let mut testnet = Testnet::bootstrapped(5).unwrap();
            let key = Id::from_key(b"async");

            let writer = testnet.nodes[1].clone().as_async();
            writer.store(key, "value").unwrap();
            testnet.run_until_idle();

            let reader = testnet.nodes[4].clone().as_async();
            let (value, _) =
                futures::join!(reader.get_value(key), async { testnet.run_until_idle() });

            assert_eq!(value.unwrap(), Some("value".to_string()));
        }

        futures::executor::block_on(test());
    }

    #[test]
    fn bootstrapped_without_peers() {
        async fn test() {
            let testnet = Testnet::new(1).unwrap();
            let node = testnet.nodes[0].clone().as_async();

            assert!(!node.bootstrapped().await.unwrap());
        }

        futures::executor::block_on(test());
    }

    #[test]
    fn dropped_lookup_cancels_its_search() {
        let testnet = Testnet::bootstrapped(3).unwrap();
        let node = testnet.nodes[0].clone().as_async();

        let mut lookup = Box::pin(node.find_value(Id::random()));
        let waker = futures::task::noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);

        assert!(lookup.as_mut().poll(&mut cx).is_pending());
        assert_eq!(node.as_sync().searches().len(), 1);

        drop(lookup);

        assert!(node.as_sync().searches().is_empty());
    }

    #[test]
    fn cancelled_lookup_is_dropped() {
        async fn test() {
            let testnet = Testnet::bootstrapped(3).unwrap();
            let node = testnet.nodes[0].clone().as_async();

            let lookup = node.find_value(Id::random());
            let cancel = async {
                for find_id in node.as_sync().searches() {
                    node.as_sync().cancel_search(&find_id);
                }
            };

            let (outcome, _) = futures::join!(lookup, cancel);

            assert!(matches!(outcome, Err(Error::LookupDropped)));
        }

        futures::executor::block_on(test());
    }
}
