use std::{net::SocketAddr, time::Duration};

use ed25519_dalek::SigningKey;

use crate::common::{Id, MAX_BUCKET_SIZE_K};

/// Default port for a node's uri.
pub const DEFAULT_PORT: u16 = 12345;
/// Number of contacts from the local routing table used to seed a lookup.
pub const DEFAULT_ALPHA: usize = 3;
/// Age after which a value that was not republished by its publisher is dropped.
pub const DATE_EXPIRE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
/// Interval between replica pushes of values this node does not own.
pub const REPLICATE_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Age of an untouched k-bucket before it is refreshed, and the maintenance period.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Maximum number of values kept in the local data store.
pub const MAX_VALUES: usize = 1000;
/// Maximum size of a stored value in bytes.
pub const MAX_VALUE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
/// Dht Configurations
pub struct Config {
    /// Address other nodes reach this node at.
    ///
    /// Defaults to `0.0.0.0:`[DEFAULT_PORT]
    pub address: SocketAddr,
    /// Display name sent along every message.
    ///
    /// Defaults to `"Default"`
    pub nickname: String,
    /// Identity key. The node's `pubkey` is its hex encoded verifying key.
    ///
    /// Defaults to None, where a random key is generated.
    pub signing_key: Option<SigningKey>,
    /// Explicit GUID for this node.
    ///
    /// Defaults to None, where the GUID is the SHA-1 hash of the verifying key.
    pub guid: Option<Id>,
    /// Bucket size, and the number of closest nodes returned and tracked per lookup.
    ///
    /// Defaults to [MAX_BUCKET_SIZE_K]
    pub k: usize,
    /// Number of routing table contacts used to seed a lookup.
    ///
    /// Defaults to [DEFAULT_ALPHA]
    pub alpha: usize,
    /// Defaults to [DATE_EXPIRE_TIMEOUT]
    pub data_expire_timeout: Duration,
    /// Defaults to [REPLICATE_INTERVAL]
    pub replicate_interval: Duration,
    /// Defaults to [REFRESH_TIMEOUT]
    pub refresh_timeout: Duration,
    /// Capacity of the local data store, least recently used values are evicted first.
    ///
    /// Defaults to [MAX_VALUES]
    pub max_values: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            nickname: "Default".to_string(),
            signing_key: None,
            guid: None,
            k: MAX_BUCKET_SIZE_K,
            alpha: DEFAULT_ALPHA,
            data_expire_timeout: DATE_EXPIRE_TIMEOUT,
            replicate_interval: REPLICATE_INTERVAL,
            refresh_timeout: REFRESH_TIMEOUT,
            max_values: MAX_VALUES,
        }
    }
}
