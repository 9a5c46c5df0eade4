#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

mod common;
pub mod config;
mod dht;
mod error;
pub mod store;
pub mod testnet;
pub mod transport;

#[cfg(feature = "async")]
pub mod async_dht;

pub use crate::common::{
    messages, parse_uri, unix_now, Contact, Id, KBucket, RoutingTable, ID_SIZE,
    MAX_BUCKET_SIZE_K, MAX_DISTANCE,
};
pub use config::Config;
pub use dht::{Call, Dht, LookupCallback, LookupOutcome};
pub use error::{Error, Result};
pub use testnet::Testnet;
pub use transport::{HandshakeCallback, Transport};

pub use ed25519_dalek::SigningKey;
