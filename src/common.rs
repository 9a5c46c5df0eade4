//! Miscellaneous common structs used throughout the library.

mod contact;
mod id;
pub mod messages;
mod routing_table;

pub use contact::*;
pub use id::*;
pub use messages::*;
pub use routing_table::*;

pub(crate) use id::to_hex;

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the unix epoch, the clock used for stored items.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}
