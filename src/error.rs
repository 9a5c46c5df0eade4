//! Main Crate Error

#[derive(thiserror::Error, Debug)]
/// overlay-dht crate error enum.
pub enum Error {
    /// Id bytes are not [ID_SIZE](crate::common::ID_SIZE) long.
    #[error("Invalid Id size, expected 20, got {0}")]
    InvalidIdSize(usize),

    /// Id string is not 40 hex characters.
    #[error("Invalid Id encoding: {0}")]
    InvalidIdEncoding(String),

    /// Config values a node cannot run with.
    #[error("Invalid config: {0}")]
    InvalidConfig(&'static str),

    /// A peer was added without a uri.
    #[error("Peer uri is required")]
    MissingUri,

    /// A peer uri could not be turned into a socket address.
    #[error("Invalid peer uri: {0}")]
    InvalidUri(String),

    /// Value exceeds [MAX_VALUE_SIZE](crate::config::MAX_VALUE_SIZE).
    #[error("Value too large: {0} bytes")]
    ValueTooLarge(usize),

    /// A decoded message violates the protocol.
    #[error("Invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("Failed to encode or decode json: {0}")]
    /// Transparent [serde_json::Error]
    Json(#[from] serde_json::Error),

    /// The lookup was cancelled or the node dropped before it completed.
    #[error("Lookup was dropped before it produced an outcome")]
    LookupDropped,

    /// The lookup did not complete in time and was cancelled.
    #[error("Lookup timed out")]
    LookupTimeout,
}

/// Alias for results returned by this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
