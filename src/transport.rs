//! Seam between the Dht and whatever connects peers.

use std::fmt::Debug;

use crate::common::{Contact, Message};

/// Called once a handshake completes, with the contact as the remote peer
/// presented itself.
pub type HandshakeCallback = Box<dyn FnOnce(Contact) + Send + 'static>;

/// Connection layer used by a [Dht](crate::Dht).
///
/// The Dht never waits on a transport: it calls it after releasing its lock,
/// and responses come back later as separate calls into
/// [Dht::handle_message](crate::Dht::handle_message).
pub trait Transport: Debug + Send + Sync {
    /// Fire and forget a message to a peer.
    fn send(&self, to: &Contact, message: Message);

    /// Start the handshake with a peer, calling `on_complete` if it succeeds.
    fn start_handshake(&self, peer: &Contact, on_complete: HandshakeCallback);
}
