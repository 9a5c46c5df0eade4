//! A known peer in the overlay network.
use std::{
    fmt::{self, Display, Formatter},
    net::SocketAddr,
};

use serde::{Deserialize, Serialize};

use crate::common::Id;
use crate::{Error, Result};

const URI_SCHEME: &str = "tcp://";

/// Wire form of a [Contact], in canonical `(guid, uri, pubkey, nickname)` order.
pub type ContactTuple = (Id, String, String, String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "ContactTuple", try_from = "ContactTuple")]
/// A peer: its GUID, network address, public key and display name.
pub struct Contact {
    pub guid: Id,
    pub address: SocketAddr,
    pub pubkey: String,
    pub nickname: String,
}

impl Contact {
    pub fn new(guid: Id, address: SocketAddr, pubkey: &str, nickname: &str) -> Contact {
        Contact {
            guid,
            address,
            pubkey: pubkey.to_string(),
            nickname: nickname.to_string(),
        }
    }

    /// Build a contact from its uri form, e.g. `tcp://10.0.0.1:12345`.
    pub fn from_uri(guid: Id, uri: &str, pubkey: &str, nickname: &str) -> Result<Contact> {
        Ok(Contact::new(guid, parse_uri(uri)?, pubkey, nickname))
    }

    /// `tcp://host:port`
    pub fn uri(&self) -> String {
        format!("{}{}", URI_SCHEME, self.address)
    }

    /// Same guid or same address, regardless of the other fields.
    pub fn same_peer(&self, other: &Contact) -> bool {
        self.guid == other.guid || self.address == other.address
    }
}

/// Turn a peer uri into a socket address. The `tcp://` scheme is optional.
pub fn parse_uri(uri: &str) -> Result<SocketAddr> {
    if uri.is_empty() {
        return Err(Error::MissingUri);
    }

    uri.strip_prefix(URI_SCHEME)
        .unwrap_or(uri)
        .parse()
        .map_err(|_| Error::InvalidUri(uri.to_string()))
}

impl Display for Contact {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.guid, self.address, self.nickname)
    }
}

impl From<Contact> for ContactTuple {
    fn from(contact: Contact) -> ContactTuple {
        let uri = contact.uri();
        (contact.guid, uri, contact.pubkey, contact.nickname)
    }
}

impl TryFrom<ContactTuple> for Contact {
    type Error = Error;

    fn try_from((guid, uri, pubkey, nickname): ContactTuple) -> Result<Contact> {
        Contact::from_uri(guid, &uri, &pubkey, &nickname)
    }
}
