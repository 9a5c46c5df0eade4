//! Serialize and deserialize overlay DHT messages.
//!
//! Messages are flat dictionaries tagged by their `type` field:
//!
//! - `findNode`: `senderGUID, uri, key, findValue, senderNick, findID, pubkey`
//! - `findNodeResponse`: `senderGUID, uri, pubkey, senderNick, findID` plus exactly
//!   one of `foundKey`, `foundNode` or `foundNodes`.
//! - `store`: `senderGUID, uri, pubkey, senderNick, key, value, originalPublisherID, age`

use serde::{Deserialize, Serialize};

use crate::common::{Contact, Id};
use crate::{Error, Result};

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "findNode")]
    FindNode(FindNodeRequest),
    #[serde(rename = "findNodeResponse")]
    FindNodeResponse(FindNodeResponse),
    #[serde(rename = "store")]
    Store(StoreRequest),
}

impl Message {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message> {
        Ok(serde_json::from_slice(bytes.as_ref())?)
    }

    /// The GUID of the node that sent this message.
    pub fn sender_guid(&self) -> &Id {
        match self {
            Message::FindNode(request) => &request.sender_guid,
            Message::FindNodeResponse(response) => &response.sender_guid,
            Message::Store(request) => &request.sender_guid,
        }
    }
}

// === FIND_NODE ===

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct FindNodeRequest {
    #[serde(rename = "senderGUID")]
    pub sender_guid: Id,
    pub uri: String,
    pub key: Id,
    #[serde(rename = "findValue")]
    pub find_value: bool,
    #[serde(rename = "senderNick")]
    pub sender_nick: String,
    #[serde(rename = "findID")]
    pub find_id: Id,
    pub pubkey: String,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(into = "RawFindNodeResponse", try_from = "RawFindNodeResponse")]
pub struct FindNodeResponse {
    pub sender_guid: Id,
    pub uri: String,
    pub pubkey: String,
    pub sender_nick: String,
    pub find_id: Id,
    pub found: Found,
}

/// What a responder found for a lookup.
#[derive(Debug, PartialEq, Clone)]
pub enum Found {
    /// The stored value for the key (`foundKey`).
    Key(String),
    /// A node whose GUID is exactly the key (`foundNode`).
    Node(Contact),
    /// The closest nodes the responder knows about (`foundNodes`).
    Nodes(Vec<Contact>),
}

#[derive(Serialize, Deserialize)]
struct RawFindNodeResponse {
    #[serde(rename = "senderGUID")]
    sender_guid: Id,
    uri: String,
    pubkey: String,
    #[serde(rename = "senderNick")]
    sender_nick: String,
    #[serde(rename = "findID")]
    find_id: Id,
    #[serde(rename = "foundKey", default, skip_serializing_if = "Option::is_none")]
    found_key: Option<String>,
    #[serde(rename = "foundNode", default, skip_serializing_if = "Option::is_none")]
    found_node: Option<Contact>,
    #[serde(rename = "foundNodes", default, skip_serializing_if = "Option::is_none")]
    found_nodes: Option<Vec<Contact>>,
}

impl From<FindNodeResponse> for RawFindNodeResponse {
    fn from(response: FindNodeResponse) -> Self {
        let (found_key, found_node, found_nodes) = match response.found {
            Found::Key(value) => (Some(value), None, None),
            Found::Node(node) => (None, Some(node), None),
            Found::Nodes(nodes) => (None, None, Some(nodes)),
        };

        RawFindNodeResponse {
            sender_guid: response.sender_guid,
            uri: response.uri,
            pubkey: response.pubkey,
            sender_nick: response.sender_nick,
            find_id: response.find_id,
            found_key,
            found_node,
            found_nodes,
        }
    }
}

impl TryFrom<RawFindNodeResponse> for FindNodeResponse {
    type Error = Error;

    fn try_from(raw: RawFindNodeResponse) -> Result<Self> {
        let found = match (raw.found_key, raw.found_node, raw.found_nodes) {
            (Some(value), None, None) => Found::Key(value),
            (None, Some(node), None) => Found::Node(node),
            (None, None, Some(nodes)) => Found::Nodes(nodes),
            _ => {
                return Err(Error::InvalidMessage(
                    "findNodeResponse requires exactly one of foundKey, foundNode or foundNodes",
                ))
            }
        };

        Ok(FindNodeResponse {
            sender_guid: raw.sender_guid,
            uri: raw.uri,
            pubkey: raw.pubkey,
            sender_nick: raw.sender_nick,
            find_id: raw.find_id,
            found,
        })
    }
}

// === STORE ===

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    #[serde(rename = "senderGUID")]
    pub sender_guid: Id,
    pub uri: String,
    pub pubkey: String,
    #[serde(rename = "senderNick")]
    pub sender_nick: String,
    pub key: Id,
    pub value: String,
    #[serde(rename = "originalPublisherID")]
    pub original_publisher_id: Id,
    /// Seconds since the value was originally published.
    pub age: u64,
}
