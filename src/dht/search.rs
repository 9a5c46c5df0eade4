//! Per-lookup state of an iterative search.

use std::collections::HashSet;
use std::fmt::{self, Debug, Formatter};

use crate::common::{Contact, Id};

/// What an iterative search is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    FindNode,
    FindValue,
}

/// Terminal result of an iterative search.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    /// A node returned the value stored under the key.
    Value(String),
    /// A node whose GUID is exactly the key.
    Node(Contact),
    /// The closest nodes found once the search converged, sorted by distance.
    /// Empty when no contact was known to start from.
    Nodes(Vec<Contact>),
}

impl LookupOutcome {
    /// The nodes this outcome points at, for storing or refreshing.
    pub fn into_nodes(self) -> Vec<Contact> {
        match self {
            LookupOutcome::Value(_) => Vec::new(),
            LookupOutcome::Node(node) => vec![node],
            LookupOutcome::Nodes(nodes) => nodes,
        }
    }
}

/// Invoked once, outside the Dht lock, when a search completes.
pub type LookupCallback = Box<dyn FnOnce(LookupOutcome) + Send + 'static>;

/// What to do with a search outcome.
pub(crate) enum Purpose {
    /// Hand the outcome to the caller, if any.
    Callback(Option<LookupCallback>),
    /// Store the value at the nodes found.
    Store {
        value: String,
        original_publisher_id: Id,
        age: u64,
    },
    /// Refresh the next bucket in line.
    Refresh { remaining: Vec<Id> },
}

impl Debug for Purpose {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Purpose::Callback(callback) => write!(f, "Callback({})", callback.is_some()),
            Purpose::Store {
                original_publisher_id,
                age,
                ..
            } => f
                .debug_struct("Store")
                .field("original_publisher_id", original_publisher_id)
                .field("age", age)
                .finish(),
            Purpose::Refresh { remaining } => write!(f, "Refresh({})", remaining.len()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct DhtSearch {
    pub key: Id,
    pub call: Call,
    /// Correlates responses to this search.
    pub find_id: Id,
    /// Candidates, sorted by distance to the key at each iteration.
    pub shortlist: Vec<Contact>,
    /// GUIDs with an outstanding request.
    pub active_probes: HashSet<Id>,
    /// GUIDs that were ever probed, never probed again.
    pub already_contacted: HashSet<Id>,
    pub previous_closest_node: Option<Contact>,
    pub purpose: Purpose,
}

impl DhtSearch {
    pub fn new(key: Id, call: Call, purpose: Purpose) -> Self {
        DhtSearch {
            key,
            call,
            find_id: Id::random(),
            shortlist: Vec::new(),
            active_probes: HashSet::new(),
            already_contacted: HashSet::new(),
            previous_closest_node: None,
            purpose,
        }
    }

    /// Append candidates not already in the shortlist, keeping arrival order.
    ///
    /// Returns the number of candidates added.
    pub fn add_to_shortlist<I: IntoIterator<Item = Contact>>(&mut self, candidates: I) -> usize {
        let before = self.shortlist.len();

        for candidate in candidates {
            if !self.contains(&candidate.guid) {
                self.shortlist.push(candidate);
            }
        }

        self.shortlist.len() - before
    }

    pub fn contains(&self, guid: &Id) -> bool {
        self.shortlist.iter().any(|contact| &contact.guid == guid)
    }

    /// Sort the shortlist by distance to the key and drop duplicate GUIDs.
    pub fn sort_shortlist(&mut self) {
        let key = self.key;

        self.shortlist.sort_by_key(|contact| contact.guid.xor(&key));
        self.shortlist.dedup_by_key(|contact| contact.guid);
    }

    /// The `count` closest candidates.
    pub fn closest(&mut self, count: usize) -> Vec<Contact> {
        self.sort_shortlist();

        self.shortlist.iter().take(count).cloned().collect()
    }
}
