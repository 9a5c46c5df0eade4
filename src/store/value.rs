//! Stored value kinds and the index merge rules applied by a coordinating node.

use serde_json::{Map, Value};
use tracing::debug;

/// The set-like indices a value can update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Keyword search index, members live under `listings`.
    Keyword,
    /// Notary membership index, members live under `notaries`.
    Notary,
}

impl IndexKind {
    /// The list field of the stored index object.
    pub fn field(&self) -> &'static str {
        match self {
            IndexKind::Keyword => "listings",
            IndexKind::Notary => "notaries",
        }
    }

    fn add_marker(&self) -> &'static str {
        match self {
            IndexKind::Keyword => "keyword_index_add",
            IndexKind::Notary => "notary_index_add",
        }
    }

    fn remove_marker(&self) -> &'static str {
        match self {
            IndexKind::Keyword => "keyword_index_remove",
            IndexKind::Notary => "notary_index_remove",
        }
    }
}

/// An incoming value, decoded once at the store boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    /// Stored verbatim.
    Plain(String),
    /// Insert `member` into the index stored under the key.
    IndexAdd { kind: IndexKind, member: String },
    /// Remove `member` from the index stored under the key.
    IndexRemove { kind: IndexKind, member: String },
}

impl StoredValue {
    /// Decode a raw value. Anything that is not a json object carrying one of the
    /// index markers with a string member is a [StoredValue::Plain].
    pub fn decode(raw: &str) -> StoredValue {
        let object = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(object)) => object,
            Ok(_) => return StoredValue::Plain(raw.to_string()),
            Err(error) => {
                debug!(?error, "Value is not json, storing it as is");
                return StoredValue::Plain(raw.to_string());
            }
        };

        for kind in [IndexKind::Notary, IndexKind::Keyword] {
            if let Some(Value::String(member)) = object.get(kind.add_marker()) {
                return StoredValue::IndexAdd {
                    kind,
                    member: member.clone(),
                };
            }
            if let Some(Value::String(member)) = object.get(kind.remove_marker()) {
                return StoredValue::IndexRemove {
                    kind,
                    member: member.clone(),
                };
            }
        }

        StoredValue::Plain(raw.to_string())
    }

    /// Resolve the value to store given the currently stored one.
    ///
    /// Returns `None` when nothing should be stored or propagated, which is the case
    /// for removing a member that is not in the index.
    pub fn resolve(self, existing: Option<&str>) -> Option<String> {
        match self {
            StoredValue::Plain(value) => Some(value),
            StoredValue::IndexAdd { kind, member } => {
                let mut index = existing.and_then(parse_index).unwrap_or_default();

                let members = index
                    .entry(kind.field())
                    .or_insert_with(|| Value::Array(Vec::new()));

                if !members.is_array() {
                    *members = Value::Array(Vec::new());
                }

                if let Value::Array(members) = members {
                    let member = Value::String(member);
                    if !members.contains(&member) {
                        members.push(member);
                    }
                }

                Some(Value::Object(index).to_string())
            }
            StoredValue::IndexRemove { kind, member } => {
                let mut index = existing.and_then(parse_index)?;

                let members = match index.get_mut(kind.field()) {
                    Some(Value::Array(members)) => members,
                    _ => return None,
                };

                let position = members
                    .iter()
                    .position(|m| m.as_str() == Some(member.as_str()))?;
                members.remove(position);

                Some(Value::Object(index).to_string())
            }
        }
    }
}

fn parse_index(raw: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(raw) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}
