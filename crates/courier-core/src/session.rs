use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::SessionId;
use crate::state::Identity;

/// Durable authentication material for one account.
///
/// `creds` and the key material are in the transport's own format; this
/// crate only merges updates into them and persists them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub creds: Map<String, Value>,
    /// `category -> key id -> key material`.
    pub keys: BTreeMap<String, BTreeMap<String, Value>>,
}

/// One key write carried by a credential rotation. `value: None` deletes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyWrite {
    pub category: String,
    pub id: String,
    pub value: Option<Value>,
}

/// Partial update emitted by the transport whenever credentials rotate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialUpdate {
    /// Top-level creds fields to overwrite.
    #[serde(default)]
    pub creds: Map<String, Value>,
    #[serde(default)]
    pub keys: Vec<KeyWrite>,
}

impl Session {
    /// A session with no credentials. Connecting with it starts pairing.
    pub fn fresh(id: SessionId) -> Self {
        Self {
            id,
            creds: Map::new(),
            keys: BTreeMap::new(),
        }
    }

    /// True once pairing has completed and the account identity is known.
    pub fn is_registered(&self) -> bool {
        self.identity().is_some()
    }

    /// The account identity recorded in `creds.me`, if any.
    pub fn identity(&self) -> Option<Identity> {
        let me = self.creds.get("me")?;
        let id = me.get("id")?.as_str().filter(|s| !s.is_empty())?;
        Some(Identity {
            id: id.to_string(),
            name: me.get("name").and_then(Value::as_str).map(String::from),
            lid: me.get("lid").and_then(Value::as_str).map(String::from),
        })
    }

    /// Merge a rotation into this session (shallow for creds).
    pub fn apply(&mut self, update: CredentialUpdate) {
        for (field, value) in update.creds {
            let _ = self.creds.insert(field, value);
        }
        for write in update.keys {
            match write.value {
                Some(value) => {
                    let _ = self
                        .keys
                        .entry(write.category)
                        .or_default()
                        .insert(write.id, value);
                }
                None => {
                    if let Some(category) = self.keys.get_mut(&write.category) {
                        let _ = category.remove(&write.id);
                        if category.is_empty() {
                            let _ = self.keys.remove(&write.category);
                        }
                    }
                }
            }
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.values().map(BTreeMap::len).sum()
    }
}
