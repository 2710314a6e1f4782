//! Versioned record model.

use crate::{CollectionName, EntityId, ScopeId, Timestamp, Version};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The domain fields of an entity. Opaque to the engine.
pub type Payload = Map<String, Value>;

/// A partial set of fields to merge over a payload.
pub type Patch = Map<String, Value>;

/// How an accepted mutation changes the payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Shallow merge: keys in the patch overwrite, other keys are kept.
    Merge(Patch),
    /// Wholesale replacement. Used when restoring a snapshot.
    Replace(Payload),
}

impl Change {
    /// The fields this change writes, as recorded in the ledger.
    pub fn fields(&self) -> &Map<String, Value> {
        match self {
            Change::Merge(patch) => patch,
            Change::Replace(payload) => payload,
        }
    }

    /// Produce the payload that results from applying this change.
    pub fn apply_to(&self, current: &Payload) -> Payload {
        match self {
            Change::Merge(patch) => merge(current, patch),
            Change::Replace(payload) => payload.clone(),
        }
    }
}

/// Shallow-merge `patch` over `payload`.
pub fn merge(payload: &Payload, patch: &Patch) -> Payload {
    let mut merged = payload.clone();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// A mutable entity tracked by the sync store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRecord {
    /// Stable identifier
    pub id: EntityId,
    /// Entity family, e.g. `agencies` or `users`
    pub collection: CollectionName,
    /// Tenant that owns this record; agencies own themselves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ScopeId>,
    /// Domain fields
    pub payload: Payload,
    /// Incremented exactly once per accepted mutation
    pub version: Version,
    /// Time of the last accepted mutation (milliseconds since epoch)
    pub last_modified: Timestamp,
    /// Actor that made the last accepted mutation
    pub modified_by: String,
}

impl VersionedRecord {
    /// Create a record at version 1.
    pub fn new(
        id: impl Into<EntityId>,
        collection: impl Into<CollectionName>,
        payload: Payload,
        timestamp: Timestamp,
        modified_by: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            owner: None,
            payload,
            version: 1,
            last_modified: timestamp,
            modified_by: modified_by.into(),
        }
    }

    /// Set the owning scope.
    pub fn owned_by(mut self, owner: impl Into<ScopeId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// The record that results from accepting `change` on top of this one.
    ///
    /// Leaves `self` untouched; the caller decides whether to commit.
    pub(crate) fn successor(
        &self,
        change: &Change,
        timestamp: Timestamp,
        modified_by: &str,
    ) -> VersionedRecord {
        VersionedRecord {
            id: self.id.clone(),
            collection: self.collection.clone(),
            owner: self.owner.clone(),
            payload: change.apply_to(&self.payload),
            version: self.version + 1,
            last_modified: timestamp.max(self.last_modified),
            modified_by: modified_by.to_string(),
        }
    }
}

/// Build a payload from a JSON object literal. Non-objects give an empty map.
pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
