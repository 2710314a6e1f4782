//! Bounded version history used for rollback.
//!
//! Each accepted mutation appends one entry holding the payload as it was
//! *before* the mutation, labelled with that pre-mutation version. Entry `v`
//! therefore describes what version `v` looked like, and restoring it is a
//! matter of replacing the payload with `previous_data`.
//!
//! History is capped per record. Once the cap is reached the oldest entries
//! are dropped and those versions can no longer be restored.

use crate::{EntityId, Patch, Payload, Timestamp, Version};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Default number of entries retained per record.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// One step of a record's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionLedgerEntry {
    /// Version whose payload is captured in `previous_data`
    pub version: Version,
    /// When the superseding mutation was accepted
    pub timestamp: Timestamp,
    /// Actor of the superseding mutation
    pub modified_by: String,
    /// Fields written by the superseding mutation
    pub changes: Patch,
    /// Full payload of `version`
    pub previous_data: Payload,
}

/// Per-record bounded history.
#[derive(Debug)]
pub struct VersionLedger {
    limit: usize,
    entries: Mutex<HashMap<EntityId, VecDeque<VersionLedgerEntry>>>,
}

impl Default for VersionLedger {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl VersionLedger {
    /// Create a ledger keeping at most `limit` entries per record.
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Entries retained per record.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Append an entry, dropping the oldest ones past the limit.
    ///
    /// Returns how many entries were trimmed.
    pub fn record(&self, id: &str, entry: VersionLedgerEntry) -> usize {
        let mut entries = self.entries.lock();
        let history = entries.entry(id.to_string()).or_default();
        history.push_back(entry);

        let mut trimmed = 0;
        while history.len() > self.limit {
            if let Some(dropped) = history.pop_front() {
                tracing::debug!(
                    entity_id = %id,
                    version = dropped.version,
                    "Trimmed version out of history"
                );
                trimmed += 1;
            }
        }
        trimmed
    }

    /// History for a record, oldest first.
    pub fn history(&self, id: &str) -> Vec<VersionLedgerEntry> {
        self.entries
            .lock()
            .get(id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Find the entry describing `version`.
    pub fn find(&self, id: &str, version: Version) -> Option<VersionLedgerEntry> {
        self.entries
            .lock()
            .get(id)
            .and_then(|h| h.iter().find(|e| e.version == version).cloned())
    }

    /// Oldest version still restorable for a record.
    pub fn oldest_retained(&self, id: &str) -> Option<Version> {
        self.entries
            .lock()
            .get(id)
            .and_then(|h| h.front().map(|e| e.version))
    }

    /// Number of records with any history.
    pub fn tracked(&self) -> usize {
        self.entries.lock().len()
    }
}
