//! Optimistic concurrency, history and rollback.
//!
//! The resolver owns the resident copy of every record and its ledger. It
//! is the only code that replaces a resident record, and it only does so
//! after the backend has accepted the new version.

use crate::backend::Backend;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::ledger::{VersionLedger, VersionLedgerEntry};
use crate::record::Change;
use crate::{EntityId, Version, VersionedRecord};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// How a write treats concurrent modifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Reject unless the record is still at this version.
    Expect(Version),
    /// Apply on top of whatever version is current (last write wins).
    Unconditional,
}

/// Decides whether writes are accepted and what records look like after.
#[derive(Debug)]
pub struct ConflictResolver {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    records: DashMap<EntityId, VersionedRecord>,
    ledger: VersionLedger,
    write_locks: DashMap<EntityId, Arc<Mutex<()>>>,
}

impl ConflictResolver {
    pub fn new(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>, history_limit: usize) -> Self {
        Self {
            backend,
            clock,
            records: DashMap::new(),
            ledger: VersionLedger::new(history_limit),
            write_locks: DashMap::new(),
        }
    }

    /// Copy of the resident record.
    pub fn current(&self, id: &str) -> Option<VersionedRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Number of resident records.
    pub fn resident(&self) -> usize {
        self.records.len()
    }

    /// Make a loaded record resident unless a newer version already is.
    ///
    /// Returns whichever copy is resident afterwards.
    pub fn ingest(&self, record: VersionedRecord) -> VersionedRecord {
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(mut resident) => {
                if record.version > resident.get().version {
                    tracing::debug!(
                        entity_id = %record.id,
                        from = resident.get().version,
                        to = record.version,
                        "Ingested newer version from backend"
                    );
                    resident.insert(record);
                }
                resident.get().clone()
            }
            Entry::Vacant(slot) => slot.insert(record).clone(),
        }
    }

    /// Ledger for a record, oldest first.
    pub fn history(&self, id: &str) -> Vec<VersionLedgerEntry> {
        self.ledger.history(id)
    }

    fn write_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.write_locks.entry(id.to_string()).or_default().clone()
    }

    /// Drop the lock for `id` once no writer holds or waits on it.
    fn release_write_lock(&self, id: &str) {
        self.write_locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Validate, persist and commit one mutation.
    ///
    /// Writes to the same id are serialized; the first to persist takes the
    /// next version. Nothing resident changes unless the backend save
    /// succeeds.
    pub async fn apply_update(
        &self,
        id: &str,
        change: Change,
        modified_by: &str,
        mode: WriteMode,
    ) -> Result<VersionedRecord> {
        self.apply_update_then(id, change, modified_by, mode, |_| {})
            .await
    }

    /// Like [`apply_update`](Self::apply_update), running `on_commit` with
    /// the new version before the next writer for `id` may start.
    ///
    /// Anything `on_commit` does for a record happens in version order.
    pub async fn apply_update_then<F>(
        &self,
        id: &str,
        change: Change,
        modified_by: &str,
        mode: WriteMode,
        on_commit: F,
    ) -> Result<VersionedRecord>
    where
        F: FnOnce(&VersionedRecord) + Send,
    {
        if !self.contains(id) {
            return Err(Error::NotFound(id.to_string()));
        }

        let lock = self.write_lock(id);
        let result = {
            let _guard = lock.lock().await;
            let committed = self.commit(id, change, modified_by, mode).await;
            if let Ok(next) = &committed {
                on_commit(next);
            }
            committed
        };
        drop(lock);
        self.release_write_lock(id);
        result
    }

    async fn commit(
        &self,
        id: &str,
        change: Change,
        modified_by: &str,
        mode: WriteMode,
    ) -> Result<VersionedRecord> {
        let current = self
            .current(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if let WriteMode::Expect(expected) = mode {
            if expected != current.version {
                tracing::info!(
                    entity_id = %id,
                    expected,
                    actual = current.version,
                    modified_by = %modified_by,
                    "Rejected write with stale version"
                );
                return Err(Error::VersionConflict {
                    expected,
                    actual: current.version,
                });
            }
        }

        let next = current.successor(&change, self.clock.now(), modified_by);

        if let Err(err) = self.backend.save(&next).await {
            tracing::warn!(
                entity_id = %id,
                version = next.version,
                error = %err,
                "Backend rejected save, nothing committed"
            );
            return Err(err.into());
        }

        self.ledger.record(
            id,
            VersionLedgerEntry {
                version: current.version,
                timestamp: next.last_modified,
                modified_by: modified_by.to_string(),
                changes: change.fields().clone(),
                previous_data: current.payload,
            },
        );
        self.records.insert(id.to_string(), next.clone());

        tracing::info!(
            entity_id = %id,
            version = next.version,
            modified_by = %modified_by,
            "Committed update"
        );

        Ok(next)
    }

    /// Restore the payload recorded for `target_version` as a new version.
    pub async fn rollback(
        &self,
        id: &str,
        target_version: Version,
        modified_by: &str,
    ) -> Result<VersionedRecord> {
        self.rollback_then(id, target_version, modified_by, |_| {})
            .await
    }

    /// Rollback that runs `on_commit` under the record's write lock.
    pub async fn rollback_then<F>(
        &self,
        id: &str,
        target_version: Version,
        modified_by: &str,
        on_commit: F,
    ) -> Result<VersionedRecord>
    where
        F: FnOnce(&VersionedRecord) + Send,
    {
        if !self.contains(id) {
            return Err(Error::NotFound(id.to_string()));
        }

        let entry = self
            .ledger
            .find(id, target_version)
            .ok_or_else(|| Error::VersionNotFound {
                id: id.to_string(),
                version: target_version,
                oldest_retained: self.ledger.oldest_retained(id),
            })?;

        let actor = format!("{modified_by} (rollback to v{target_version})");
        self.apply_update_then(
            id,
            Change::Replace(entry.previous_data),
            &actor,
            WriteMode::Unconditional,
            on_commit,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::clock::ManualClock;
    use crate::record::payload;
    use serde_json::json;
    use std::time::Duration;

    fn setup() -> (ConflictResolver, InMemoryBackend, ManualClock) {
        let backend = InMemoryBackend::new();
        let clock = ManualClock::starting_at(1_000);
        let resolver = ConflictResolver::new(Arc::new(backend.clone()), Arc::new(clock.clone()), 10);
        resolver.ingest(
            VersionedRecord::new("A1", "agencies", payload(json!({"name": "Northbridge", "rate": 10})), 1_000, "seed")
                .owned_by("A1"),
        );
        (resolver, backend, clock)
    }

    fn patch(value: serde_json::Value) -> Change {
        Change::Merge(payload(value))
    }

    #[tokio::test]
    async fn expected_version_accepts_then_conflicts() {
        let (resolver, _, _) = setup();

        let updated = resolver
            .apply_update("A1", patch(json!({"rate": 20})), "admin-1", WriteMode::Expect(1))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.payload["rate"], 20);

        let err = resolver
            .apply_update("A1", patch(json!({"rate": 30})), "admin-2", WriteMode::Expect(1))
            .await
            .unwrap_err();
        assert_eq!(err, Error::VersionConflict { expected: 1, actual: 2 });

        let current = resolver.current("A1").unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.payload["rate"], 20);
        assert_eq!(resolver.history("A1").len(), 1);
    }

    #[tokio::test]
    async fn unconditional_write_wins_last() {
        let (resolver, _, _) = setup();
        resolver
            .apply_update("A1", patch(json!({"rate": 20})), "admin-1", WriteMode::Unconditional)
            .await
            .unwrap();
        let second = resolver
            .apply_update("A1", patch(json!({"rate": 30})), "admin-2", WriteMode::Unconditional)
            .await
            .unwrap();
        assert_eq!(second.version, 3);
        assert_eq!(second.payload["rate"], 30);
        assert_eq!(second.modified_by, "admin-2");
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let (resolver, _, _) = setup();
        let err = resolver
            .apply_update("missing", patch(json!({})), "admin-1", WriteMode::Unconditional)
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotFound("missing".into()));
        assert!(resolver.write_locks.is_empty());
    }

    #[tokio::test]
    async fn backend_failure_commits_nothing() {
        let (resolver, backend, _) = setup();
        backend.set_failing(true);

        let err = resolver
            .apply_update("A1", patch(json!({"rate": 99})), "admin-1", WriteMode::Expect(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
        assert_eq!(resolver.current("A1").map(|r| r.version), Some(1));
        assert!(resolver.history("A1").is_empty());

        backend.set_failing(false);
        let ok = resolver
            .apply_update("A1", patch(json!({"rate": 99})), "admin-1", WriteMode::Expect(1))
            .await
            .unwrap();
        assert_eq!(ok.version, 2);
    }

    #[tokio::test]
    async fn ledger_captures_previous_payload() {
        let (resolver, _, clock) = setup();
        clock.advance(Duration::from_secs(1));
        resolver
            .apply_update("A1", patch(json!({"rate": 20})), "admin-1", WriteMode::Unconditional)
            .await
            .unwrap();

        let history = resolver.history("A1");
        assert_eq!(history.len(), 1);
        let entry = &history[0];
        assert_eq!(entry.version, 1);
        assert_eq!(entry.timestamp, 2_000);
        assert_eq!(entry.modified_by, "admin-1");
        assert_eq!(entry.changes, payload(json!({"rate": 20})));
        assert_eq!(entry.previous_data, payload(json!({"name": "Northbridge", "rate": 10})));
    }

    #[tokio::test]
    async fn rollback_after_five_updates() {
        let (resolver, _, _) = setup();
        for rate in 11..=15 {
            resolver
                .apply_update("A1", patch(json!({"rate": rate})), "admin-1", WriteMode::Unconditional)
                .await
                .unwrap();
        }
        assert_eq!(resolver.current("A1").map(|r| r.version), Some(6));

        let restored = resolver.rollback("A1", 1, "admin-9").await.unwrap();
        assert_eq!(restored.version, 7);
        assert_eq!(restored.payload, payload(json!({"name": "Northbridge", "rate": 10})));
        assert_eq!(restored.modified_by, "admin-9 (rollback to v1)");
        // History grows; it is never rewritten.
        assert_eq!(resolver.history("A1").last().map(|e| e.version), Some(6));
    }

    #[tokio::test]
    async fn rollback_drops_keys_added_later() {
        let (resolver, _, _) = setup();
        resolver
            .apply_update("A1", patch(json!({"phone": "555"})), "admin-1", WriteMode::Unconditional)
            .await
            .unwrap();
        let restored = resolver.rollback("A1", 1, "admin-1").await.unwrap();
        assert!(restored.payload.get("phone").is_none());
    }

    #[tokio::test]
    async fn rollback_to_trimmed_version_fails() {
        let (resolver, _, _) = setup();
        for rate in 0..12 {
            resolver
                .apply_update("A1", patch(json!({"rate": rate})), "admin-1", WriteMode::Unconditional)
                .await
                .unwrap();
        }
        let err = resolver.rollback("A1", 1, "admin-1").await.unwrap_err();
        assert_eq!(
            err,
            Error::VersionNotFound {
                id: "A1".into(),
                version: 1,
                oldest_retained: Some(3),
            }
        );
        assert_eq!(resolver.current("A1").map(|r| r.version), Some(13));
    }

    #[tokio::test]
    async fn rollback_unknown_id_is_not_found() {
        let (resolver, _, _) = setup();
        let err = resolver.rollback("nope", 1, "admin-1").await.unwrap_err();
        assert_eq!(err, Error::NotFound("nope".into()));
    }

    #[test]
    fn ingest_never_lowers_version() {
        let (resolver, _, _) = setup();
        let mut newer = resolver.current("A1").unwrap();
        newer.version = 5;
        assert_eq!(resolver.ingest(newer).version, 5);

        let older = VersionedRecord::new("A1", "agencies", payload(json!({})), 0, "x");
        assert_eq!(resolver.ingest(older).version, 5);
    }

    #[tokio::test]
    async fn concurrent_writers_get_distinct_versions() {
        let (resolver, _, _) = setup();
        let resolver = Arc::new(resolver);

        let mut handles = Vec::new();
        for i in 0..20 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                resolver
                    .apply_update("A1", patch(json!({"rate": i})), "admin-1", WriteMode::Unconditional)
                    .await
                    .map(|r| r.version)
            }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap().unwrap());
        }
        versions.sort_unstable();
        assert_eq!(versions, (2..=21).collect::<Vec<_>>());
        assert!(resolver.write_locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn commit_callbacks_run_in_version_order() {
        let (resolver, _, _) = setup();
        let resolver = Arc::new(resolver);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..32 {
            let resolver = Arc::clone(&resolver);
            let seen = Arc::clone(&seen);
            handles.push(tokio::spawn(async move {
                resolver
                    .apply_update_then("A1", patch(json!({"rate": i})), "admin-1", WriteMode::Unconditional, |record| {
                        seen.lock().push(record.version)
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*seen.lock(), (2..=33).collect::<Vec<_>>());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        /// `None` writes unconditionally; `Some(offset)` expects
        /// `current - offset`, which only matches when the offset is zero.
        fn arb_writes() -> impl Strategy<Value = Vec<Option<u64>>> {
            prop::collection::vec(prop::option::of(0u64..3), 1..40)
        }

        proptest! {
            #[test]
            fn prop_versions_grow_by_one_per_accepted_write(writes in arb_writes()) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                let (resolver, _, _) = setup();

                rt.block_on(async {
                    for (i, write) in writes.iter().enumerate() {
                        let before = resolver.current("A1").unwrap();
                        let mode = match write {
                            None => WriteMode::Unconditional,
                            Some(offset) => WriteMode::Expect(before.version.saturating_sub(*offset)),
                        };
                        let should_accept = !matches!(write, Some(offset) if *offset > 0);

                        let result = resolver
                            .apply_update("A1", patch(json!({"step": i})), "admin-1", mode)
                            .await;
                        let after = resolver.current("A1").unwrap();

                        match result {
                            Ok(record) => {
                                prop_assert!(should_accept);
                                prop_assert_eq!(record.version, before.version + 1);
                                prop_assert_eq!(after.version, before.version + 1);
                            }
                            Err(Error::VersionConflict { actual, .. }) => {
                                prop_assert!(!should_accept);
                                prop_assert_eq!(actual, before.version);
                                prop_assert_eq!(after, before);
                            }
                            Err(other) => prop_assert!(false, "unexpected error: {}", other),
                        }
                    }

                    let history = resolver.history("A1");
                    prop_assert!(history.len() <= 10);
                    prop_assert!(history.windows(2).all(|w| w[0].version < w[1].version));
                    Ok(())
                })?;
            }
        }
    }
}
