//! SyncStore - the single entry point callers use.
//!
//! Composes the conflict resolver (resident records + ledger), the entity
//! and list caches, and the broadcast router. Every accepted mutation is
//! written through to the entity cache and then broadcast, in that order,
//! and only after the backend accepted it.

use crate::backend::Backend;
use crate::broadcast::{BroadcastRouter, DeliveryError, EventKind, Subscription, SyncEvent};
use crate::cache::{CacheConfig, CacheStats, TieredCache};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::ledger::{VersionLedgerEntry, DEFAULT_HISTORY_LIMIT};
use crate::record::{Change, Patch};
use crate::resolver::{ConflictResolver, WriteMode};
use crate::scope::{Audience, AudiencePolicy, OwnerScoped, Viewer};
use crate::{EntityId, Version, VersionedRecord};
use std::sync::Arc;

/// Store-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Timing of the single-record cache
    pub entity_cache: CacheConfig,
    /// Timing of the per-collection listing cache
    pub list_cache: CacheConfig,
    /// Ledger entries kept per record
    pub history_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            entity_cache: CacheConfig::entity(),
            list_cache: CacheConfig::list(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl SyncConfig {
    pub fn with_entity_cache(mut self, config: CacheConfig) -> Self {
        self.entity_cache = config;
        self
    }

    pub fn with_list_cache(mut self, config: CacheConfig) -> Self {
        self.list_cache = config;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}

/// Versioned entity store with caching and live change fan-out.
///
/// Construct one per composition root and share it behind an `Arc`.
#[derive(Debug)]
pub struct SyncStore {
    backend: Arc<dyn Backend>,
    resolver: Arc<ConflictResolver>,
    entity_cache: TieredCache<VersionedRecord>,
    list_cache: TieredCache<Vec<EntityId>>,
    router: BroadcastRouter,
    policy: Arc<dyn AudiencePolicy>,
    config: SyncConfig,
}

impl SyncStore {
    /// Create a store on the system clock with owner-scoped audiences.
    pub fn new(backend: Arc<dyn Backend>, config: SyncConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    /// Create a store with an explicit clock.
    pub fn with_clock(backend: Arc<dyn Backend>, config: SyncConfig, clock: Arc<dyn Clock>) -> Self {
        let resolver = Arc::new(ConflictResolver::new(
            Arc::clone(&backend),
            Arc::clone(&clock),
            config.history_limit,
        ));
        Self {
            entity_cache: TieredCache::with_clock(
                "entity",
                config.entity_cache.clone(),
                Arc::clone(&clock),
            ),
            list_cache: TieredCache::with_clock("list", config.list_cache.clone(), clock),
            backend,
            resolver,
            router: BroadcastRouter::new(),
            policy: Arc::new(OwnerScoped::default()),
            config,
        }
    }

    /// Replace the audience policy.
    pub fn with_policy(mut self, policy: Arc<dyn AudiencePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Audience of a record under the store's policy.
    ///
    /// The same audience addresses the record's events and gates it in
    /// listings, so hosts use this to gate single-record reads as well.
    pub fn audience(&self, record: &VersionedRecord) -> Audience {
        self.policy.audience(record)
    }

    /// Read one record through the entity cache.
    pub async fn get(&self, id: &str) -> Result<VersionedRecord> {
        let backend = Arc::clone(&self.backend);
        let resolver = Arc::clone(&self.resolver);

        let cached = self
            .entity_cache
            .read(id, move |id| async move {
                let loaded = backend
                    .load(&id)
                    .await?
                    .ok_or_else(|| Error::NotFound(id.clone()))?;
                Ok::<_, Error>(resolver.ingest(loaded))
            })
            .await?;

        // The resident copy is authoritative if it has moved on.
        Ok(match self.resolver.current(id) {
            Some(resident) if resident.version > cached.version => resident,
            _ => cached,
        })
    }

    /// List a collection as seen by `viewer`, sorted by id.
    ///
    /// Visibility uses the same audience test as event delivery.
    pub async fn get_all(&self, collection: &str, viewer: &Viewer) -> Result<Vec<VersionedRecord>> {
        let backend = Arc::clone(&self.backend);
        let resolver = Arc::clone(&self.resolver);
        let entity_cache = self.entity_cache.clone();

        let ids = self
            .list_cache
            .read(collection, move |collection| async move {
                let loaded = backend.load_all(&collection).await?;
                Ok::<_, Error>(loaded
                    .into_iter()
                    .map(|record| {
                        let resident = resolver.ingest(record);
                        let id = resident.id.clone();
                        entity_cache.put(&id, resident);
                        id
                    })
                    .collect::<Vec<EntityId>>())
            })
            .await?;

        let mut records: Vec<VersionedRecord> = ids
            .iter()
            .filter_map(|id| self.resolver.current(id))
            .filter(|record| self.audience(record).admits(viewer))
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    /// Apply a patch only if the record is still at `expected_version`.
    pub async fn update_with_version(
        &self,
        id: &str,
        patch: Patch,
        actor: &str,
        expected_version: Version,
    ) -> Result<VersionedRecord> {
        self.update(id, Change::Merge(patch), actor, WriteMode::Expect(expected_version))
            .await
    }

    /// Apply a patch on top of whatever version is current.
    pub async fn update_unconditional(
        &self,
        id: &str,
        patch: Patch,
        actor: &str,
    ) -> Result<VersionedRecord> {
        self.update(id, Change::Merge(patch), actor, WriteMode::Unconditional)
            .await
    }

    async fn update(
        &self,
        id: &str,
        change: Change,
        actor: &str,
        mode: WriteMode,
    ) -> Result<VersionedRecord> {
        if !self.resolver.contains(id) {
            self.get(id).await?;
        }
        self.resolver
            .apply_update_then(id, change, actor, mode, |record| {
                self.publish(EventKind::Updated, record)
            })
            .await
    }

    /// Restore the payload recorded for `target_version` as a new version.
    pub async fn rollback(
        &self,
        id: &str,
        target_version: Version,
        actor: &str,
    ) -> Result<VersionedRecord> {
        if !self.resolver.contains(id) {
            self.get(id).await?;
        }
        self.resolver
            .rollback_then(id, target_version, actor, |record| {
                self.publish(EventKind::RolledBack { target_version }, record)
            })
            .await
    }

    /// Retained history for a record, oldest first.
    pub fn get_version_history(&self, id: &str) -> Vec<VersionLedgerEntry> {
        self.resolver.history(id)
    }

    /// Write through and broadcast; runs under the record's write lock so
    /// subscribers see each record's versions in order.
    fn publish(&self, kind: EventKind, record: &VersionedRecord) {
        self.entity_cache.put(&record.id, record.clone());
        let audience = self.audience(record);
        self.router
            .broadcast(&SyncEvent::committed(kind, record.clone(), audience));
    }

    /// Register for change events visible to `viewer`.
    pub fn subscribe<F>(
        &self,
        subscriber_id: impl Into<String>,
        viewer: Viewer,
        callback: F,
    ) -> Result<Subscription>
    where
        F: Fn(&SyncEvent) -> std::result::Result<(), DeliveryError> + Send + Sync + 'static,
    {
        self.router.subscribe(subscriber_id, viewer, callback)
    }

    /// Remove a subscriber by id.
    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        self.router.unsubscribe(subscriber_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.router.subscriber_count()
    }

    /// Force the next `get(id)` to hit the backend.
    pub fn invalidate(&self, id: &str) {
        self.entity_cache.invalidate(id);
    }

    /// Force the next listing of `collection` to hit the backend.
    ///
    /// Updates never change list membership, so this is only needed when
    /// records are created or removed outside the store.
    pub fn invalidate_collection(&self, collection: &str) {
        self.list_cache.invalidate(collection);
    }

    pub fn entity_cache_stats(&self) -> CacheStats {
        self.entity_cache.stats()
    }

    pub fn list_cache_stats(&self) -> CacheStats {
        self.list_cache.stats()
    }
}
