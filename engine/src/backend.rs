//! Persistence interface consumed by the store.
//!
//! The engine never owns durable storage. Whatever hosts it supplies a
//! [`Backend`]; the store calls `load` on cache misses and refreshes,
//! `load_all` for listings, and `save` before committing a mutation.

use crate::error::Error;
use crate::{EntityId, VersionedRecord};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Failure reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        Error::BackendUnavailable(err.0)
    }
}

/// Durable storage for versioned records.
///
/// Calls must be safe to retry; the engine itself never retries.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Load one record. `Ok(None)` means it does not exist.
    async fn load(&self, id: &str) -> Result<Option<VersionedRecord>, BackendError>;

    /// Load every record in a collection.
    async fn load_all(&self, collection: &str) -> Result<Vec<VersionedRecord>, BackendError>;

    /// Persist a record that the engine is about to commit.
    async fn save(&self, record: &VersionedRecord) -> Result<(), BackendError>;
}

/// Process-local backend for tests, demos and embedding without a database.
///
/// Counts calls and can be switched into a failing mode to exercise error
/// paths.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    records: Arc<DashMap<EntityId, VersionedRecord>>,
    failing: Arc<AtomicBool>,
    loads: Arc<AtomicUsize>,
    list_loads: Arc<AtomicUsize>,
    saves: Arc<AtomicUsize>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-populated with records.
    pub fn with_records(records: impl IntoIterator<Item = VersionedRecord>) -> Self {
        let backend = Self::new();
        for record in records {
            backend.insert(record);
        }
        backend
    }

    /// Insert or replace a record directly, bypassing the engine.
    pub fn insert(&self, record: VersionedRecord) {
        self.records.insert(record.id.clone(), record);
    }

    /// Stored copy of a record.
    pub fn stored(&self, id: &str) -> Option<VersionedRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn list_load_count(&self) -> usize {
        self.list_loads.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(BackendError::new("in-memory backend set to fail"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn load(&self, id: &str) -> Result<Option<VersionedRecord>, BackendError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.stored(id))
    }

    async fn load_all(&self, collection: &str) -> Result<Vec<VersionedRecord>, BackendError> {
        self.list_loads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.collection == collection)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn save(&self, record: &VersionedRecord) -> Result<(), BackendError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.insert(record.clone());
        Ok(())
    }
}
