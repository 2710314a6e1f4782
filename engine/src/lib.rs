//! # Agency Sync Engine
//!
//! Versioned entity synchronization for the agency portal.
//!
//! This crate keeps mutable entities (agencies, users) consistent across
//! concurrent editors and pushes every accepted change to live subscribers.
//! It owns no durable storage and no network transport: the host supplies a
//! [`Backend`] for persistence and registers subscriber callbacks for
//! delivery.
//!
//! ## Core Concepts
//!
//! ### Versioned records
//!
//! Every entity is a [`VersionedRecord`] with a JSON payload, a version that
//! grows by exactly one per accepted mutation, and the time and actor of
//! that mutation.
//!
//! ### Optimistic concurrency
//!
//! The [`ConflictResolver`] accepts or rejects writes. Callers pick the mode
//! explicitly:
//! - [`SyncStore::update_with_version`] - rejected with
//!   [`Error::VersionConflict`] if someone else wrote first
//! - [`SyncStore::update_unconditional`] - last write wins
//!
//! Each accepted write appends to a bounded [`VersionLedger`] so recent
//! versions can be restored with [`SyncStore::rollback`].
//!
//! ### Tiered caching
//!
//! Reads go through a [`TieredCache`]: fresh entries are served directly,
//! stale ones are served while a single background refresh runs, expired
//! ones are reloaded before returning.
//!
//! ### Scoped broadcast
//!
//! The [`BroadcastRouter`] delivers each [`SyncEvent`] to the subscribers
//! whose [`Viewer`] the event's [`Audience`] admits. Listings use the same
//! test, so what a viewer is told about and what it can list always agree.
//!
//! ## Quick Start
//!
//! ```rust
//! use agency_sync::{
//!     payload, InMemoryBackend, SyncConfig, SyncEvent, SyncStore, VersionedRecord, Viewer,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! // 1. Seed a backend
//! let backend = InMemoryBackend::with_records([VersionedRecord::new(
//!     "A1",
//!     "agencies",
//!     payload(json!({"name": "Northbridge", "rate": 10})),
//!     1706745600000,
//!     "seed",
//! )
//! .owned_by("A1")]);
//!
//! // 2. Create a store
//! let store = SyncStore::new(Arc::new(backend), SyncConfig::default());
//!
//! // 3. Subscribe as the owning agency
//! let _subscription = store
//!     .subscribe("agency-tab", Viewer::agency("A1"), |event: &SyncEvent| {
//!         println!("{} is now at v{}", event.entity_id, event.version);
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! // 4. Update with an expected version
//! let record = store
//!     .update_with_version("A1", payload(json!({"rate": 20})), "admin-1", 1)
//!     .await
//!     .unwrap();
//! assert_eq!(record.version, 2);
//!
//! // A second writer still holding v1 is told to reload.
//! let conflict = store
//!     .update_with_version("A1", payload(json!({"rate": 30})), "admin-2", 1)
//!     .await;
//! assert!(conflict.is_err());
//! # });
//! ```

pub mod backend;
pub mod broadcast;
pub mod cache;
pub mod clock;
pub mod error;
pub mod ledger;
pub mod record;
pub mod resolver;
pub mod scope;
pub mod store;

// Re-export main types at crate root
pub use backend::{Backend, BackendError, InMemoryBackend};
pub use broadcast::{
    BroadcastRouter, Callback, DeliveryError, DeliveryReport, EventKind, Subscriber,
    Subscription, SyncEvent,
};
pub use cache::{CacheConfig, CacheEntry, CacheStats, Freshness, TieredCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Error;
pub use ledger::{VersionLedger, VersionLedgerEntry, DEFAULT_HISTORY_LIMIT};
pub use record::{merge, payload, Change, Patch, Payload, VersionedRecord};
pub use resolver::{ConflictResolver, WriteMode};
pub use scope::{Audience, AudiencePolicy, OwnerScoped, Role, UnknownRole, Viewer};
pub use store::{SyncConfig, SyncStore};

/// Type aliases for clarity
pub type EntityId = String;
pub type CollectionName = String;
pub type ScopeId = String;
pub type Version = u64;
pub type Timestamp = u64;
