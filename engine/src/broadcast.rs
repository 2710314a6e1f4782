//! Role-scoped fan-out of change events.
//!
//! Subscribers register a [`Viewer`] and a callback. Each accepted mutation
//! becomes one [`SyncEvent`] carrying its [`Audience`]; the router calls back
//! every subscriber the audience admits, synchronously and in registration
//! order. A failing or panicking callback is logged and skipped; it never
//! stops delivery to the rest or reaches the broadcaster's caller.
//!
//! [`BroadcastRouter::subscribe`] returns a [`Subscription`] that unregisters
//! on drop, so a forgotten handle cannot leak a listener.

use crate::error::{Error, Result};
use crate::scope::{Audience, Viewer};
use crate::{EntityId, Timestamp, Version, VersionedRecord};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// What happened to the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A patch was accepted.
    Updated,
    /// The payload was restored from history.
    RolledBack {
        #[serde(rename = "targetVersion")]
        target_version: Version,
    },
}

/// Notification of an accepted mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    pub entity_id: EntityId,
    /// The record as committed
    pub data: VersionedRecord,
    pub version: Version,
    pub timestamp: Timestamp,
    pub modified_by: String,
    pub audience: Audience,
}

impl SyncEvent {
    /// Build an event describing a freshly committed record.
    pub fn committed(kind: EventKind, record: VersionedRecord, audience: Audience) -> Self {
        Self {
            kind,
            entity_id: record.id.clone(),
            version: record.version,
            timestamp: record.last_modified,
            modified_by: record.modified_by.clone(),
            data: record,
            audience,
        }
    }

    /// Whether `viewer` should receive this event.
    pub fn is_visible_to(&self, viewer: &Viewer) -> bool {
        self.audience.admits(viewer)
    }
}

/// Error a callback reports back to the router.
pub type DeliveryError = Box<dyn std::error::Error + Send + Sync>;

/// Subscriber callback.
pub type Callback = Arc<dyn Fn(&SyncEvent) -> std::result::Result<(), DeliveryError> + Send + Sync>;

/// A registered listener.
pub struct Subscriber {
    pub subscriber_id: String,
    pub viewer: Viewer,
    callback: Callback,
    token: u64,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("subscriber_id", &self.subscriber_id)
            .field("viewer", &self.viewer)
            .finish_non_exhaustive()
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Callbacks that returned successfully
    pub delivered: usize,
    /// Subscribers outside the event's audience
    pub skipped: usize,
    /// Callbacks that returned an error or panicked
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Registry {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    next_token: AtomicU64,
}

impl Registry {
    fn remove(&self, subscriber_id: &str, token: Option<u64>) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| {
            s.subscriber_id != subscriber_id || token.is_some_and(|t| t != s.token)
        });
        before != subscribers.len()
    }
}

/// Fans events out to subscribers whose viewer the event's audience admits.
#[derive(Debug, Clone, Default)]
pub struct BroadcastRouter {
    registry: Arc<Registry>,
}

impl BroadcastRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    ///
    /// The returned handle unregisters when dropped. Fails with
    /// [`Error::DuplicateSubscriber`] if the id is already registered.
    pub fn subscribe<F>(
        &self,
        subscriber_id: impl Into<String>,
        viewer: Viewer,
        callback: F,
    ) -> Result<Subscription>
    where
        F: Fn(&SyncEvent) -> std::result::Result<(), DeliveryError> + Send + Sync + 'static,
    {
        let subscriber_id = subscriber_id.into();
        let mut subscribers = self.registry.subscribers.write();
        if subscribers.iter().any(|s| s.subscriber_id == subscriber_id) {
            return Err(Error::DuplicateSubscriber(subscriber_id));
        }

        let token = self.registry.next_token.fetch_add(1, Ordering::Relaxed);
        subscribers.push(Arc::new(Subscriber {
            subscriber_id: subscriber_id.clone(),
            viewer: viewer.clone(),
            callback: Arc::new(callback),
            token,
        }));
        drop(subscribers);

        tracing::info!(
            subscriber_id = %subscriber_id,
            role = %viewer.role,
            scope_id = ?viewer.scope_id,
            "Subscriber registered"
        );

        Ok(Subscription {
            subscriber_id,
            token,
            registry: Arc::downgrade(&self.registry),
        })
    }

    /// Remove a listener by id. Returns whether one was registered.
    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        let removed = self.registry.remove(subscriber_id, None);
        if removed {
            tracing::info!(subscriber_id = %subscriber_id, "Subscriber unregistered");
        }
        removed
    }

    /// Deliver an event to every admitted subscriber.
    pub fn broadcast(&self, event: &SyncEvent) -> DeliveryReport {
        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let subscribers: Vec<Arc<Subscriber>> = self.registry.subscribers.read().clone();
        let mut report = DeliveryReport::default();

        for subscriber in &subscribers {
            if !event.is_visible_to(&subscriber.viewer) {
                report.skipped += 1;
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(event)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };

            match failure {
                None => report.delivered += 1,
                Some(message) => {
                    report.failed += 1;
                    let err = Error::SubscriberCallback {
                        subscriber_id: subscriber.subscriber_id.clone(),
                        message,
                    };
                    tracing::warn!(
                        entity_id = %event.entity_id,
                        version = event.version,
                        error = %err,
                        "Subscriber callback failed, continuing fan-out"
                    );
                }
            }
        }

        tracing::debug!(
            entity_id = %event.entity_id,
            version = event.version,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "Broadcast event to subscribers"
        );

        report
    }

    /// Number of registered listeners.
    pub fn subscriber_count(&self) -> usize {
        self.registry.subscribers.read().len()
    }

    /// Whether `subscriber_id` is registered.
    pub fn is_subscribed(&self, subscriber_id: &str) -> bool {
        self.registry
            .subscribers
            .read()
            .iter()
            .any(|s| s.subscriber_id == subscriber_id)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Registration handle. Dropping it unregisters the subscriber.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    subscriber_id: String,
    token: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// Unregister now.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            // Token match: a later registration reusing the id is left alone.
            if registry.remove(&self.subscriber_id, Some(self.token)) {
                tracing::info!(subscriber_id = %self.subscriber_id, "Subscription dropped");
            }
        }
    }
}
