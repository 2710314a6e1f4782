//! Error types for the sync engine.

use crate::{EntityId, Version};
use thiserror::Error;

/// All possible errors from the sync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("record not found: {0}")]
    NotFound(EntityId),

    #[error("version conflict: expected {expected}, got {actual}")]
    VersionConflict { expected: Version, actual: Version },

    #[error("{}", version_not_found_message(.id, .version, .oldest_retained))]
    VersionNotFound {
        id: EntityId,
        version: Version,
        /// Oldest version still held in the ledger, if any.
        oldest_retained: Option<Version>,
    },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("subscriber '{subscriber_id}' callback failed: {message}")]
    SubscriberCallback {
        subscriber_id: String,
        message: String,
    },

    #[error("subscriber already registered: {0}")]
    DuplicateSubscriber(String),
}

fn version_not_found_message(
    id: &str,
    version: &Version,
    oldest_retained: &Option<Version>,
) -> String {
    match *oldest_retained {
        Some(oldest) if *version < oldest => format!(
            "version {version} of {id} is no longer in history (oldest retained: {oldest})"
        ),
        _ => format!("version {version} of {id} not found in history"),
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
