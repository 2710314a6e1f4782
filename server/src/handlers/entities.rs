//! Entity handlers - reads, patches, history and rollback.
//!
//! Every handler checks that the caller's viewer is in the record's audience
//! and answers "not found" otherwise, so a tenant cannot probe for ids it
//! does not own.

use crate::auth::PortalIdentity;
use crate::error::{AppError, Result};
use agency_sync::{
    Error, Patch, SyncStore, Version, VersionLedgerEntry, VersionedRecord, Viewer,
};
use axum::http::{header::IF_MATCH, HeaderMap};
use serde::{Deserialize, Serialize};

/// Request body for rollback.
#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub version: Version,
}

/// Response for history.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub entity_id: String,
    pub current_version: Version,
    pub entries: Vec<VersionLedgerEntry>,
}

/// Read the expected version from `If-Match`, if present.
///
/// Accepts `3`, `"3"` and `W/"3"`.
pub fn expected_version(headers: &HeaderMap) -> Result<Option<Version>> {
    let Some(value) = headers.get(IF_MATCH) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| AppError::BadRequest("If-Match must be ASCII".into()))?
        .trim();
    let raw = raw.strip_prefix("W/").unwrap_or(raw).trim_matches('"');
    raw.parse()
        .map(Some)
        .map_err(|_| AppError::BadRequest(format!("If-Match must be a version number, got {raw:?}")))
}

/// Load one record the viewer may see.
pub async fn handle_get(
    store: &SyncStore,
    collection: &str,
    id: &str,
    viewer: &Viewer,
) -> Result<VersionedRecord> {
    let record = store.get(id).await?;
    if record.collection != collection || !store.audience(&record).admits(viewer) {
        return Err(Error::NotFound(id.to_string()).into());
    }
    Ok(record)
}

/// List a collection as the viewer sees it.
pub async fn handle_list(
    store: &SyncStore,
    collection: &str,
    viewer: &Viewer,
) -> Result<Vec<VersionedRecord>> {
    Ok(store.get_all(collection, viewer).await?)
}

/// Apply a patch, strictly when an expected version is given.
pub async fn handle_patch(
    store: &SyncStore,
    collection: &str,
    id: &str,
    identity: &PortalIdentity,
    patch: Patch,
    expected: Option<Version>,
) -> Result<VersionedRecord> {
    handle_get(store, collection, id, &identity.viewer).await?;

    let record = match expected {
        Some(version) => {
            store
                .update_with_version(id, patch, &identity.actor, version)
                .await?
        }
        None => store.update_unconditional(id, patch, &identity.actor).await?,
    };
    Ok(record)
}

/// Retained history for a record, oldest first.
pub async fn handle_history(
    store: &SyncStore,
    collection: &str,
    id: &str,
    viewer: &Viewer,
) -> Result<HistoryResponse> {
    let record = handle_get(store, collection, id, viewer).await?;
    Ok(HistoryResponse {
        entity_id: record.id,
        current_version: record.version,
        entries: store.get_version_history(id),
    })
}

/// Restore a retained version as a new version.
pub async fn handle_rollback(
    store: &SyncStore,
    collection: &str,
    id: &str,
    identity: &PortalIdentity,
    request: RollbackRequest,
) -> Result<VersionedRecord> {
    handle_get(store, collection, id, &identity.viewer).await?;
    Ok(store.rollback(id, request.version, &identity.actor).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn if_match(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(IF_MATCH, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_expected_version_forms() {
        assert_eq!(expected_version(&HeaderMap::new()).unwrap(), None);
        assert_eq!(expected_version(&if_match("3")).unwrap(), Some(3));
        assert_eq!(expected_version(&if_match("\"4\"")).unwrap(), Some(4));
        assert_eq!(expected_version(&if_match("W/\"5\"")).unwrap(), Some(5));
        assert!(expected_version(&if_match("*")).is_err());
    }
}
