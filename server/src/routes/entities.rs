//! Entity endpoint routes.

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
    routing::{get, post},
    Json, Router,
};

use crate::auth::PortalIdentity;
use crate::error::Result;
use crate::handlers::{
    expected_version, handle_get, handle_history, handle_list, handle_patch, handle_rollback,
    handle_websocket_connection, HistoryResponse, RollbackRequest,
};
use crate::AppState;
use agency_sync::{Patch, VersionedRecord};

/// Create entity routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/entities/{collection}", get(list_handler))
        .route(
            "/entities/{collection}/{id}",
            get(get_handler).patch(patch_handler),
        )
        .route("/entities/{collection}/{id}/history", get(history_handler))
        .route("/entities/{collection}/{id}/rollback", post(rollback_handler))
        .route("/ws", get(websocket_handler))
}

/// GET /entities/{collection} - List what the caller may see.
async fn list_handler(
    State(state): State<AppState>,
    identity: PortalIdentity,
    Path(collection): Path<String>,
) -> Result<Json<Vec<VersionedRecord>>> {
    let records = handle_list(&state.store, &collection, &identity.viewer).await?;
    Ok(Json(records))
}

/// GET /entities/{collection}/{id} - Read one record.
async fn get_handler(
    State(state): State<AppState>,
    identity: PortalIdentity,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<VersionedRecord>> {
    let record = handle_get(&state.store, &collection, &id, &identity.viewer).await?;
    Ok(Json(record))
}

/// PATCH /entities/{collection}/{id} - Merge fields into a record.
///
/// `If-Match: <version>` rejects the patch if the record moved on.
async fn patch_handler(
    State(state): State<AppState>,
    identity: PortalIdentity,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(patch): Json<Patch>,
) -> Result<Json<VersionedRecord>> {
    let expected = expected_version(&headers)?;
    let record = handle_patch(&state.store, &collection, &id, &identity, patch, expected).await?;
    Ok(Json(record))
}

/// GET /entities/{collection}/{id}/history - Retained versions.
async fn history_handler(
    State(state): State<AppState>,
    identity: PortalIdentity,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<HistoryResponse>> {
    let history = handle_history(&state.store, &collection, &id, &identity.viewer).await?;
    Ok(Json(history))
}

/// POST /entities/{collection}/{id}/rollback - Restore a retained version.
async fn rollback_handler(
    State(state): State<AppState>,
    identity: PortalIdentity,
    Path((collection, id)): Path<(String, String)>,
    Json(request): Json<RollbackRequest>,
) -> Result<Json<VersionedRecord>> {
    let record = handle_rollback(&state.store, &collection, &id, &identity, request).await?;
    Ok(Json(record))
}

/// GET /ws - Stream change events visible to the caller.
async fn websocket_handler(
    State(state): State<AppState>,
    identity: PortalIdentity,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, state.store, state.conn_manager, identity.viewer)
    })
}
