//! HTTP route definitions.

mod entities;
mod health;

use crate::AppState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new().merge(health::routes()).merge(entities::routes())
}

/// Build the full application with middleware and state.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::ConnectionManager;
    use agency_sync::{payload, InMemoryBackend, SyncConfig, SyncStore, VersionedRecord};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, InMemoryBackend) {
        let backend = InMemoryBackend::with_records([
            VersionedRecord::new("A1", "agencies", payload(json!({"name": "Northbridge", "rate": 10})), 0, "seed")
                .owned_by("A1"),
            VersionedRecord::new("A2", "agencies", payload(json!({"name": "Southgate", "rate": 12})), 0, "seed")
                .owned_by("A2"),
            VersionedRecord::new("U1", "users", payload(json!({"email": "u1@example.com"})), 0, "seed")
                .owned_by("A1"),
        ]);
        let state = AppState {
            store: Arc::new(SyncStore::new(Arc::new(backend.clone()), SyncConfig::default())),
            conn_manager: ConnectionManager::new_shared(),
        };
        (create_app(state), backend)
    }

    fn request(method: &str, uri: &str, role: Option<(&str, Option<&str>)>) -> axum::http::request::Builder {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((role, scope)) = role {
            builder = builder.header("X-Portal-Role", role);
            if let Some(scope) = scope {
                builder = builder.header("X-Portal-Scope", scope);
            }
        }
        builder
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn patch_body(value: Value) -> Body {
        Body::from(value.to_string())
    }

    const ADMIN: Option<(&str, Option<&str>)> = Some(("admin", None));
    const AGENCY_A1: Option<(&str, Option<&str>)> = Some(("agency", Some("A1")));

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let (status, body) = send(&app, request("GET", "/health", None).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let (app, _) = app();
        let (status, _) = send(&app, request("GET", "/entities/agencies", None).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = request("GET", "/entities/agencies", Some(("agency", None)))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::UNAUTHORIZED);

        let req = request("GET", "/entities/agencies", Some(("student", None)))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_is_scoped() {
        let (app, _) = app();

        let (status, body) = send(&app, request("GET", "/entities/agencies", ADMIN).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(2));

        let (_, body) = send(&app, request("GET", "/entities/agencies", AGENCY_A1).body(Body::empty()).unwrap()).await;
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["id"], "A1");
        assert_eq!(body[0]["lastModified"], 0);
    }

    #[tokio::test]
    async fn test_get_hides_other_tenants_and_collections() {
        let (app, _) = app();

        let (status, body) = send(&app, request("GET", "/entities/agencies/A1", AGENCY_A1).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 1);

        let (status, _) = send(&app, request("GET", "/entities/agencies/A2", AGENCY_A1).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, request("GET", "/entities/users/A1", ADMIN).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, request("GET", "/entities/agencies/missing", ADMIN).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_patch_with_if_match_conflicts() {
        let (app, backend) = app();

        let req = request("PATCH", "/entities/agencies/A1", ADMIN)
            .header("X-Portal-Actor", "admin-1")
            .header("If-Match", "1")
            .header("Content-Type", "application/json")
            .body(patch_body(json!({"rate": 20})))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 2);
        assert_eq!(body["modifiedBy"], "admin-1");
        assert_eq!(backend.stored("A1").map(|r| r.version), Some(2));

        let req = request("PATCH", "/entities/agencies/A1", ADMIN)
            .header("X-Portal-Actor", "admin-2")
            .header("If-Match", "1")
            .header("Content-Type", "application/json")
            .body(patch_body(json!({"rate": 30})))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], crate::error::CONFLICT_MESSAGE);
        assert_eq!(body["currentVersion"], 2);
    }

    #[tokio::test]
    async fn test_patch_without_if_match_is_last_write_wins() {
        let (app, _) = app();
        for rate in [20, 30] {
            let req = request("PATCH", "/entities/agencies/A1", AGENCY_A1)
                .header("Content-Type", "application/json")
                .body(patch_body(json!({"rate": rate})))
                .unwrap();
            assert_eq!(send(&app, req).await.0, StatusCode::OK);
        }

        let (_, body) = send(&app, request("GET", "/entities/agencies/A1", AGENCY_A1).body(Body::empty()).unwrap()).await;
        assert_eq!(body["version"], 3);
        assert_eq!(body["payload"]["rate"], 30);
        assert_eq!(body["modifiedBy"], "agency-A1");
    }

    #[tokio::test]
    async fn test_agency_cannot_patch_other_tenant() {
        let (app, backend) = app();
        let req = request("PATCH", "/entities/agencies/A2", AGENCY_A1)
            .header("Content-Type", "application/json")
            .body(patch_body(json!({"rate": 0})))
            .unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::NOT_FOUND);
        assert_eq!(backend.save_count(), 0);
    }

    #[tokio::test]
    async fn test_history_and_rollback() {
        let (app, _) = app();
        for rate in [11, 12, 13] {
            let req = request("PATCH", "/entities/agencies/A1", ADMIN)
                .header("Content-Type", "application/json")
                .body(patch_body(json!({"rate": rate})))
                .unwrap();
            send(&app, req).await;
        }

        let (status, body) = send(&app, request("GET", "/entities/agencies/A1/history", ADMIN).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["currentVersion"], 4);
        assert_eq!(body["entries"].as_array().map(Vec::len), Some(3));
        assert_eq!(body["entries"][0]["version"], 1);
        assert_eq!(body["entries"][0]["previousData"]["rate"], 10);

        let req = request("POST", "/entities/agencies/A1/rollback", ADMIN)
            .header("X-Portal-Actor", "admin-1")
            .header("Content-Type", "application/json")
            .body(patch_body(json!({"version": 1})))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 5);
        assert_eq!(body["payload"]["rate"], 10);
        assert_eq!(body["modifiedBy"], "admin-1 (rollback to v1)");

        let req = request("POST", "/entities/agencies/A1/rollback", ADMIN)
            .header("Content-Type", "application/json")
            .body(patch_body(json!({"version": 42})))
            .unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_backend_outage_is_service_unavailable() {
        let (app, backend) = app();
        backend.set_failing(true);
        let (status, _) = send(&app, request("GET", "/entities/agencies/A1", ADMIN).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_bad_if_match_is_bad_request() {
        let (app, _) = app();
        let req = request("PATCH", "/entities/agencies/A1", ADMIN)
            .header("If-Match", "latest")
            .header("Content-Type", "application/json")
            .body(patch_body(json!({"rate": 1})))
            .unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::BAD_REQUEST);
    }
}
