//! Portal identity extraction.
//!
//! The portal's upstream auth layer authenticates the caller and forwards
//! who they are in three headers. This server trusts those headers and only
//! turns them into a [`Viewer`] plus an actor name for audit fields.

use agency_sync::{Role, Viewer};
use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::AppState;

pub const ROLE_HEADER: &str = "x-portal-role";
pub const SCOPE_HEADER: &str = "x-portal-scope";
pub const ACTOR_HEADER: &str = "x-portal-actor";

/// Authenticated caller extracted from request headers.
#[derive(Debug, Clone)]
pub struct PortalIdentity {
    /// Role and tenant the caller acts as
    pub viewer: Viewer,
    /// Name recorded as `modifiedBy` on writes
    pub actor: String,
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl FromRequestParts<AppState> for PortalIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let role: Role = header(parts, ROLE_HEADER)
            .ok_or_else(|| AppError::Unauthorized("Missing X-Portal-Role header".into()))?
            .parse()
            .map_err(|e: agency_sync::UnknownRole| AppError::BadRequest(e.to_string()))?;

        let scope_id = header(parts, SCOPE_HEADER).map(str::to_string);
        if !role.is_broad() && scope_id.is_none() {
            return Err(AppError::Unauthorized(format!(
                "X-Portal-Scope is required for the {role} role"
            )));
        }

        let actor = match header(parts, ACTOR_HEADER) {
            Some(actor) => actor.to_string(),
            None => match &scope_id {
                Some(scope) => format!("{role}-{scope}"),
                None => role.to_string(),
            },
        };

        Ok(PortalIdentity {
            viewer: Viewer::new(role, scope_id),
            actor,
        })
    }
}
