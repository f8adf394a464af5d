//! Request-scoped release selection and caller identity.
//!
//! A request names its release with the `release` query parameter or the
//! `X-Release-Id` header. Without either, the store resolves its default scope.

use axum::{
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
};
use serde::Deserialize;
use uuid::Uuid;

pub const RELEASE_HEADER: &str = "X-Release-Id";
pub const USER_HEADER: &str = "X-User-Id";

/// Explicit release requested by the caller, if any.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReleaseScope(pub Option<Uuid>);

#[derive(Debug, Deserialize)]
struct ScopeQuery {
    release: Option<Uuid>,
}

impl<S> FromRequestParts<S> for ReleaseScope
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(query) = Query::<ScopeQuery>::try_from_uri(&parts.uri)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid release parameter: {}", e)))?;
        if let Some(id) = query.release {
            return Ok(Self(Some(id)));
        }

        match parts.headers.get(RELEASE_HEADER) {
            None => Ok(Self(None)),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|s| Uuid::parse_str(s.trim()).ok())
                .map(|id| Self(Some(id)))
                .ok_or((
                    StatusCode::BAD_REQUEST,
                    format!("Invalid {} header", RELEASE_HEADER),
                )),
        }
    }
}

/// Identity recorded on writes. Authentication happens in front of this service.
#[derive(Debug, Clone)]
pub struct Actor(pub String);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("anonymous");
        Ok(Self(user.to_string()))
    }
}
