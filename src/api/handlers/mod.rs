use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::scope::{Actor, ReleaseScope};
use crate::catalog::{self, CreateTranslationKeyInput, TranslationKeyWithVariants};
use crate::db::{Database, Intent};
use crate::error::StoreError;
use crate::models::*;

type ApiResult<T> = Result<T, (StatusCode, String)>;

// ============================================================
// Error Handling
// ============================================================

/// Map a store error to a status code.
///
/// Classified errors are returned to the client as-is. Anything else is logged
/// and replaced by a generic message so internals do not leak.
fn store_error(e: StoreError) -> (StatusCode, String) {
    let status = match &e {
        StoreError::Validation(_) => StatusCode::BAD_REQUEST,
        StoreError::DuplicateEntity { .. } | StoreError::ReleaseConflicts { .. } => {
            StatusCode::CONFLICT
        }
        StoreError::EntityNotFound(_) | StoreError::ReleaseNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::ReleaseState(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StoreError::ScopeResolution(_) => StatusCode::PRECONDITION_FAILED,
        StoreError::Database(_) | StoreError::Serialization(_) | StoreError::LockPoisoned => {
            tracing::error!("Internal error: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        }
    };

    tracing::warn!(code = e.code(), "Request rejected: {}", e);
    (status, e.to_string())
}

fn spec(entity_type: &str) -> ApiResult<&'static EntitySpec> {
    catalog::spec_for(entity_type).ok_or((
        StatusCode::NOT_FOUND,
        format!("Unknown entity type: {}", entity_type),
    ))
}

fn object(value: Value) -> ApiResult<Attributes> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err((
            StatusCode::BAD_REQUEST,
            "Request body must be a JSON object".to_string(),
        )),
    }
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Releases
// ============================================================

pub async fn list_releases(State(db): State<Database>) -> ApiResult<Json<Vec<Release>>> {
    db.list_releases().map(Json).map_err(store_error)
}

pub async fn current_release(State(db): State<Database>) -> ApiResult<Json<Release>> {
    db.current_release()
        .map_err(store_error)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "No release is deployed".to_string()))
}

pub async fn get_release(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Release>> {
    db.get_release(id)
        .map_err(store_error)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "Release not found".to_string()))
}

pub async fn create_release(
    State(db): State<Database>,
    Actor(user): Actor,
    Json(input): Json<CreateReleaseInput>,
) -> ApiResult<(StatusCode, Json<Release>)> {
    db.create_release(input, &user)
        .map(|r| (StatusCode::CREATED, Json(r)))
        .map_err(store_error)
}

pub async fn update_release(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateReleaseInput>,
) -> ApiResult<Json<Release>> {
    db.update_release(id, input).map(Json).map_err(store_error)
}

pub async fn close_release(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Release>> {
    let input = UpdateReleaseInput {
        status: Some(ReleaseStatus::Closed),
        ..Default::default()
    };
    db.update_release(id, input).map(Json).map_err(store_error)
}

pub async fn deploy_release(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Actor(user): Actor,
) -> ApiResult<Json<Release>> {
    db.deploy_release(id, &user).map(Json).map_err(store_error)
}

pub async fn rollback_to_release(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Actor(user): Actor,
) -> ApiResult<Json<Release>> {
    db.rollback_to_release(id, &user)
        .map(Json)
        .map_err(store_error)
}

pub async fn check_release_conflicts(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ConflictReport>> {
    db.check_release_conflicts(id)
        .map(Json)
        .map_err(store_error)
}

pub async fn get_release_stats(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ReleaseStats>> {
    db.get_release_stats(id).map(Json).map_err(store_error)
}

pub async fn preview_diff(
    State(db): State<Database>,
    Path((from, to)): Path<(Uuid, Uuid)>,
    Query(filter): Query<DiffFilter>,
) -> ApiResult<Json<ReleaseDiff>> {
    db.preview_diff(from, to, &filter)
        .map(Json)
        .map_err(store_error)
}

/// Query parameters for resolving a release context.
#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    /// Defaults to `read`.
    pub intent: Option<Intent>,
}

/// What a request would resolve to, with the release itself for display.
#[derive(Debug, Serialize, Deserialize)]
pub struct ContextResponse {
    #[serde(flatten)]
    pub context: ReleaseContext,
    pub release: Release,
}

pub async fn release_context(
    State(db): State<Database>,
    ReleaseScope(explicit): ReleaseScope,
    Query(query): Query<ContextQuery>,
) -> ApiResult<Json<ContextResponse>> {
    let intent = query.intent.unwrap_or(Intent::Read);
    let context = db.release_context(intent, explicit).map_err(store_error)?;
    let release = db
        .get_release(context.release_id)
        .map_err(store_error)?
        .ok_or((StatusCode::NOT_FOUND, "Release not found".to_string()))?;
    Ok(Json(ContextResponse { context, release }))
}

// ============================================================
// Entities
// ============================================================

/// Find entities of a type. Every query parameter except `release` is an
/// equality filter on the entity's fields; number and boolean fields match
/// their text form (`?priority=3`, `?featured=true`).
pub async fn find_entities(
    State(db): State<Database>,
    Path(entity_type): Path<String>,
    ReleaseScope(release_id): ReleaseScope,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<EntityRecord>>> {
    let spec = spec(&entity_type)?;
    let filter: Attributes = params
        .into_iter()
        .filter(|(key, _)| key != "release")
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    db.find(spec, &filter, ReadOptions { release_id })
        .map(Json)
        .map_err(store_error)
}

pub async fn get_entity(
    State(db): State<Database>,
    Path((entity_type, id)): Path<(String, Uuid)>,
    ReleaseScope(release_id): ReleaseScope,
) -> ApiResult<Json<EntityRecord>> {
    let spec = spec(&entity_type)?;
    db.get(spec, id, ReadOptions { release_id })
        .map_err(store_error)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "Entity not found".to_string()))
}

pub async fn create_entity(
    State(db): State<Database>,
    Path(entity_type): Path<String>,
    ReleaseScope(release_id): ReleaseScope,
    Actor(user_id): Actor,
    Json(draft): Json<Value>,
) -> ApiResult<(StatusCode, Json<EntityRecord>)> {
    let spec = spec(&entity_type)?;
    let opts = WriteOptions {
        user_id,
        release_id,
    };
    db.create(spec, object(draft)?, &opts)
        .map(|e| (StatusCode::CREATED, Json(e)))
        .map_err(store_error)
}

pub async fn patch_entity(
    State(db): State<Database>,
    Path((entity_type, id)): Path<(String, Uuid)>,
    ReleaseScope(release_id): ReleaseScope,
    Actor(user_id): Actor,
    Json(partial): Json<Value>,
) -> ApiResult<Json<EntityRecord>> {
    let spec = spec(&entity_type)?;
    let opts = WriteOptions {
        user_id,
        release_id,
    };
    db.patch(spec, id, object(partial)?, &opts)
        .map(Json)
        .map_err(store_error)
}

pub async fn remove_entity(
    State(db): State<Database>,
    Path((entity_type, id)): Path<(String, Uuid)>,
    ReleaseScope(release_id): ReleaseScope,
    Actor(user_id): Actor,
) -> ApiResult<StatusCode> {
    let spec = spec(&entity_type)?;
    let opts = WriteOptions {
        user_id,
        release_id,
    };
    db.remove(spec, id, &opts)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(store_error)
}

pub async fn entity_history(
    State(db): State<Database>,
    Path((entity_type, id)): Path<(String, Uuid)>,
) -> ApiResult<Json<EntityHistory>> {
    spec(&entity_type)?;
    db.history(id)
        .map_err(store_error)?
        .filter(|h| h.entity_type == entity_type)
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "Entity not found".to_string()))
}

// ============================================================
// Translation keys
// ============================================================

/// Create a translation key and its variants in one transaction.
pub async fn create_translation_key(
    State(db): State<Database>,
    ReleaseScope(release_id): ReleaseScope,
    Actor(user_id): Actor,
    Json(input): Json<CreateTranslationKeyInput>,
) -> ApiResult<(StatusCode, Json<TranslationKeyWithVariants>)> {
    let opts = WriteOptions {
        user_id,
        release_id,
    };
    catalog::create_translation_key(&db, input, &opts)
        .map(|k| (StatusCode::CREATED, Json(k)))
        .map_err(store_error)
}
