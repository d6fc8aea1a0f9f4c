//! Recurrence CRUD — /recurrences
//!
//! Every mutation is persisted first and then reported to the scheduler
//! through its lifecycle hooks, so the timer registry follows the store.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use opsdesk_scheduler::{
    NewRecurrence, RecurrenceDefinition, RecurrencePatch, ScheduleStore, SchedulerError,
};
use opsdesk_tasks::ActivityEntry;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::http::error::ApiError;

#[derive(Deserialize)]
pub struct ActivityQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /recurrences — all non-deleted definitions.
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RecurrenceDefinition>>, ApiError> {
    Ok(Json(state.store.list()?))
}

/// POST /recurrences
pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewRecurrence>, JsonRejection>,
) -> Result<(StatusCode, Json<RecurrenceDefinition>), ApiError> {
    let Json(input) = payload?;
    state.scheduler.validate_context(&input.owner_context)?;
    let definition = state.store.create(input)?;
    state.scheduler.on_created(&definition);
    info!(definition_id = %definition.id, "recurrence registered via API");
    Ok((StatusCode::CREATED, Json(definition)))
}

/// GET /recurrences/{id}
pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RecurrenceDefinition>, ApiError> {
    Ok(Json(live_definition(&state, &id)?))
}

/// PUT /recurrences/{id}: partial edit; absent fields are left unchanged.
pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<RecurrencePatch>, JsonRejection>,
) -> Result<Json<RecurrenceDefinition>, ApiError> {
    let Json(patch) = payload?;
    if let Some(context) = &patch.owner_context {
        state.scheduler.validate_context(context)?;
    }
    let definition = state.store.update(&id, patch)?;
    state.scheduler.on_updated(&definition);
    Ok(Json(definition))
}

/// DELETE /recurrences/{id} — soft delete.
pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.soft_delete(&id)?;
    state.scheduler.on_deleted(&id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /recurrences/{id}/activity
pub async fn activity_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityEntry>>, ApiError> {
    live_definition(&state, &id)?;
    Ok(Json(state.activity.for_definition(&id, query.limit)?))
}

fn live_definition(state: &AppState, id: &str) -> Result<RecurrenceDefinition, ApiError> {
    state
        .store
        .get(id)?
        .filter(|d| !d.is_deleted)
        .ok_or_else(|| SchedulerError::DefinitionNotFound { id: id.to_string() }.into())
}
