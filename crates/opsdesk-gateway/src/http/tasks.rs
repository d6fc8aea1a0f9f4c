//! Materialized tasks — GET /tasks
//!
//! Query: `?recurrence_id=xxx&limit=n` (both optional, limit defaults to 50)

use axum::{
    extract::{Query, State},
    Json,
};
use opsdesk_tasks::Task;
use serde::Deserialize;
use std::sync::Arc;

use crate::app::AppState;
use crate::http::error::ApiError;

#[derive(Deserialize)]
pub struct TaskQuery {
    pub recurrence_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn tasks_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = state
        .tasks
        .list(query.recurrence_id.as_deref(), query.limit)?;
    Ok(Json(tasks))
}
