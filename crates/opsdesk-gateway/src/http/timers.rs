//! Operator view of the live timer registry — GET /admin/timers

use axum::{extract::State, Json};
use opsdesk_scheduler::TimerInfo;
use std::sync::Arc;

use crate::app::AppState;

/// GET /admin/timers — every registered timer, soonest first.
pub async fn timers_handler(State(state): State<Arc<AppState>>) -> Json<Vec<TimerInfo>> {
    Json(state.scheduler.timers())
}
