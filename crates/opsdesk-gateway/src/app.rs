use axum::{routing::get, Router};
use opsdesk_core::OpsdeskConfig;
use opsdesk_scheduler::{RecurrenceScheduler, SqliteScheduleStore};
use opsdesk_tasks::{ActivityLog, TaskManager};
use std::sync::Arc;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: OpsdeskConfig,
    pub store: Arc<SqliteScheduleStore>,
    pub tasks: Arc<TaskManager>,
    pub activity: Arc<ActivityLog>,
    /// Every store mutation is followed by the matching lifecycle call.
    pub scheduler: RecurrenceScheduler,
}

impl AppState {
    pub fn new(
        config: OpsdeskConfig,
        store: Arc<SqliteScheduleStore>,
        tasks: Arc<TaskManager>,
        activity: Arc<ActivityLog>,
        scheduler: RecurrenceScheduler,
    ) -> Self {
        Self {
            config,
            store,
            tasks,
            activity,
            scheduler,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{health, recurrences, tasks, timers};

    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/recurrences",
            get(recurrences::list_handler).post(recurrences::create_handler),
        )
        .route(
            "/recurrences/{id}",
            get(recurrences::get_handler)
                .put(recurrences::update_handler)
                .delete(recurrences::delete_handler),
        )
        .route("/recurrences/{id}/activity", get(recurrences::activity_handler))
        .route("/admin/timers", get(timers::timers_handler))
        .route("/tasks", get(tasks::tasks_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
