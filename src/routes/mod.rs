pub mod api;
pub mod students;
pub mod tasks;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Roster
        .route("/api/roster", get(api::get_roster))
        // Students
        .route(
            "/api/students",
            get(students::list_students).post(students::create_student),
        )
        .route(
            "/api/students/{id}",
            put(students::update_student).delete(students::delete_student),
        )
        .route("/api/students/{id}/toggle", post(students::toggle_student))
        .route("/api/students/{id}/score", put(students::set_score))
        // Tasks
        .route("/api/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/api/tasks/{id}", delete(tasks::delete_task))
        .route("/api/tasks/{id}/switch", post(tasks::switch_task))
        // State
        .route("/api/state", get(api::get_state).patch(api::patch_state))
        .route("/api/state/reset", post(api::reset_state))
        .route("/api/state/export", get(api::export_state))
        .route("/api/state/import", post(api::import_state))
        // Runtime introspection
        .route("/api/modules", get(api::get_modules))
        // Health check
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}
