use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::AppError;
use crate::models::{CreateTaskRequest, GetTasksResponse, Task};
use crate::state::AppState;

/// GET /api/tasks - Tasks and the current selection.
pub async fn list_tasks(State(state): State<AppState>) -> Result<Json<GetTasksResponse>, AppError> {
    let tasks = state.runtime.tasks()?;
    Ok(Json(GetTasksResponse {
        current_task_id: tasks.current_id(),
        tasks: tasks.list(),
    }))
}

/// POST /api/tasks - Add a task.
pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Response, AppError> {
    let task = state.runtime.tasks()?.add(&req.name)?;
    Ok((StatusCode::CREATED, Json(task)).into_response())
}

/// DELETE /api/tasks/{id} - Remove a task.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<StatusCode, AppError> {
    state.runtime.tasks()?.remove(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/tasks/{id}/switch - Make a task current.
pub async fn switch_task(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.runtime.switch_task(id)?))
}
