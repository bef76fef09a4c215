use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::AppError;
use crate::models::{
    CreateStudentRequest, GetStudentsResponse, ScoreRequest, Student, Submission,
    UpdateStudentRequest,
};
use crate::state::AppState;

/// GET /api/students - Roster ordered by number.
pub async fn list_students(
    State(state): State<AppState>,
) -> Result<Json<GetStudentsResponse>, AppError> {
    let students = state.runtime.students()?.list();
    Ok(Json(GetStudentsResponse { students }))
}

/// POST /api/students - Add a student.
pub async fn create_student(
    State(state): State<AppState>,
    Json(req): Json<CreateStudentRequest>,
) -> Result<Response, AppError> {
    let student = state.runtime.students()?.add(&req.name, req.number)?;
    Ok((StatusCode::CREATED, Json(student)).into_response())
}

/// PUT /api/students/{id} - Rename a student.
pub async fn update_student(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(req): Json<UpdateStudentRequest>,
) -> Result<Json<Student>, AppError> {
    Ok(Json(state.runtime.students()?.rename(id, &req.name)?))
}

/// DELETE /api/students/{id} - Remove a student and their submissions.
pub async fn delete_student(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<StatusCode, AppError> {
    state.runtime.students()?.remove(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/students/{id}/toggle - Flip the submission on the current task.
pub async fn toggle_student(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Submission>, AppError> {
    Ok(Json(state.runtime.toggle_student(id)?))
}

/// PUT /api/students/{id}/score - Set or clear a score on the current task.
pub async fn set_score(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(req): Json<ScoreRequest>,
) -> Result<Json<Submission>, AppError> {
    Ok(Json(state.runtime.set_score(id, req.score)?))
}
