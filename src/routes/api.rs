use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use rollcall_core::{ModuleInfo, StateMap};

use crate::error::AppError;
use crate::state::AppState;
use crate::view::RosterSnapshot;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetModulesResponse {
    pub modules: Vec<ModuleInfo>,
    pub initialization_order: Vec<String>,
}

/// GET /api/roster - Last rendered roster.
pub async fn get_roster(State(state): State<AppState>) -> Result<Json<RosterSnapshot>, AppError> {
    Ok(Json(state.runtime.view()?.snapshot()))
}

/// GET /api/state - The whole state mapping.
pub async fn get_state(State(state): State<AppState>) -> Json<StateMap> {
    Json(state.runtime.state().get_state())
}

/// PATCH /api/state - Merge keys into the state.
pub async fn patch_state(
    State(state): State<AppState>,
    Json(updates): Json<StateMap>,
) -> Result<Json<StateMap>, AppError> {
    Ok(Json(state.runtime.set_state(updates)?))
}

/// POST /api/state/reset - Restore the defaults.
pub async fn reset_state(State(state): State<AppState>) -> Result<Json<StateMap>, AppError> {
    Ok(Json(state.runtime.reset_state()?))
}

/// GET /api/state/export - State as a JSON document.
pub async fn export_state(State(state): State<AppState>) -> Result<Response, AppError> {
    let text = state.runtime.export_state()?;
    Ok(([(header::CONTENT_TYPE, "application/json")], text).into_response())
}

/// POST /api/state/import - Replace the state with an exported document.
///
/// The body is taken as raw text so malformed documents are reported by the
/// store rather than the extractor.
pub async fn import_state(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<StateMap>, AppError> {
    Ok(Json(state.runtime.import_state(&body)?))
}

/// GET /api/modules - Registered modules and their lifecycle state.
pub async fn get_modules(State(state): State<AppState>) -> Json<GetModulesResponse> {
    let registry = state.runtime.registry();
    Json(GetModulesResponse {
        modules: registry.modules(),
        initialization_order: registry.initialization_order(),
    })
}
