use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use rollcall_core::{BusError, RegistryError, StoreError};

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Student not found: {0}")]
    StudentNotFound(u32),

    #[error("Task not found: {0}")]
    TaskNotFound(u32),

    #[error("No task selected")]
    NoCurrentTask,

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid score {0}: must be between 0 and 100")]
    InvalidScore(u8),

    #[error("Student number already taken: {0}")]
    DuplicateNumber(u32),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Startup failed, critical modules unavailable: {}", .0.join(", "))]
    Startup(Vec<String>),

    #[error("Module unavailable: {0}")]
    Unavailable(&'static str),

    #[error("No handler for {0}")]
    Unhandled(&'static str),

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Domain(DomainError::StudentNotFound(_))
            | AppError::Domain(DomainError::TaskNotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Domain(DomainError::NoCurrentTask)
            | AppError::Domain(DomainError::DuplicateNumber(_)) => StatusCode::CONFLICT,
            AppError::Domain(DomainError::InvalidName(_))
            | AppError::Domain(DomainError::InvalidScore(_))
            | AppError::Rejected(_)
            | AppError::Bus(_)
            | AppError::Store(StoreError::InvalidKey(_))
            | AppError::Store(StoreError::InvalidImport(_)) => StatusCode::BAD_REQUEST,
            AppError::Unavailable(_) | AppError::Unhandled(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}
