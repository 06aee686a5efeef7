use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::{
    empty_trip::ActiveSearch,
    trip::{TripAction, TripState},
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("{message}")]
    Validation {
        field: Option<&'static str>,
        message: String,
    },
    #[error("cannot {action} a trip in state '{state}'")]
    InvalidTransition {
        action: TripAction,
        state: TripState,
    },
    #[error("{0}")]
    InvalidState(String),
    #[error("an active client search already exists: {}", existing.search_number)]
    Conflict { existing: ActiveSearch },
    #[error(
        "search {search_number} was cancelled but the replacement could not be created: {source}"
    )]
    ReplaceFailed {
        search_number: String,
        #[source]
        source: Box<AppError>,
    },
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Network(#[from] reqwest::Error),
    #[error("backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            field: None,
            message: message.into(),
        }
    }

    pub fn field_validation(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: Some(field),
            message: message.into(),
        }
    }

    /// Stable machine-readable code rendered in every error body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::Validation { .. } => "validation_error",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::InvalidState(_) => "invalid_state",
            AppError::Conflict { .. } => "conflict",
            AppError::ReplaceFailed { .. } => "replace_failed",
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Network(err) if err.is_timeout() => "timeout",
            AppError::Network(_) => "network_error",
            AppError::Backend(_) => "backend_error",
            AppError::Io(_) | AppError::Other(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. }
            | AppError::InvalidTransition { .. }
            | AppError::InvalidState(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Network(_) | AppError::Backend(_) | AppError::ReplaceFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Config(_) | AppError::Io(_) | AppError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        match &self {
            AppError::Validation {
                field: Some(field), ..
            } => {
                body["field"] = json!(field);
            }
            AppError::InvalidTransition { action, state } => {
                body["action"] = json!(action);
                body["state"] = json!(state);
            }
            AppError::Conflict { existing } => {
                body["existing"] = json!(existing);
            }
            AppError::ReplaceFailed { search_number, .. } => {
                body["cancelled_search"] = json!(search_number);
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}
