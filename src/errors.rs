use crate::models::chat::SensitiveDataType;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("caller is not authorized for this chat")]
    Unauthorized,
    #[error("question is empty after sanitization")]
    EmptyQuestion,
    #[error("malformed identifier: {0}")]
    BadIdentifier(String),
    #[error("question contains sensitive data: {0:?}")]
    SensitiveData(Vec<SensitiveDataType>),
    #[error("question rejected by content guardrails")]
    GuardRails,
    #[error("agent workflow failed: {0}")]
    Workflow(String),
    #[error("llm request failed: {0}")]
    Llm(String),
    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ChatError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ChatError::EmptyQuestion => (StatusCode::BAD_REQUEST, self.to_string()),
            ChatError::BadIdentifier(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ChatError::SensitiveData(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            ChatError::GuardRails => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            ChatError::Storage(e) => {
                tracing::error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            _ => {
                tracing::error!("request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                message,
            }),
        )
            .into_response()
    }
}
