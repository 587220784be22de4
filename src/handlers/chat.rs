// src/handlers/chat.rs
//! Chat endpoints: the streaming turn plus conversation management.

use crate::errors::ChatError;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::SecurePermissions;
use crate::models::chat::{ChatRequest, ChatUpdate, MessageFeedback};
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    response::{sse::Event, sse::KeepAlive, IntoResponse, Json, Sse},
    routing::{delete, get, patch, post},
    Router,
};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;

pub fn chat_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chats", get(get_chats))
        .route("/api/chats/messages", post(chat))
        .route("/api/chats/:chat_id", get(get_chat))
        .route("/api/chats/:chat_id", patch(update_chat))
        .route("/api/chats/:chat_id", delete(delete_chat))
        .route("/api/chats/:chat_id/messages", get(get_messages))
        .route(
            "/api/chats/:chat_id/messages/:message_id/feedback",
            post(add_feedback),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(Extension(state))
}

/// POST /api/chats/messages - run one chat turn, streamed as server-sent
/// events. Intake failures (unauthorized, sensitive data) surface as plain
/// error responses before any SSE bytes are written.
async fn chat(
    Extension(state): Extension<Arc<AppState>>,
    Extension(SecurePermissions(token)): Extension<SecurePermissions>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let chunks = state.chat_service.chat(request, &token).await?;

    let events = chunks.map(|item| match item {
        Ok(chunk) => chunk.to_sse_event().map_err(axum::Error::new),
        Err(e) => {
            tracing::error!("chat stream aborted: {}", e);
            Ok(Event::default().event("error").data(e.to_string()))
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// GET /api/chats - the caller's conversations, newest first.
async fn get_chats(
    Extension(state): Extension<Arc<AppState>>,
    Extension(SecurePermissions(token)): Extension<SecurePermissions>,
) -> Result<impl IntoResponse, ChatError> {
    let chats = state.chat_service.get_chats(&token).await?;
    Ok(Json(chats))
}

/// GET /api/chats/:chat_id
async fn get_chat(
    Extension(state): Extension<Arc<AppState>>,
    Extension(SecurePermissions(token)): Extension<SecurePermissions>,
    Path(chat_id): Path<String>,
) -> Result<impl IntoResponse, ChatError> {
    let chat = state.chat_service.get_chat(&chat_id, &token).await?;
    Ok(Json(chat))
}

/// PATCH /api/chats/:chat_id - rename.
async fn update_chat(
    Extension(state): Extension<Arc<AppState>>,
    Extension(SecurePermissions(token)): Extension<SecurePermissions>,
    Path(chat_id): Path<String>,
    Json(update): Json<ChatUpdate>,
) -> Result<impl IntoResponse, ChatError> {
    state
        .chat_service
        .update_chat(&chat_id, update, &token)
        .await?;
    Ok(Json(serde_json::json!({"success": true})))
}

/// DELETE /api/chats/:chat_id - soft delete.
async fn delete_chat(
    Extension(state): Extension<Arc<AppState>>,
    Extension(SecurePermissions(token)): Extension<SecurePermissions>,
    Path(chat_id): Path<String>,
) -> Result<impl IntoResponse, ChatError> {
    state.chat_service.delete_chat(&chat_id, &token).await?;
    Ok(Json(serde_json::json!({"success": true})))
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    page: Option<u32>,
    per_page: Option<u32>,
    message_ids: Option<String>,
}

const DEFAULT_PER_PAGE: u32 = 20;

/// GET /api/chats/:chat_id/messages - paginated history, or a specific set
/// when `message_ids` (comma-separated) is present.
async fn get_messages(
    Extension(state): Extension<Arc<AppState>>,
    Extension(SecurePermissions(token)): Extension<SecurePermissions>,
    Path(chat_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<impl IntoResponse, ChatError> {
    let response = match &query.message_ids {
        Some(ids) => {
            let ids: Vec<String> = ids.split(',').map(|s| s.trim().to_string()).collect();
            state
                .chat_service
                .get_messages_by_id(&chat_id, &ids, &token)
                .await?
        }
        None => {
            state
                .chat_service
                .get_messages(
                    &chat_id,
                    query.page,
                    query.per_page.unwrap_or(DEFAULT_PER_PAGE),
                    &token,
                )
                .await?
        }
    };
    Ok(Json(response))
}

/// POST /api/chats/:chat_id/messages/:message_id/feedback
async fn add_feedback(
    Extension(state): Extension<Arc<AppState>>,
    Extension(SecurePermissions(token)): Extension<SecurePermissions>,
    Path((chat_id, message_id)): Path<(String, String)>,
    Json(feedback): Json<MessageFeedback>,
) -> Result<impl IntoResponse, ChatError> {
    state
        .chat_service
        .add_feedback(&chat_id, &message_id, feedback, &token)
        .await?;
    Ok(Json(serde_json::json!({"success": true})))
}
