pub mod postgres;

use crate::errors::ChatError;
use crate::models::chat::{
    AuthorRole, Chat, ChatMessage, MessageFeedback, MessageMeta, SensitiveDataType,
};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrder {
    Asc,
    Desc,
}

impl MessageOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            MessageOrder::Asc => "ASC",
            MessageOrder::Desc => "DESC",
        }
    }
}

/// Persistence gateway for chats, messages, feedback, and rejected-message
/// records. The orchestrator only ever talks to this trait; the Postgres
/// implementation lives in `postgres.rs` and tests substitute their own.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_chat(&self, user_id: &str, tenant_id: &str) -> Result<String, ChatError>;

    async fn add_message(
        &self,
        chat_id: &str,
        role: AuthorRole,
        message: &str,
        metadata: &MessageMeta,
    ) -> Result<String, ChatError>;

    async fn get_chats(&self, user_id: &str, tenant_id: &str) -> Result<Vec<Chat>, ChatError>;

    async fn get_chat(&self, chat_id: &str) -> Result<Vec<Chat>, ChatError>;

    async fn get_chat_messages(
        &self,
        chat_id: &str,
        limit: i64,
        offset: i64,
        order: MessageOrder,
    ) -> Result<Vec<ChatMessage>, ChatError>;

    async fn get_chat_messages_by_id(
        &self,
        chat_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<ChatMessage>, ChatError>;

    async fn get_total_message_count(&self, chat_id: &str) -> Result<i64, ChatError>;

    async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<(), ChatError>;

    async fn soft_delete_chat(&self, chat_id: &str) -> Result<(), ChatError>;

    async fn upsert_feedback(
        &self,
        message_id: &str,
        feedback: &MessageFeedback,
    ) -> Result<(), ChatError>;

    /// Records a message the intake scan rejected. `chat_id` is `None` when
    /// the turn failed before any chat existed. Terminal: nothing reads these
    /// back on the hot path.
    async fn add_rejected_message(
        &self,
        chat_id: Option<&str>,
        message: &str,
        user_id: &str,
        tenant_id: &str,
        rejected_reason: &[SensitiveDataType],
    ) -> Result<(), ChatError>;

    /// Ownership lookup used by chat-id validation. `None` when the chat does
    /// not exist (or is soft-deleted), which callers treat as unauthorized.
    async fn chat_owner(&self, chat_id: &str) -> Result<Option<(String, String)>, ChatError>;
}
