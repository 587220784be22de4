// src/storage/postgres.rs
use crate::errors::ChatError;
use crate::models::chat::{
    Author, AuthorRole, Chat, ChatMessage, MessageFeedback, MessageMeta, SensitiveDataType,
};
use crate::storage::{ChatStore, MessageOrder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Clone)]
pub struct PostgresChatStore {
    pool: PgPool,
}

impl PostgresChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ChatRow {
    chat_id: Uuid,
    title: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ChatRow> for Chat {
    fn from(row: ChatRow) -> Chat {
        Chat {
            chat_id: row.chat_id.to_string(),
            title: row.title,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    message_id: Uuid,
    chat_id: Uuid,
    author_role: String,
    message: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> ChatMessage {
        let metadata: MessageMeta = serde_json::from_value(row.metadata).unwrap_or_default();
        ChatMessage {
            chat_id: row.chat_id.to_string(),
            message_id: row.message_id.to_string(),
            created_at: row.created_at,
            author: Author {
                role: AuthorRole::from_db(&row.author_role),
            },
            text: row.message,
            metadata,
        }
    }
}

fn parse_id(id: &str) -> Result<Uuid, ChatError> {
    Uuid::parse_str(id).map_err(|_| ChatError::BadIdentifier(id.to_string()))
}

#[async_trait]
impl ChatStore for PostgresChatStore {
    async fn create_chat(&self, user_id: &str, tenant_id: &str) -> Result<String, ChatError> {
        let chat_id = Uuid::new_v4();
        sqlx::query("INSERT INTO chats (chat_id, user_id, tenant_id) VALUES ($1, $2, $3)")
            .bind(chat_id)
            .bind(user_id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(chat_id.to_string())
    }

    async fn add_message(
        &self,
        chat_id: &str,
        role: AuthorRole,
        message: &str,
        metadata: &MessageMeta,
    ) -> Result<String, ChatError> {
        let message_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO chat_messages (message_id, chat_id, author_role, message, metadata) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(message_id)
        .bind(parse_id(chat_id)?)
        .bind(role.as_str())
        .bind(message)
        .bind(serde_json::to_value(metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(message_id.to_string())
    }

    async fn get_chats(&self, user_id: &str, tenant_id: &str) -> Result<Vec<Chat>, ChatError> {
        let rows = sqlx::query_as::<_, ChatRow>(
            "SELECT chat_id, title, created_at FROM chats \
             WHERE user_id = $1 AND tenant_id = $2 AND deleted_at IS NULL \
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Chat::from).collect())
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Vec<Chat>, ChatError> {
        let rows = sqlx::query_as::<_, ChatRow>(
            "SELECT chat_id, title, created_at FROM chats \
             WHERE chat_id = $1 AND deleted_at IS NULL",
        )
        .bind(parse_id(chat_id)?)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Chat::from).collect())
    }

    async fn get_chat_messages(
        &self,
        chat_id: &str,
        limit: i64,
        offset: i64,
        order: MessageOrder,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let query = match order {
            MessageOrder::Asc => {
                "SELECT message_id, chat_id, author_role, message, metadata, created_at \
                 FROM chat_messages WHERE chat_id = $1 \
                 ORDER BY created_at ASC LIMIT $2 OFFSET $3"
            }
            MessageOrder::Desc => {
                "SELECT message_id, chat_id, author_role, message, metadata, created_at \
                 FROM chat_messages WHERE chat_id = $1 \
                 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
            }
        };
        let rows = sqlx::query_as::<_, MessageRow>(query)
            .bind(parse_id(chat_id)?)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }

    async fn get_chat_messages_by_id(
        &self,
        chat_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let ids = message_ids
            .iter()
            .map(|id| parse_id(id))
            .collect::<Result<Vec<Uuid>, ChatError>>()?;
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT message_id, chat_id, author_role, message, metadata, created_at \
             FROM chat_messages WHERE chat_id = $1 AND message_id = ANY($2) \
             ORDER BY created_at ASC",
        )
        .bind(parse_id(chat_id)?)
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }

    async fn get_total_message_count(&self, chat_id: &str) -> Result<i64, ChatError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE chat_id = $1")
                .bind(parse_id(chat_id)?)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<(), ChatError> {
        sqlx::query("UPDATE chats SET title = $2 WHERE chat_id = $1 AND deleted_at IS NULL")
            .bind(parse_id(chat_id)?)
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn soft_delete_chat(&self, chat_id: &str) -> Result<(), ChatError> {
        sqlx::query("UPDATE chats SET deleted_at = NOW() WHERE chat_id = $1 AND deleted_at IS NULL")
            .bind(parse_id(chat_id)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_feedback(
        &self,
        message_id: &str,
        feedback: &MessageFeedback,
    ) -> Result<(), ChatError> {
        sqlx::query(
            "INSERT INTO message_feedback (message_id, rating, categories, comment) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (message_id) DO UPDATE \
             SET rating = $2, categories = $3, comment = $4, updated_at = NOW()",
        )
        .bind(parse_id(message_id)?)
        .bind(feedback.rating.as_str())
        .bind(serde_json::to_value(&feedback.categories)?)
        .bind(&feedback.text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_rejected_message(
        &self,
        chat_id: Option<&str>,
        message: &str,
        user_id: &str,
        tenant_id: &str,
        rejected_reason: &[SensitiveDataType],
    ) -> Result<(), ChatError> {
        let chat_id = chat_id.map(parse_id).transpose()?;
        sqlx::query(
            "INSERT INTO rejected_messages (id, chat_id, message, user_id, tenant_id, rejected_reason) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(chat_id)
        .bind(message)
        .bind(user_id)
        .bind(tenant_id)
        .bind(serde_json::to_value(rejected_reason)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn chat_owner(&self, chat_id: &str) -> Result<Option<(String, String)>, ChatError> {
        let chat_id = match Uuid::parse_str(chat_id) {
            Ok(id) => id,
            // A malformed id can't own anything; callers treat None as unauthorized.
            Err(_) => return Ok(None),
        };
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT user_id, tenant_id FROM chats WHERE chat_id = $1 AND deleted_at IS NULL",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
