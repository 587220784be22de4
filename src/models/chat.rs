// src/models/chat.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Product line the assistant answers questions about. Aliases cover the
/// spellings support tickets actually contain (legacy names included).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Product {
    NimbusStore,
    NimbusEdge,
    NimbusOne,
}

impl Product {
    pub fn display_name(&self) -> &'static str {
        match self {
            Product::NimbusStore => "NimbusStore",
            Product::NimbusEdge => "NimbusEdge",
            Product::NimbusOne => "NimbusOne",
        }
    }

    pub fn from_alias(value: &str) -> Option<Product> {
        match value.trim().to_lowercase().replace([' ', '-', '_'], "").as_str() {
            "nimbusstore" | "nstore" => Some(Product::NimbusStore),
            "nimbusedge" | "nedge" => Some(Product::NimbusEdge),
            "nimbusone" | "nimbushci" => Some(Product::NimbusOne),
            _ => None,
        }
    }

    /// Scans free text for product mentions, in declaration order.
    pub fn mentioned_in(text: &str) -> Vec<Product> {
        let haystack = text.to_lowercase();
        [Product::NimbusStore, Product::NimbusEdge, Product::NimbusOne]
            .into_iter()
            .filter(|p| haystack.contains(&p.display_name().to_lowercase()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntentContext {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub objects: Vec<String>,
}

/// One chat turn submitted by the frontend. `chat_id` absent means the turn
/// starts a brand-new conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub chat_id: Option<String>,
    pub text: String,
    pub intent_context: Option<IntentContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorRole {
    User,
    Ai,
}

impl AuthorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorRole::User => "USER",
            AuthorRole::Ai => "AI",
        }
    }

    pub fn from_db(value: &str) -> AuthorRole {
        match value {
            "AI" => AuthorRole::Ai,
            _ => AuthorRole::User,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub role: AuthorRole,
}

/// Serving model identity stamped into AI message metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LlmModel {
    Llama3_8b,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmMeta {
    pub model: LlmModel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMeta {
    pub version: String,
}

impl AppMeta {
    pub fn current() -> AppMeta {
        AppMeta {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub link: String,
    pub published_date: i64,
    pub score: f32,
}

/// Provenance attached to persisted messages. User messages carry only the
/// app version; AI messages additionally carry citations, the serving model,
/// and a back-reference to the question they answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layouts: Vec<serde_json::Value>,
}

impl MessageMeta {
    pub fn user_message() -> MessageMeta {
        MessageMeta {
            app: Some(AppMeta::current()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Chat {
    pub chat_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub chat_id: String,
    pub message_id: String,
    pub created_at: DateTime<Utc>,
    pub author: Author,
    pub text: String,
    pub metadata: MessageMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatUpdate {
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackRating {
    ThumbsUp,
    ThumbsDown,
}

impl FeedbackRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackRating::ThumbsUp => "THUMBS_UP",
            FeedbackRating::ThumbsDown => "THUMBS_DOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackCategory {
    Inaccurate,
    Incomplete,
    OffTopic,
    Other,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageFeedback {
    pub rating: FeedbackRating,
    #[serde(default)]
    pub categories: Vec<FeedbackCategory>,
    pub text: Option<String>,
}

/// Closed set of sensitive-data categories the intake scanner recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensitiveDataType {
    Ssn,
}

impl SensitiveDataType {
    /// Placeholder substituted for every redacted match.
    pub fn tag(&self) -> &'static str {
        match self {
            SensitiveDataType::Ssn => "[SSN]",
        }
    }
}

/// API projection of a persisted message: text is wrapped for HTML display
/// and any tool chart layouts ride alongside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessageResponse {
    pub chat_id: String,
    pub message_id: String,
    pub created_at: DateTime<Utc>,
    pub author: Author,
    pub text: String,
    pub layouts: Vec<serde_json::Value>,
}

impl From<ChatMessage> for ChatMessageResponse {
    fn from(message: ChatMessage) -> Self {
        ChatMessageResponse {
            chat_id: message.chat_id,
            message_id: message.message_id,
            created_at: message.created_at,
            author: message.author,
            text: format!("<p>{}</p>", message.text),
            layouts: message.metadata.layouts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub total_message_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginatedMessagesResponse {
    pub messages: Vec<ChatMessageResponse>,
    pub metadata: PaginationMeta,
}
