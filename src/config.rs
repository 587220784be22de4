// src/config.rs
//
// All runtime configuration is read from the environment exactly once at
// startup and injected as a value. Nothing below this layer touches env vars.
use crate::models::chat::LlmModel;

pub const DEFAULT_TITLE_PROMPT: &str = "Turn the following support question into a short, \
    descriptive conversation title of at most eight words. Reply with the title only.\n\
    Question: {question}";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub jwt_secret: String,

    // internal inference gateway
    pub llm_base_url: String,
    pub llm_model: LlmModel,

    // embedding service
    pub embedding_base_url: String,
    pub embedding_model: String,
    pub embedding_dim: u64,

    // vector store
    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    pub docs_collection: String,
    pub reports_collection: String,

    // external report plumbing
    pub systems_api_base_url: String,
    pub reports_api_base_url: String,

    // chat turn behavior
    pub title_prompt: String,
    pub title_min_question_length: usize,
    pub chat_history_limit: i64,
}

impl Config {
    pub fn from_env() -> Result<Config, String> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;
        let jwt_secret =
            std::env::var("JWT_SECRET").map_err(|_| "JWT_SECRET must be set".to_string())?;

        Ok(Config {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url,
            jwt_secret,
            llm_base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "http://llm-gateway:8000/v1".to_string()),
            llm_model: LlmModel::Llama3_8b,
            embedding_base_url: std::env::var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|_| "http://embedding-gateway:8001/v1".to_string()),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "bge-large-en-v1.5".to_string()),
            embedding_dim: parse_env("EMBEDDING_DIM", 1024)?,
            qdrant_url: std::env::var("QDRANT_URL").ok(),
            qdrant_api_key: std::env::var("QDRANT_API_KEY").ok(),
            docs_collection: std::env::var("QDRANT_DOCS_COLLECTION")
                .unwrap_or_else(|_| "product_docs".to_string()),
            reports_collection: std::env::var("QDRANT_REPORTS_COLLECTION")
                .unwrap_or_else(|_| "report_fields".to_string()),
            systems_api_base_url: std::env::var("SYSTEMS_API_BASE_URL")
                .unwrap_or_else(|_| "http://fleet-inventory:8080".to_string()),
            reports_api_base_url: std::env::var("REPORTS_API_BASE_URL")
                .unwrap_or_else(|_| "http://report-engine:8080".to_string()),
            title_prompt: std::env::var("TITLE_PROMPT")
                .unwrap_or_else(|_| DEFAULT_TITLE_PROMPT.to_string()),
            title_min_question_length: parse_env("TITLE_MIN_QUESTION_LENGTH", 30)?,
            chat_history_limit: parse_env("CHAT_HISTORY_LIMIT", 20)?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}
