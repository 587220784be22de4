use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

mod auth;
mod chat_service;
mod citations;
mod config;
mod db;
mod embeddings;
mod errors;
mod guardrails;
mod handlers;
mod llm_client;
mod middleware;
mod models;
mod sanitize;
mod storage;
mod title;
mod tools;
mod vector_store;
mod workflow;

use chat_service::{ChatService, TurnConfig};

// AppState holds the database pool, the assembled chat service, and the
// optional reports tool (absent when the vector store is not configured).
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub config: config::Config,
    pub chat_service: ChatService,
    pub reports_tool: Option<Arc<tools::reports::ReportsTool>>,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize production-grade logging
    init_logging().expect("Failed to initialize logging");

    let config = config::Config::from_env().expect("Invalid configuration");

    // Create the database connection pool (runs migrations)
    let db_pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool.");

    let chat_store = Arc::new(storage::postgres::PostgresChatStore::new(db_pool.clone()));

    let llm_client = Arc::new(llm_client::LlmClient::new(config.llm_base_url.clone()));
    let embeddings_client = Arc::new(embeddings::EmbeddingsClient::new(
        config.embedding_base_url.clone(),
        config.embedding_model.clone(),
    ));

    // Vector store is optional: without it the assistant answers uncited and
    // report charts are disabled.
    let vector_store = match &config.qdrant_url {
        Some(url) => match vector_store::VectorStore::new(url, config.qdrant_api_key.clone()) {
            Ok(store) => {
                let docs = store
                    .ensure_collection(&config.docs_collection, config.embedding_dim, &["product"])
                    .await;
                let reports = store
                    .ensure_collection(
                        &config.reports_collection,
                        config.embedding_dim,
                        &["type", "product", "object_type"],
                    )
                    .await;
                if let Err(e) = docs.and(reports) {
                    tracing::error!("Failed to prepare qdrant collections: {}", e);
                }
                Some(Arc::new(store))
            }
            Err(e) => {
                tracing::error!("Failed to initialize qdrant client: {}", e);
                None
            }
        },
        None => {
            tracing::warn!("QDRANT_URL not set. Doc retrieval and report charts are disabled.");
            None
        }
    };

    let auth_gateway = Arc::new(auth::JwtAuthGateway::new(
        config.jwt_secret.clone(),
        chat_store.clone(),
    ));
    let guard_rails = Arc::new(guardrails::LlmGuardRails::new(llm_client.clone()));
    let agent_workflow = Arc::new(workflow::agent::LlmAgentWorkflow::new(
        llm_client.clone(),
        Some(embeddings_client.clone()),
        vector_store.clone(),
        config.docs_collection.clone(),
    ));
    let title_generator = Arc::new(title::TitleGenerator::new(
        llm_client.clone(),
        config.title_prompt.clone(),
        config.title_min_question_length,
    ));

    let chat_service = ChatService::new(
        chat_store.clone(),
        auth_gateway,
        guard_rails,
        agent_workflow,
        title_generator,
        TurnConfig {
            chat_history_limit: config.chat_history_limit,
            llm_model: config.llm_model,
        },
    );

    let reports_tool = vector_store.as_ref().map(|store| {
        Arc::new(tools::reports::ReportsTool::new(
            Arc::new(tools::clients::SystemsClient::new(
                config.systems_api_base_url.clone(),
            )),
            Arc::new(tools::clients::ReportsClient::new(
                config.reports_api_base_url.clone(),
            )),
            embeddings_client.clone(),
            store.clone(),
            config.reports_collection.clone(),
        ))
    });

    let bind_addr = config.bind_addr.clone();
    let shared_state = Arc::new(AppState {
        db_pool,
        config,
        chat_service,
        reports_tool,
    });

    // Build our application with all routes and shared state
    let app = Router::new()
        .merge(handlers::chat::chat_routes(shared_state.clone()))
        .merge(handlers::reports::report_routes(shared_state.clone()))
        .route("/api/status", axum::routing::get(api_status))
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(axum::Extension(shared_state.clone()));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind server address");
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}

async fn api_status(
    axum::Extension(state): axum::Extension<Arc<AppState>>,
) -> axum::Json<serde_json::Value> {
    let database = sqlx::query("SELECT 1")
        .execute(&state.db_pool)
        .await
        .is_ok();
    axum::Json(serde_json::json!({
        "status": if database { "ok" } else { "degraded" },
        "database": database,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// Production-grade logging configuration
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Get log level from environment or default to INFO for production
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,fleet_assist=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,fleet_assist=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    // Configure structured logging for production
    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        // JSON logging for production (easier for log aggregation)
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    } else {
        // Human-readable logging for development
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("fleet_assist starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        }
    );
    tracing::info!("Log level: {}", log_level);

    let db_configured = std::env::var("DATABASE_URL").is_ok();
    let qdrant_configured = std::env::var("QDRANT_URL").is_ok();
    let llm_configured = std::env::var("LLM_BASE_URL").is_ok();
    tracing::info!(
        "Configuration - Database: {}, Inference gateway: {}, Qdrant: {}",
        if db_configured { "set" } else { "missing" },
        if llm_configured { "set" } else { "default" },
        if qdrant_configured { "set" } else { "missing" }
    );

    Ok(())
}
