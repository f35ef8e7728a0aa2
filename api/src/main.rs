mod api_error;
mod chat_routes;
mod completion_handler;
mod completion_payload;
mod file_routes;
mod records;
mod store;
#[cfg(test)]
mod test_support;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use chat_core::{CompletionService, Config, ContextAssembler, DocumentProcessor, GeminiService, ModelClient};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use crate::store::{ChatStore, DocumentStore, InMemoryChatStore, InMemoryDocumentStore};

#[derive(Clone)]
pub struct AppState {
    pub completions: Arc<CompletionService>,
    pub chats: Arc<dyn ChatStore>,
    pub files: Arc<dyn DocumentStore>,
}

pub fn app(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/gemini", post(completion_handler::handle_completion))
        .route(
            "/api/chats",
            get(chat_routes::list_chats)
                .post(chat_routes::create_chat)
                .put(chat_routes::replace_chat)
                .delete(chat_routes::delete_chat),
        )
        .route(
            "/api/chats/:id",
            get(chat_routes::get_chat)
                .put(chat_routes::append_message)
                .delete(chat_routes::delete_chat_by_id),
        )
        .route(
            "/api/files",
            get(file_routes::list_files)
                .post(file_routes::create_file)
                .delete(file_routes::delete_file),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads .env as well, so it has to run before the logger
    let config = Config::from_env();
    env_logger::init();
    let config = config?;
    log::info!("Loaded configuration: {config:?}");

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("chat-api/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let model: Arc<dyn ModelClient> = Arc::new(GeminiService::new(http, &config));
    log::info!("Using model provider {}", model.name());

    let completions = CompletionService::new(
        model,
        Arc::new(DocumentProcessor::new()),
        ContextAssembler::new(config.history_window, config.document_excerpt_chars),
        config.request_timeout,
    );
    let state = AppState {
        completions: Arc::new(completions),
        chats: Arc::new(InMemoryChatStore::new()),
        files: Arc::new(InMemoryDocumentStore::new()),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app(state, config.max_upload_bytes)).await?;
    Ok(())
}
