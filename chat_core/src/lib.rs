pub mod chat_client;
pub mod completion_service;
pub mod config;
pub mod context_assembler;
pub mod document_processor;
pub mod error;
pub mod gemini_service;
pub mod models;
pub mod prompt;
pub mod stream_consumer;

pub use chat_client::{Attachment, ChatClient, ChatSession, ClientRequest};
pub use completion_service::{CompletionService, EventStream};
pub use config::Config;
pub use context_assembler::ContextAssembler;
pub use document_processor::{DocumentExtractor, DocumentProcessor};
pub use error::ChatError;
pub use gemini_service::{ChunkStream, GeminiService, ModelClient};
pub use models::*;
pub use stream_consumer::{consume, Completion, Reassembler};
