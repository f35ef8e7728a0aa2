use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    http::{header::CONTENT_TYPE, Request},
    response::Response,
    Router,
};
use chat_core::{
    ChatError, ChunkStream, CompletionService, ContextAssembler, ConversationTurn,
    DocumentExtractor, ModelClient, ModelRequest,
};
use futures::{stream, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use crate::store::{InMemoryChatStore, InMemoryDocumentStore};
use crate::{app, AppState};

#[derive(Clone, Copy)]
pub enum Step {
    Chunk(&'static str),
    Fail(&'static str),
}

pub struct FakeModel {
    script: Vec<Step>,
    seen: Mutex<Vec<ModelRequest>>,
}

impl FakeModel {
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last_contents(&self) -> Vec<ConversationTurn> {
        self.seen
            .lock()
            .unwrap()
            .last()
            .map(|r| r.contents.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for FakeModel {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn stream_chat(&self, request: ModelRequest) -> Result<ChunkStream, ChatError> {
        self.seen.lock().unwrap().push(request);
        let items: Vec<Result<String, ChatError>> = self
            .script
            .iter()
            .map(|step| match step {
                Step::Chunk(t) => Ok(t.to_string()),
                Step::Fail(m) => Err(ChatError::Upstream(m.to_string())),
            })
            .collect();
        Ok(stream::iter(items).boxed())
    }
}

/// Returns fixed text, or an extraction error when built with `None`.
pub struct FakeExtractor(Option<&'static str>);

#[async_trait]
impl DocumentExtractor for FakeExtractor {
    async fn extract(&self, _bytes: Bytes) -> Result<String, ChatError> {
        self.0
            .map(str::to_string)
            .ok_or_else(|| ChatError::Extraction("Invalid PDF structure".to_string()))
    }
}

pub struct Harness {
    pub model: Arc<FakeModel>,
    pub router: Router,
}

impl Harness {
    pub fn new(script: &[Step], extracted: Option<&'static str>) -> Self {
        let model = Arc::new(FakeModel {
            script: script.to_vec(),
            seen: Mutex::new(Vec::new()),
        });
        let completions = CompletionService::new(
            model.clone(),
            Arc::new(FakeExtractor(extracted)),
            ContextAssembler::default(),
            Duration::from_secs(5),
        );
        let state = AppState {
            completions: Arc::new(completions),
            chats: Arc::new(InMemoryChatStore::new()),
            files: Arc::new(InMemoryDocumentStore::new()),
        };
        Self {
            model,
            router: app(state, 1024 * 1024),
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub struct Field {
    name: &'static str,
    file_name: Option<&'static str>,
    data: Vec<u8>,
}

impl Field {
    pub fn text(name: &'static str, value: &str) -> Self {
        Self {
            name,
            file_name: None,
            data: value.as_bytes().to_vec(),
        }
    }

    pub fn file(name: &'static str, file_name: &'static str, data: &[u8]) -> Self {
        Self {
            name,
            file_name: Some(file_name),
            data: data.to_vec(),
        }
    }
}

const BOUNDARY: &str = "----chat-test-boundary";

pub fn completion_request(fields: &[Field]) -> Request<Body> {
    let mut body = Vec::new();
    for field in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match field.file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{file_name}\"\r\nContent-Type: application/pdf\r\n\r\n",
                    field.name
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", field.name).as_bytes(),
            ),
        }
        body.extend_from_slice(&field.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/gemini")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Result<Bytes, axum::Error> {
    axum::body::to_bytes(response.into_body(), usize::MAX).await
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await.unwrap()).unwrap()
}
