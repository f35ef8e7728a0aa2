use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use tokio::sync::watch;

use crate::error::{ChatError, Result};
use crate::models::ConversationTurn;
use crate::stream_consumer::{consume, Completion};

#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientRequest {
    pub prompt: String,
    pub file: Option<Attachment>,
    pub history: Vec<ConversationTurn>,
    pub cached_document_text: Option<String>,
}

/// Talks to the `/api/gemini` endpoint and reassembles its stream.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    endpoint: Url,
}

impl ChatClient {
    pub fn new(http: Client, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| ChatError::Config(format!("invalid server url {base_url:?}: {e}")))?;
        let endpoint = base
            .join("/api/gemini")
            .map_err(|e| ChatError::Config(e.to_string()))?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn form(request: &ClientRequest) -> Result<Form> {
        let history = serde_json::to_string(&request.history)
            .map_err(|e| ChatError::Input(format!("could not encode history: {e}")))?;

        let mut form = Form::new()
            .text("prompt", request.prompt.clone())
            .text("history", history);

        if let Some(file) = &request.file {
            let part = Part::bytes(file.bytes.clone())
                .file_name(file.file_name.clone())
                .mime_str("application/pdf")
                .map_err(|e| ChatError::Input(e.to_string()))?;
            form = form.part("file", part);
        }
        if let Some(text) = &request.cached_document_text {
            form = form.text("pdfContent", text.clone());
        }
        Ok(form)
    }

    /// Sends one prompt and reads the answer, publishing partial text through
    /// `updates`. Every failure is folded into `Completion::Failed`.
    pub async fn complete(
        &self,
        request: &ClientRequest,
        updates: &watch::Sender<String>,
    ) -> Completion {
        let form = match Self::form(request) {
            Ok(form) => form,
            Err(e) => return Completion::failed("", e.to_string()),
        };

        let response = match self
            .http
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Failed to reach chat server: {e}");
                return Completion::failed("", e.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Chat server rejected request: HTTP {status}");
            return Completion::failed("", format!("HTTP {status}: {body}"));
        }

        consume(response.bytes_stream(), updates).await
    }
}

/// Client-held conversation state: every request resends it in full.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    turns: Vec<ConversationTurn>,
    document_text: Option<String>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn document_text(&self) -> Option<&str> {
        self.document_text.as_deref()
    }

    pub fn request(&self, prompt: &str, file: Option<Attachment>) -> ClientRequest {
        ClientRequest {
            prompt: prompt.to_string(),
            file,
            history: self.turns.clone(),
            cached_document_text: self.document_text.clone(),
        }
    }

    /// Appends the exchange. A failed completion keeps the cached document.
    pub fn record(&mut self, prompt: &str, completion: &Completion) {
        self.turns.push(ConversationTurn::user(prompt));
        self.turns.push(ConversationTurn::model(completion.display_text()));
        if let Some(text) = completion.document_text() {
            self.document_text = Some(text.to_string());
        }
    }

    pub async fn send(
        &mut self,
        client: &ChatClient,
        prompt: &str,
        file: Option<Attachment>,
        updates: &watch::Sender<String>,
    ) -> Completion {
        let request = self.request(prompt, file);
        let completion = client.complete(&request, updates).await;
        self.record(prompt, &completion);
        completion
    }
}
