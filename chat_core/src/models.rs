use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    /// The stored chat history labels model turns `assistant`, the upstream
    /// API labels them `model`; both decode to the same variant.
    #[serde(alias = "assistant")]
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Decodes the `history` form field: a JSON array of `{role, text}`.
pub fn parse_history(json: &str) -> Result<Vec<ConversationTurn>, ChatError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json).map_err(|e| ChatError::Input(format!("malformed history: {e}")))
}

/// The document currently attached to a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentContext {
    pub full_text: String,
    /// True only on the request that carried the file itself.
    pub is_new_upload: bool,
}

/// One frame of the completion response.
///
/// On the wire every frame is a single JSON object followed by `\n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub enum StreamEvent {
    Chunk { text: String },
    Done { document_text: Option<String> },
}

impl StreamEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        StreamEvent::Chunk { text: text.into() }
    }

    pub fn done(document_text: Option<String>) -> Self {
        StreamEvent::Done { document_text }
    }

    /// Serializes the event as one NDJSON line.
    pub fn to_line(&self) -> Result<String, ChatError> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| ChatError::Transport(format!("failed to encode stream event: {e}")))?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Self, ChatError> {
        serde_json::from_str(line)
            .map_err(|e| ChatError::Transport(format!("invalid stream event: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEvent {
    #[serde(default)]
    text: Option<String>,
    done: bool,
    #[serde(
        rename = "pdfContent",
        alias = "documentText",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    document_text: Option<String>,
}

impl TryFrom<WireEvent> for StreamEvent {
    type Error = String;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        if wire.done {
            return Ok(StreamEvent::Done {
                document_text: wire.document_text,
            });
        }
        match wire.text {
            Some(text) => Ok(StreamEvent::Chunk { text }),
            None => Err("chunk event without text".to_string()),
        }
    }
}

impl From<StreamEvent> for WireEvent {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Chunk { text } => WireEvent {
                text: Some(text),
                done: false,
                document_text: None,
            },
            StreamEvent::Done { document_text } => WireEvent {
                text: Some(String::new()),
                done: true,
                document_text,
            },
        }
    }
}

/// Everything one completion call needs. The server keeps nothing between
/// calls, so the caller resends history and cached document text each time.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub prompt: String,
    pub file: Option<Bytes>,
    pub history: Vec<ConversationTurn>,
    pub cached_document_text: Option<String>,
}

/// What is handed to the upstream model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system_instruction: String,
    /// Chronological; the new user turn is last.
    pub contents: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
    pub details: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    pub system_instruction: Option<GeminiContent>,
    pub generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GeminiGenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 8192,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GeminiStreamResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    pub error: Option<GeminiApiError>,
}

#[derive(Debug, Deserialize)]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
pub struct GeminiApiError {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
}

impl GeminiStreamResponse {
    /// Concatenated text parts of the first candidate, if any.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}
