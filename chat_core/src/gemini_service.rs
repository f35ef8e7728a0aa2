use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use std::collections::VecDeque;

use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::models::*;

/// Model output, one text fragment per item, in generation order.
pub type ChunkStream = BoxStream<'static, Result<String>>;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Handle to a streaming chat model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Opens a streaming completion. Fails without yielding anything if the
    /// upstream rejects the request outright.
    async fn stream_chat(&self, request: ModelRequest) -> Result<ChunkStream>;
}

pub struct GeminiService {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl GeminiService {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            api_key: config.gemini_api_key.clone(),
            api_base: config.api_base.clone(),
            model: config.model.clone(),
        }
    }

    fn stream_url(&self) -> Result<reqwest::Url> {
        let base = reqwest::Url::parse(&self.api_base)
            .map_err(|e| ChatError::Config(format!("invalid GEMINI_API_BASE: {e}")))?;
        let mut url = base
            .join(&format!("v1beta/models/{}:streamGenerateContent", self.model))
            .map_err(|e| ChatError::Config(format!("invalid model name: {e}")))?;
        url.query_pairs_mut().append_pair("alt", "sse");
        Ok(url)
    }

    fn build_request(request: ModelRequest) -> GeminiRequest {
        GeminiRequest {
            contents: request
                .contents
                .into_iter()
                .map(|turn| GeminiContent {
                    role: Some(
                        match turn.role {
                            Role::User => "user",
                            Role::Model => "model",
                        }
                        .to_string(),
                    ),
                    parts: vec![GeminiPart {
                        text: Some(turn.text),
                    }],
                })
                .collect(),
            system_instruction: Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(request.system_instruction),
                }],
            }),
            generation_config: Some(GeminiGenerationConfig::default()),
        }
    }
}

#[async_trait]
impl ModelClient for GeminiService {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn stream_chat(&self, request: ModelRequest) -> Result<ChunkStream> {
        let url = self.stream_url()?;
        let body = Self::build_request(request);

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChatError::Upstream(format!(
                "Gemini API error: HTTP {status}: {error_text}"
            )));
        }

        let reader = SseChunkReader {
            body: response.bytes_stream().boxed(),
            parser: SseParser::default(),
            pending: VecDeque::new(),
            finished: false,
        };

        Ok(stream::unfold(reader, |mut reader| async move {
            reader.next_chunk().await.map(|chunk| (chunk, reader))
        })
        .boxed())
    }
}

/// Pulls the response body lazily; dropping it closes the upstream connection.
struct SseChunkReader {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    parser: SseParser,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl SseChunkReader {
    async fn next_chunk(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                if item.is_err() {
                    self.pending.clear();
                    self.finished = true;
                }
                return Some(item);
            }
            if self.finished {
                return None;
            }

            match self.body.next().await {
                Some(Ok(bytes)) => {
                    for data in self.parser.push(&bytes) {
                        if let Some(item) = decode_event(data) {
                            self.pending.push_back(item);
                        }
                    }
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(ChatError::Upstream(format!(
                        "network stream error: {}",
                        e.without_url()
                    ))));
                }
                None => {
                    self.finished = true;
                    if let Some(data) = self.parser.finish() {
                        if let Some(item) = decode_event(data) {
                            self.pending.push_back(item);
                        }
                    }
                }
            }
        }
    }
}

fn decode_event(data: Result<String>) -> Option<Result<String>> {
    let data = match data {
        Ok(data) => data,
        Err(e) => return Some(Err(e)),
    };
    if data.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<GeminiStreamResponse>(&data) {
        Ok(response) => match response.error {
            Some(err) => Some(Err(ChatError::Upstream(format!(
                "Gemini API error {}: {}",
                err.code.map(|c| c.to_string()).unwrap_or_default(),
                err.message
            )))),
            None => response.text().map(Ok),
        },
        Err(e) => Some(Err(ChatError::Upstream(format!("failed to parse SSE JSON: {e}")))),
    }
}

/// Incremental server-sent-events parser that only keeps `data:` fields.
#[derive(Debug, Default)]
struct SseParser {
    buf: Vec<u8>,
    cur_data: String,
}

impl SseParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<Result<String>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.is_empty() {
                if let Some(data) = self.take_event() {
                    out.push(Ok(data));
                }
                continue;
            }

            match std::str::from_utf8(&line) {
                Ok(s) => {
                    if let Some(rest) = s.strip_prefix("data:") {
                        let rest = rest.strip_prefix(' ').unwrap_or(rest);
                        self.cur_data.push_str(rest);
                        self.cur_data.push('\n');
                    }
                    // event:, id:, retry: and comments are ignored.
                }
                Err(e) => out.push(Err(ChatError::Upstream(format!(
                    "SSE line is not valid UTF-8: {e}"
                )))),
            }
        }

        out
    }

    /// Flushes an event left open when the body ended without a blank line.
    fn finish(&mut self) -> Option<Result<String>> {
        if !self.buf.is_empty() {
            let mut tail = self.push(b"\n");
            if !tail.is_empty() {
                return Some(tail.remove(0));
            }
        }
        self.take_event().map(Ok)
    }

    fn take_event(&mut self) -> Option<String> {
        if self.cur_data.is_empty() {
            return None;
        }
        if self.cur_data.ends_with('\n') {
            self.cur_data.pop();
        }
        Some(std::mem::take(&mut self.cur_data))
    }
}
