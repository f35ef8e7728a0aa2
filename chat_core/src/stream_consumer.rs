use futures::{Stream, StreamExt};
use tokio::sync::watch;

use crate::models::StreamEvent;

pub const EMPTY_RESPONSE_MESSAGE: &str =
    "I apologize, but I couldn't generate a response. Please try again.";
pub const FAILURE_MESSAGE: &str = "I apologize, but I encountered an error. Please try again.";

/// Outcome of reading one completion response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Finished {
        text: String,
        document_text: Option<String>,
    },
    /// The stream broke before its terminal event. `partial` is whatever had
    /// arrived; the caller decides whether to keep it.
    Failed { partial: String, reason: String },
}

impl Completion {
    pub fn failed(partial: impl Into<String>, reason: impl Into<String>) -> Self {
        Completion::Failed {
            partial: partial.into(),
            reason: reason.into(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Completion::Finished { .. })
    }

    /// What to show as the assistant turn.
    pub fn display_text(&self) -> &str {
        match self {
            Completion::Finished { text, .. } if text.is_empty() => EMPTY_RESPONSE_MESSAGE,
            Completion::Finished { text, .. } => text,
            Completion::Failed { .. } => FAILURE_MESSAGE,
        }
    }

    pub fn document_text(&self) -> Option<&str> {
        match self {
            Completion::Finished { document_text, .. } => document_text.as_deref(),
            Completion::Failed { .. } => None,
        }
    }
}

/// Rebuilds a message from NDJSON frames that may be split arbitrarily
/// across transport reads.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: Vec<u8>,
    accumulated: String,
    document_text: Option<String>,
    finished: bool,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the events completed by `bytes`, in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes a final line the sender did not terminate.
    pub fn flush(&mut self) -> Option<StreamEvent> {
        let line = std::mem::take(&mut self.pending);
        decode_line(&line)
    }

    /// Applies one event; true when the accumulator changed.
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        if self.finished {
            return false;
        }
        match event {
            StreamEvent::Chunk { text } => {
                self.accumulated.push_str(&text);
                !text.is_empty()
            }
            StreamEvent::Done { document_text } => {
                self.finished = true;
                self.document_text = document_text;
                false
            }
        }
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_completion(self) -> Completion {
        if self.finished {
            Completion::Finished {
                text: self.accumulated,
                document_text: self.document_text,
            }
        } else {
            Completion::failed(self.accumulated, "stream ended before completion")
        }
    }
}

fn decode_line(line: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match StreamEvent::from_line(text) {
        Ok(event) => Some(event),
        Err(e) => {
            log::warn!("Skipping unreadable stream line: {e}");
            None
        }
    }
}

/// Reads a completion body to its end, publishing the growing text through
/// `updates` after every chunk. Never waits past the end of `body`.
pub async fn consume<S, B, E>(body: S, updates: &watch::Sender<String>) -> Completion
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut reassembler = Reassembler::new();

    while let Some(item) = body.next().await {
        let bytes = match item {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Response stream failed: {e}");
                return Completion::failed(reassembler.accumulated, e.to_string());
            }
        };

        for event in reassembler.feed(bytes.as_ref()) {
            if reassembler.apply(event) {
                updates.send_replace(reassembler.accumulated().to_string());
            }
        }
        if reassembler.is_finished() {
            return reassembler.into_completion();
        }
    }

    if let Some(event) = reassembler.flush() {
        if reassembler.apply(event) {
            updates.send_replace(reassembler.accumulated().to_string());
        }
    }
    if !reassembler.is_finished() {
        log::warn!(
            "Response stream closed before completion after {} characters",
            reassembler.accumulated().chars().count()
        );
    }
    reassembler.into_completion()
}
