use crate::config::{DEFAULT_DOCUMENT_EXCERPT_CHARS, DEFAULT_HISTORY_WINDOW};
use crate::models::{ConversationTurn, DocumentContext};

pub const TRUNCATION_MARKER: &str = "\n... [document continues]";
pub const DOCUMENT_CONTEXT_ACK: &str =
    "I have the document context loaded. Please proceed with your question.";

/// Builds the turn list sent to the model for one request.
///
/// History is capped by entry count only; there is no token accounting.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    history_window: usize,
    excerpt_chars: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW, DEFAULT_DOCUMENT_EXCERPT_CHARS)
    }
}

impl ContextAssembler {
    pub fn new(history_window: usize, excerpt_chars: usize) -> Self {
        Self {
            history_window,
            excerpt_chars,
        }
    }

    pub fn assemble(
        &self,
        prior_turns: &[ConversationTurn],
        active_document: Option<&DocumentContext>,
        new_user_text: &str,
    ) -> Vec<ConversationTurn> {
        let recent = &prior_turns[prior_turns.len().saturating_sub(self.history_window)..];
        let mut turns = Vec::with_capacity(recent.len() + 3);

        if let Some(document) = active_document {
            if document.is_new_upload {
                turns.push(ConversationTurn::user(announce_document(&document.full_text)));
                turns.push(ConversationTurn::model(acknowledge_document(&document.full_text)));
            } else {
                turns.push(ConversationTurn::user(self.document_excerpt(&document.full_text)));
                turns.push(ConversationTurn::model(DOCUMENT_CONTEXT_ACK));
            }
        }

        turns.extend_from_slice(recent);
        turns.push(ConversationTurn::user(new_user_text));
        turns
    }

    fn document_excerpt(&self, text: &str) -> String {
        match text.char_indices().nth(self.excerpt_chars) {
            Some((cut, _)) => format!("[Document Context]\n{}{}", &text[..cut], TRUNCATION_MARKER),
            None => format!("[Document Context]\n{text}"),
        }
    }
}

/// Rough word count: one word per five characters, rounded.
pub fn approximate_word_count(text: &str) -> usize {
    (text.chars().count() + 2) / 5
}

fn announce_document(text: &str) -> String {
    format!(
        "I'm uploading a document for analysis. Here is the full document content:\n\n{text}\n\nPlease confirm you've received and understood the document."
    )
}

fn acknowledge_document(text: &str) -> String {
    format!(
        "I've received and analyzed the document. It contains {} words approximately. I'm ready to answer your questions about this document. What would you like to know?",
        approximate_word_count(text)
    )
}
