use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;
use tempfile::NamedTempFile;

use crate::error::{ChatError, Result};

static RE_INLINE_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{00A0}]+").expect("valid regex"));
static RE_BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n(\s*\n)+").expect("valid regex"));

/// Turns an uploaded document into plain text.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, bytes: Bytes) -> Result<String>;
}

/// PDF text extraction backed by `pdf-extract`.
///
/// The upload is staged in a uniquely named temporary file that is removed
/// when the blocking task finishes, whether parsing succeeded, failed or
/// panicked.
#[derive(Debug, Default, Clone)]
pub struct DocumentProcessor {
    staging_dir: Option<PathBuf>,
}

impl DocumentProcessor {
    pub fn new() -> Self {
        Self { staging_dir: None }
    }

    pub fn with_staging_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: Some(dir.into()),
        }
    }

    fn stage(&self, bytes: &[u8]) -> std::io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("upload-").suffix(".pdf");
        let mut file = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(bytes)?;
        file.flush()?;
        Ok(file)
    }

    fn extract_blocking(&self, bytes: &[u8]) -> Result<String> {
        let staged = self
            .stage(bytes)
            .map_err(|e| ChatError::Extraction(format!("could not stage upload: {e}")))?;

        let raw = pdf_extract::extract_text(staged.path())
            .map_err(|e| ChatError::Extraction(e.to_string()))?;

        let text = clean_text(&raw);
        if text.is_empty() {
            return Err(ChatError::Extraction(
                "document contains no extractable text".to_string(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl DocumentExtractor for DocumentProcessor {
    async fn extract(&self, bytes: Bytes) -> Result<String> {
        log::info!("Extracting text from {} byte upload", bytes.len());

        let processor = self.clone();
        let text = tokio::task::spawn_blocking(move || processor.extract_blocking(&bytes))
            .await
            .map_err(|e| {
                if e.is_panic() {
                    ChatError::Extraction("document parser crashed on malformed input".to_string())
                } else {
                    ChatError::Extraction(e.to_string())
                }
            })??;

        log::info!("Extracted {} characters", text.chars().count());
        Ok(text)
    }
}

/// Collapses runs of inline whitespace and blank lines, trimming each line.
pub fn clean_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let collapsed = RE_INLINE_SPACE.replace_all(&text, " ");
    let lines: Vec<&str> = collapsed.lines().map(str::trim).collect();
    let joined = lines.join("\n");
    RE_BLANK_LINES.replace_all(&joined, "\n\n").trim().to_string()
}
