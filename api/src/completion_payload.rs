use axum::extract::multipart::{Multipart, MultipartError};
use chat_core::{parse_history, ChatError, CompletionRequest};

fn malformed(e: MultipartError) -> ChatError {
    ChatError::Input(format!("malformed multipart body: {e}"))
}

/// Reads the `prompt`, `file`, `history` and `pdfContent` form fields.
pub async fn read_completion_request(
    mut multipart: Multipart,
) -> Result<CompletionRequest, ChatError> {
    let mut request = CompletionRequest::default();
    let mut prompt = None;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "prompt" => prompt = Some(field.text().await.map_err(malformed)?),
            "file" => request.file = Some(field.bytes().await.map_err(malformed)?),
            "history" => request.history = parse_history(&field.text().await.map_err(malformed)?)?,
            "pdfContent" => request.cached_document_text = Some(field.text().await.map_err(malformed)?),
            other => log::debug!("Ignoring form field {other:?}"),
        }
    }

    request.prompt = prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ChatError::Input("Prompt is required".to_string()))?;
    Ok(request)
}
