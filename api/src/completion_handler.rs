use axum::{
    body::Body,
    extract::{Multipart, State},
    http::header::{CACHE_CONTROL, CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use futures::StreamExt;

use crate::api_error::ApiError;
use crate::completion_payload::read_completion_request;
use crate::AppState;

/// `POST /api/gemini`: answers with one JSON object per line until a
/// `done: true` object. A failure after streaming began aborts the body.
pub async fn handle_completion(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let request = read_completion_request(multipart).await?;
    let events = state.completions.start(request).await?;

    let body = Body::from_stream(events.map(|item| item.and_then(|event| event.to_line())));

    Ok((
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}
