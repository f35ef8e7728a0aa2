use axum::{
    extract::{Query, State},
    Json,
};
use chat_core::ChatError;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api_error::ApiError;
use crate::chat_routes::{StatusResponse, UserQuery};
use crate::records::{new_id, FileMetadata};
use crate::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIdQuery {
    pub file_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileBody {
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub size: Option<u64>,
    #[serde(rename = "type")]
    pub mime_type: Option<String>,
    pub url: Option<String>,
}

#[derive(Serialize)]
pub struct FileListResponse {
    pub success: bool,
    pub files: Vec<FileMetadata>,
}

#[derive(Serialize)]
pub struct FileResponse {
    pub success: bool,
    pub file: FileMetadata,
}

pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<FileListResponse>, ApiError> {
    let user_id = query
        .user_id
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ChatError::Input("User ID is required".to_string()))?;
    let files = state.files.list_by_user(&user_id).await?;
    Ok(Json(FileListResponse {
        success: true,
        files,
    }))
}

pub async fn create_file(
    State(state): State<AppState>,
    Json(body): Json<CreateFileBody>,
) -> Result<Json<FileResponse>, ApiError> {
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let (Some(user_id), Some(name), Some(size), Some(mime_type), Some(url)) = (
        non_empty(body.user_id),
        non_empty(body.name),
        body.size.filter(|s| *s > 0),
        non_empty(body.mime_type),
        non_empty(body.url),
    ) else {
        return Err(ChatError::Input("All fields are required".to_string()).into());
    };

    let file = state
        .files
        .create(FileMetadata {
            id: new_id(),
            user_id,
            name,
            size,
            mime_type,
            url,
            uploaded_at: Utc::now(),
        })
        .await?;
    Ok(Json(FileResponse {
        success: true,
        file,
    }))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Query(query): Query<FileIdQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let file_id = query
        .file_id
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ChatError::Input("File ID is required".to_string()))?;
    if !state.files.delete_by_id(&file_id).await? {
        return Err(ChatError::NotFound(format!("file {file_id}")).into());
    }
    Ok(Json(StatusResponse {
        success: true,
        message: "File deleted successfully".to_string(),
    }))
}
