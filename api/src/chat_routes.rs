use axum::{
    extract::{Path, Query, State},
    Json,
};
use chat_core::ChatError;
use serde::{Deserialize, Serialize};

use crate::api_error::ApiError;
use crate::records::{ChatMessage, ChatRecord, ChatUpdate, NewChat};
use crate::AppState;

const DEFAULT_TITLE: &str = "New Chat";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatIdQuery {
    pub chat_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatBody {
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub messages: Option<Vec<ChatMessage>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceChatBody {
    pub chat_id: Option<String>,
    pub title: Option<String>,
    pub messages: Option<Vec<ChatMessage>>,
}

#[derive(Deserialize)]
pub struct AppendMessageBody {
    pub message: Option<ChatMessage>,
}

#[derive(Serialize)]
pub struct ChatListResponse {
    pub success: bool,
    pub chats: Vec<ChatRecord>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub chat: ChatRecord,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}

fn required(value: Option<String>, what: &str) -> Result<String, ChatError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ChatError::Input(format!("{what} is required")))
}

pub async fn list_chats(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<ChatListResponse>, ApiError> {
    let user_id = required(query.user_id, "User ID")?;
    let chats = state.chats.list_by_user(&user_id).await?;
    Ok(Json(ChatListResponse {
        success: true,
        chats,
    }))
}

pub async fn create_chat(
    State(state): State<AppState>,
    Json(body): Json<CreateChatBody>,
) -> Result<Json<ChatResponse>, ApiError> {
    let user_id = required(body.user_id, "User ID")?;
    let chat = state
        .chats
        .create(NewChat {
            user_id,
            title: body
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            messages: body.messages.unwrap_or_default(),
        })
        .await?;
    Ok(Json(ChatResponse {
        success: true,
        chat,
    }))
}

pub async fn replace_chat(
    State(state): State<AppState>,
    Json(body): Json<ReplaceChatBody>,
) -> Result<Json<ChatResponse>, ApiError> {
    let chat_id = required(body.chat_id, "Chat ID")?;
    let chat = state
        .chats
        .replace(
            &chat_id,
            ChatUpdate {
                title: body.title,
                messages: body.messages,
            },
        )
        .await?;
    Ok(Json(ChatResponse {
        success: true,
        chat,
    }))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    Query(query): Query<ChatIdQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let chat_id = required(query.chat_id, "Chat ID")?;
    remove_chat(&state, &chat_id).await
}

pub async fn delete_chat_by_id(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    remove_chat(&state, &chat_id).await
}

async fn remove_chat(state: &AppState, chat_id: &str) -> Result<Json<StatusResponse>, ApiError> {
    if !state.chats.delete_by_id(chat_id).await? {
        return Err(ChatError::NotFound(format!("chat {chat_id}")).into());
    }
    Ok(Json(StatusResponse {
        success: true,
        message: "Chat deleted successfully".to_string(),
    }))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<ChatResponse>, ApiError> {
    let chat = state.chats.get(&chat_id).await?;
    Ok(Json(ChatResponse {
        success: true,
        chat,
    }))
}

pub async fn append_message(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(body): Json<AppendMessageBody>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = body
        .message
        .filter(|m| !m.content.trim().is_empty())
        .ok_or_else(|| ChatError::Input("Invalid message format".to_string()))?;
    let chat = state.chats.append_message(&chat_id, message).await?;
    Ok(Json(ChatResponse {
        success: true,
        chat,
    }))
}
