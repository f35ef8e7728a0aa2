use async_trait::async_trait;
use chat_core::ChatError;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::records::*;

type Result<T> = std::result::Result<T, ChatError>;

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Most recently updated first.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<ChatRecord>>;
    async fn get(&self, chat_id: &str) -> Result<ChatRecord>;
    async fn create(&self, chat: NewChat) -> Result<ChatRecord>;
    async fn append_message(&self, chat_id: &str, message: ChatMessage) -> Result<ChatRecord>;
    async fn replace(&self, chat_id: &str, update: ChatUpdate) -> Result<ChatRecord>;
    async fn delete_by_id(&self, chat_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Newest upload first.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<FileMetadata>>;
    async fn create(&self, file: FileMetadata) -> Result<FileMetadata>;
    async fn delete_by_id(&self, file_id: &str) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryChatStore {
    chats: RwLock<HashMap<String, ChatRecord>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn chat_not_found(chat_id: &str) -> ChatError {
    ChatError::NotFound(format!("chat {chat_id}"))
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<ChatRecord>> {
        let chats = self.chats.read().await;
        let mut owned: Vec<ChatRecord> = chats
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(owned)
    }

    async fn get(&self, chat_id: &str) -> Result<ChatRecord> {
        self.chats
            .read()
            .await
            .get(chat_id)
            .cloned()
            .ok_or_else(|| chat_not_found(chat_id))
    }

    async fn create(&self, chat: NewChat) -> Result<ChatRecord> {
        let now = Utc::now();
        let record = ChatRecord {
            id: new_id(),
            user_id: chat.user_id,
            title: chat.title,
            messages: chat.messages,
            created_at: now,
            updated_at: now,
        };
        self.chats
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        log::info!("Created chat {}", record.id);
        Ok(record)
    }

    async fn append_message(&self, chat_id: &str, mut message: ChatMessage) -> Result<ChatRecord> {
        let mut chats = self.chats.write().await;
        let chat = chats.get_mut(chat_id).ok_or_else(|| chat_not_found(chat_id))?;
        let now = Utc::now();
        message.timestamp = now;
        chat.messages.push(message);
        chat.updated_at = now;
        Ok(chat.clone())
    }

    async fn replace(&self, chat_id: &str, update: ChatUpdate) -> Result<ChatRecord> {
        let mut chats = self.chats.write().await;
        let chat = chats.get_mut(chat_id).ok_or_else(|| chat_not_found(chat_id))?;
        if let Some(title) = update.title {
            chat.title = title;
        }
        if let Some(messages) = update.messages {
            chat.messages = messages;
        }
        chat.updated_at = Utc::now();
        Ok(chat.clone())
    }

    async fn delete_by_id(&self, chat_id: &str) -> Result<bool> {
        Ok(self.chats.write().await.remove(chat_id).is_some())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    files: RwLock<HashMap<String, FileMetadata>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<FileMetadata>> {
        let files = self.files.read().await;
        let mut owned: Vec<FileMetadata> = files
            .values()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(owned)
    }

    async fn create(&self, file: FileMetadata) -> Result<FileMetadata> {
        self.files
            .write()
            .await
            .insert(file.id.clone(), file.clone());
        Ok(file)
    }

    async fn delete_by_id(&self, file_id: &str) -> Result<bool> {
        Ok(self.files.write().await.remove(file_id).is_some())
    }
}
