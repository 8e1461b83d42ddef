//! Collaborator contracts the conversational core depends on.
//!
//! Concrete adapters live in `karigar-db` (records, missions) and
//! `karigar-server` (Telegram messaging, media storage, document service).
//! The in-memory implementations in [`memory`] back unit and scenario tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::account::{Account, ChatId, MessageId, NewAccount};
use crate::domain::mission::{MissionCompletion, MissionType};
use crate::domain::seller::{ListedProduct, ProductCategory, ProductRecord, Seller, SellerUpdate};
use crate::messages::OutgoingMessage;

pub mod memory;

pub use memory::{
    InMemoryMissionStore, InMemoryRecordStore, RecordingMessenger, StaticDocumentRenderer,
    StaticMediaUploader,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("conflicting record: {0}")]
    Conflict(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("media transport failed: {0}")]
    Transport(String),
    #[error("media storage rejected upload: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("document service failed: {0}")]
    Service(String),
    #[error("document service returned an unusable response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("messaging transport failed: {0}")]
    Transport(String),
    #[error("chat {0} is unreachable")]
    ChatUnavailable(ChatId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Document,
    Voice,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Document => "document",
            Self::Voice => "voice",
            Self::Video => "video",
        }
    }
}

/// An opaque handle to media the messaging platform holds for us.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub file_id: String,
    pub kind: MediaKind,
    pub mime_type: Option<String>,
}

impl MediaRef {
    pub fn new(file_id: impl Into<String>, kind: MediaKind) -> Self {
        Self { file_id: file_id.into(), kind, mime_type: None }
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(
        &self,
        chat_id: ChatId,
        message: OutgoingMessage,
    ) -> Result<MessageId, MessagingError>;

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), MessagingError>;
}

#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Stores the media under `key` and returns its public URL.
    async fn upload(&self, media: &MediaRef, key: &str) -> Result<String, UploadError>;
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render_certificate(
        &self,
        seller: &Seller,
        account: &Account,
    ) -> Result<String, RenderError>;

    async fn render_shipping_label(
        &self,
        seller: &Seller,
        account: &Account,
    ) -> Result<String, RenderError>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_account_by_chat(&self, chat_id: ChatId) -> Result<Option<Account>, StoreError>;
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;
    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError>;
    /// Fails with [`StoreError::Conflict`] when either side is already linked elsewhere.
    async fn link_account(&self, email: &str, chat_id: ChatId) -> Result<(), StoreError>;
    /// Additive at the store; returns the new balance.
    async fn increment_balance(&self, email: &str, amount: i64) -> Result<i64, StoreError>;

    async fn find_seller_by_email(&self, email: &str) -> Result<Option<Seller>, StoreError>;
    async fn create_seller(&self, seller: Seller) -> Result<(), StoreError>;
    async fn append_product(&self, email: &str, product: ProductRecord) -> Result<(), StoreError>;
    async fn update_seller(&self, email: &str, update: SellerUpdate) -> Result<(), StoreError>;
    async fn products_by_category(
        &self,
        category: ProductCategory,
    ) -> Result<Vec<ListedProduct>, StoreError>;
}

#[async_trait]
pub trait MissionStore: Send + Sync {
    async fn find_completion(
        &self,
        email: &str,
        mission: MissionType,
        week: u32,
        year: i32,
    ) -> Result<Option<MissionCompletion>, StoreError>;

    async fn create_completion(&self, completion: MissionCompletion) -> Result<(), StoreError>;
}
