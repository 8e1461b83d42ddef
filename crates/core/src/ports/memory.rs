use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::domain::account::{Account, ChatId, MessageId, NewAccount};
use crate::domain::mission::{MissionCompletion, MissionType};
use crate::domain::seller::{ListedProduct, ProductCategory, ProductRecord, Seller, SellerUpdate};
use crate::messages::OutgoingMessage;

use super::{
    DocumentRenderer, MediaRef, MediaUploader, MessagingError, Messenger, MissionStore,
    RecordStore, RenderError, StoreError, UploadError,
};

#[derive(Default)]
pub struct InMemoryRecordStore {
    accounts: RwLock<BTreeMap<String, Account>>,
    sellers: RwLock<BTreeMap<String, Seller>>,
    fail_writes: AtomicBool,
}

impl InMemoryRecordStore {
    pub async fn insert_account(&self, account: Account) {
        self.accounts.write().await.insert(account.email.clone(), account);
    }

    pub async fn insert_seller(&self, seller: Seller) {
        self.sellers.write().await.insert(seller.email.clone(), seller);
    }

    /// Makes every subsequent write fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes disabled".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_account_by_chat(&self, chat_id: ChatId) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.values().find(|account| account.chat_id == Some(chat_id)).cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.read().await.get(email).cloned())
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        self.check_writable()?;
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.email) {
            return Err(StoreError::Conflict(format!("account {} exists", account.email)));
        }
        let now = Utc::now();
        let created = Account {
            email: account.email,
            name: account.name,
            phone: account.phone,
            city: account.city,
            role: account.role,
            chat_id: None,
            balance: 0,
            created_at: now,
            updated_at: now,
        };
        accounts.insert(created.email.clone(), created.clone());
        Ok(created)
    }

    async fn link_account(&self, email: &str, chat_id: ChatId) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut accounts = self.accounts.write().await;
        if accounts.values().any(|account| account.chat_id == Some(chat_id) && account.email != email)
        {
            return Err(StoreError::Conflict(format!("chat {chat_id} already linked")));
        }
        let account = accounts
            .get_mut(email)
            .ok_or_else(|| StoreError::NotFound(format!("account {email}")))?;
        if account.is_linked_elsewhere(chat_id) {
            return Err(StoreError::Conflict(format!("account {email} already linked")));
        }
        account.chat_id = Some(chat_id);
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_balance(&self, email: &str, amount: i64) -> Result<i64, StoreError> {
        self.check_writable()?;
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(email)
            .ok_or_else(|| StoreError::NotFound(format!("account {email}")))?;
        account.balance += amount;
        account.updated_at = Utc::now();
        Ok(account.balance)
    }

    async fn find_seller_by_email(&self, email: &str) -> Result<Option<Seller>, StoreError> {
        Ok(self.sellers.read().await.get(email).cloned())
    }

    async fn create_seller(&self, seller: Seller) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut sellers = self.sellers.write().await;
        if sellers.contains_key(&seller.email) {
            return Err(StoreError::Conflict(format!("seller {} exists", seller.email)));
        }
        sellers.insert(seller.email.clone(), seller);
        Ok(())
    }

    async fn append_product(&self, email: &str, product: ProductRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut sellers = self.sellers.write().await;
        let seller = sellers
            .get_mut(email)
            .ok_or_else(|| StoreError::NotFound(format!("seller {email}")))?;
        seller.products.push(product);
        seller.updated_at = Utc::now();
        Ok(())
    }

    async fn update_seller(&self, email: &str, update: SellerUpdate) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut sellers = self.sellers.write().await;
        let seller = sellers
            .get_mut(email)
            .ok_or_else(|| StoreError::NotFound(format!("seller {email}")))?;
        seller.apply(&update);
        seller.updated_at = Utc::now();
        Ok(())
    }

    async fn products_by_category(
        &self,
        category: ProductCategory,
    ) -> Result<Vec<ListedProduct>, StoreError> {
        let sellers = self.sellers.read().await;
        Ok(sellers
            .values()
            .flat_map(|seller| {
                seller.products.iter().filter(|product| product.category == category).map(
                    |product| ListedProduct {
                        seller_email: seller.email.clone(),
                        seller_name: seller.display_name().to_owned(),
                        product: product.clone(),
                    },
                )
            })
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryMissionStore {
    completions: RwLock<Vec<MissionCompletion>>,
}

impl InMemoryMissionStore {
    pub async fn completions(&self) -> Vec<MissionCompletion> {
        self.completions.read().await.clone()
    }
}

#[async_trait]
impl MissionStore for InMemoryMissionStore {
    async fn find_completion(
        &self,
        email: &str,
        mission: MissionType,
        week: u32,
        year: i32,
    ) -> Result<Option<MissionCompletion>, StoreError> {
        let completions = self.completions.read().await;
        Ok(completions
            .iter()
            .find(|record| {
                record.email == email
                    && record.mission == mission
                    && record.week == week
                    && record.year == year
            })
            .cloned())
    }

    async fn create_completion(&self, completion: MissionCompletion) -> Result<(), StoreError> {
        self.completions.write().await.push(completion);
        Ok(())
    }
}

/// Captures every outbound message instead of delivering it.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(ChatId, OutgoingMessage)>>,
    deleted: Mutex<Vec<(ChatId, MessageId)>>,
    next_id: AtomicI32,
}

impl RecordingMessenger {
    pub async fn sent(&self) -> Vec<(ChatId, OutgoingMessage)> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, chat_id: ChatId) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(chat, _)| *chat == chat_id)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub async fn last_to(&self, chat_id: ChatId) -> Option<OutgoingMessage> {
        self.sent_to(chat_id).await.pop()
    }

    pub async fn deleted(&self) -> Vec<(ChatId, MessageId)> {
        self.deleted.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(
        &self,
        chat_id: ChatId,
        message: OutgoingMessage,
    ) -> Result<MessageId, MessagingError> {
        self.sent.lock().await.push((chat_id, message));
        Ok(MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), MessagingError> {
        self.deleted.lock().await.push((chat_id, message_id));
        Ok(())
    }
}

/// Returns `<base_url>/<key>` for every upload.
pub struct StaticMediaUploader {
    base_url: String,
    failing: AtomicBool,
    uploads: Mutex<Vec<(String, MediaRef)>>,
}

impl StaticMediaUploader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            failing: AtomicBool::new(false),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn uploaded_keys(&self) -> Vec<String> {
        self.uploads.lock().await.iter().map(|(key, _)| key.clone()).collect()
    }
}

impl Default for StaticMediaUploader {
    fn default() -> Self {
        Self::new("https://media.test")
    }
}

#[async_trait]
impl MediaUploader for StaticMediaUploader {
    async fn upload(&self, media: &MediaRef, key: &str) -> Result<String, UploadError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(UploadError::Transport(format!("upload of {} refused", media.file_id)));
        }
        self.uploads.lock().await.push((key.to_owned(), media.clone()));
        Ok(format!("{}/{key}", self.base_url))
    }
}

pub struct StaticDocumentRenderer {
    base_url: String,
    failing: AtomicBool,
    rendered: Mutex<Vec<String>>,
}

impl StaticDocumentRenderer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            failing: AtomicBool::new(false),
            rendered: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn rendered(&self) -> Vec<String> {
        self.rendered.lock().await.clone()
    }

    async fn render(&self, kind: &str, seller: &Seller) -> Result<String, RenderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RenderError::Service(format!("{kind} service offline")));
        }
        let url = format!("{}/{kind}/{}.pdf", self.base_url, seller.email);
        self.rendered.lock().await.push(url.clone());
        Ok(url)
    }
}

impl Default for StaticDocumentRenderer {
    fn default() -> Self {
        Self::new("https://docs.test")
    }
}

#[async_trait]
impl DocumentRenderer for StaticDocumentRenderer {
    async fn render_certificate(
        &self,
        seller: &Seller,
        _account: &Account,
    ) -> Result<String, RenderError> {
        self.render("certificates", seller).await
    }

    async fn render_shipping_label(
        &self,
        seller: &Seller,
        _account: &Account,
    ) -> Result<String, RenderError> {
        self.render("labels", seller).await
    }
}
