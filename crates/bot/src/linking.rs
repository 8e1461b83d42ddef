//! Account linking: binds a chat to an existing account by email, or offers
//! buyer registration when no account exists.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::info;

use karigar_core::domain::account::ChatId;
use karigar_core::errors::FlowError;
use karigar_core::flows::validation::normalize_email;
use karigar_core::messages::{labels, notice, Keyboard, MessageBuilder, OutgoingMessage};
use karigar_core::ports::{Messenger, RecordStore, StoreError};

use crate::events::DispatchError;

const EMAIL_PROMPT: &str = "📧 Please send the email address you registered with.";
const EMAIL_RETRY: &str = "That doesn't look like an email address. Please try again.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkingState {
    AwaitingEmail,
    /// No account matched; the captured email anchors a buyer registration.
    OfferedRegistration { email: String },
}

#[derive(Clone, Debug)]
struct LinkingSession {
    state: LinkingState,
    touched_at: DateTime<Utc>,
}

/// Per-chat linking sessions, outside the flow state store.
pub struct LinkingSessions {
    sessions: RwLock<HashMap<ChatId, LinkingSession>>,
    ttl: Duration,
}

impl Default for LinkingSessions {
    fn default() -> Self {
        Self::new(Duration::hours(24))
    }
}

impl LinkingSessions {
    pub fn new(ttl: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), ttl }
    }

    pub async fn state(&self, chat_id: ChatId) -> Option<LinkingState> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&chat_id)?;
        (Utc::now() - session.touched_at < self.ttl).then(|| session.state.clone())
    }

    pub async fn is_awaiting_email(&self, chat_id: ChatId) -> bool {
        self.state(chat_id).await == Some(LinkingState::AwaitingEmail)
    }

    pub async fn set(&self, chat_id: ChatId, state: LinkingState) {
        self.sessions
            .write()
            .await
            .insert(chat_id, LinkingSession { state, touched_at: Utc::now() });
    }

    pub async fn clear(&self, chat_id: ChatId) -> Option<LinkingState> {
        self.sessions.write().await.remove(&chat_id).map(|session| session.state)
    }

    /// Consumes a pending registration offer.
    pub async fn take_offer(&self, chat_id: ChatId) -> Option<String> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&chat_id).map(|session| &session.state) {
            Some(LinkingState::OfferedRegistration { .. }) => {}
            _ => return None,
        }
        match sessions.remove(&chat_id)?.state {
            LinkingState::OfferedRegistration { email } => Some(email),
            LinkingState::AwaitingEmail => None,
        }
    }

    pub async fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| now - session.touched_at < self.ttl);
        before - sessions.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Prompted,
    AlreadyLinked { email: String },
    InvalidFormat,
    Linked { email: String },
    LinkedElsewhere { email: String },
    RegistrationOffered { email: String },
    Cancelled,
}

pub struct AccountLinker {
    sessions: Arc<LinkingSessions>,
    records: Arc<dyn RecordStore>,
    messenger: Arc<dyn Messenger>,
}

impl AccountLinker {
    pub fn new(
        sessions: Arc<LinkingSessions>,
        records: Arc<dyn RecordStore>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self { sessions, records, messenger }
    }

    pub fn sessions(&self) -> &Arc<LinkingSessions> {
        &self.sessions
    }

    /// Opens email capture unless the chat is already linked.
    pub async fn begin(&self, chat_id: ChatId) -> Result<LinkOutcome, DispatchError> {
        if let Some(account) = self.records.find_account_by_chat(chat_id).await? {
            self.messenger
                .send(chat_id, notice(format!("🔗 This chat is already linked to {}.", account.email)))
                .await?;
            return Ok(LinkOutcome::AlreadyLinked { email: account.email });
        }

        self.sessions.set(chat_id, LinkingState::AwaitingEmail).await;
        self.messenger.send(chat_id, email_prompt(EMAIL_PROMPT)).await?;
        Ok(LinkOutcome::Prompted)
    }

    /// Handles text sent while the chat awaits email capture.
    pub async fn capture(&self, chat_id: ChatId, text: &str) -> Result<LinkOutcome, DispatchError> {
        let Some(email) = normalize_email(text) else {
            self.messenger.send(chat_id, email_prompt(EMAIL_RETRY)).await?;
            return Ok(LinkOutcome::InvalidFormat);
        };

        let Some(account) = self.records.find_account_by_email(&email).await? else {
            self.sessions
                .set(chat_id, LinkingState::OfferedRegistration { email: email.clone() })
                .await;
            self.messenger.send(chat_id, registration_offer(&email)).await?;
            return Ok(LinkOutcome::RegistrationOffered { email });
        };

        if account.is_linked_elsewhere(chat_id) {
            self.sessions.clear(chat_id).await;
            let error = FlowError::DuplicateLink { email: email.clone() };
            self.messenger.send(chat_id, notice(error.user_message())).await?;
            return Ok(LinkOutcome::LinkedElsewhere { email });
        }

        match self.records.link_account(&email, chat_id).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                self.sessions.clear(chat_id).await;
                let error = FlowError::DuplicateLink { email: email.clone() };
                self.messenger.send(chat_id, notice(error.user_message())).await?;
                return Ok(LinkOutcome::LinkedElsewhere { email });
            }
            Err(error) => return Err(error.into()),
        }
        self.sessions.clear(chat_id).await;
        info!(event_name = "linking.linked", chat_id = chat_id.0, "chat linked to account");

        self.messenger
            .send(chat_id, notice(format!("✅ Linked! Welcome, {}.", account.name)))
            .await?;
        Ok(LinkOutcome::Linked { email })
    }

    pub async fn cancel(&self, chat_id: ChatId) -> Result<LinkOutcome, DispatchError> {
        self.sessions.clear(chat_id).await;
        self.messenger.send(chat_id, notice("❎ Account linking cancelled.")).await?;
        Ok(LinkOutcome::Cancelled)
    }
}

fn email_prompt(text: &str) -> OutgoingMessage {
    MessageBuilder::new(text).keyboard(Keyboard::reply([[labels::CANCEL]])).build()
}

fn registration_offer(email: &str) -> OutgoingMessage {
    MessageBuilder::new(format!("We couldn't find an account for {email}."))
        .line("Would you like to register as a buyer?")
        .keyboard(Keyboard::reply([[labels::REGISTER_BUYER], [labels::CANCEL]]).one_time())
        .build()
}
