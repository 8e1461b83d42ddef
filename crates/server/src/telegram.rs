//! Telegram Bot API adapters: outbound messages, long-poll updates and file
//! transfer into media storage.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQueryId, ChatId as TgChatId, FileId, InlineKeyboardButton, InlineKeyboardMarkup,
    KeyboardButton, KeyboardMarkup, KeyboardRemove, MessageId as TgMessageId,
    ParseMode as TgParseMode, ReplyMarkup, Update, UpdateKind,
};
use teloxide::{ApiError, RequestError};
use tokio::sync::Mutex;
use tracing::{debug, info};

use karigar_bot::{InboundEvent, TransportError, UpdateEnvelope, UpdateSource};
use karigar_core::domain::account::{ChatId, MessageId};
use karigar_core::messages::{InlineAction, InlineButton, Keyboard, OutgoingMessage, ParseMode};
use karigar_core::ports::{MediaKind, MediaRef, MediaUploader, Messenger, MessagingError, UploadError};

pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(
        &self,
        chat_id: ChatId,
        message: OutgoingMessage,
    ) -> Result<MessageId, MessagingError> {
        let mut request = self.bot.send_message(TgChatId(chat_id.0), message.text);
        if let Some(mode) = message.parse_mode {
            request = request.parse_mode(match mode {
                ParseMode::Html => TgParseMode::Html,
                ParseMode::MarkdownV2 => TgParseMode::MarkdownV2,
            });
        }
        if let Some(keyboard) = message.keyboard {
            request = request.reply_markup(reply_markup(keyboard)?);
        }

        let sent = request.await.map_err(|error| messaging_error(chat_id, error))?;
        Ok(MessageId(sent.id.0))
    }

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), MessagingError> {
        self.bot
            .delete_message(TgChatId(chat_id.0), TgMessageId(message_id.0))
            .await
            .map_err(|error| messaging_error(chat_id, error))?;
        Ok(())
    }
}

fn messaging_error(chat_id: ChatId, error: RequestError) -> MessagingError {
    match error {
        RequestError::Api(ApiError::BotBlocked | ApiError::ChatNotFound) => {
            MessagingError::ChatUnavailable(chat_id)
        }
        other => MessagingError::Transport(other.to_string()),
    }
}

pub fn reply_markup(keyboard: Keyboard) -> Result<ReplyMarkup, MessagingError> {
    let markup = match keyboard {
        Keyboard::Reply { rows, one_time } => {
            let rows = rows
                .into_iter()
                .map(|row| row.into_iter().map(KeyboardButton::new).collect::<Vec<_>>())
                .collect::<Vec<_>>();
            let markup = KeyboardMarkup::new(rows).resize_keyboard();
            ReplyMarkup::Keyboard(if one_time { markup.one_time_keyboard() } else { markup })
        }
        Keyboard::Inline { rows } => {
            let rows = rows
                .into_iter()
                .map(|row| row.into_iter().map(inline_button).collect::<Result<Vec<_>, _>>())
                .collect::<Result<Vec<_>, _>>()?;
            ReplyMarkup::InlineKeyboard(InlineKeyboardMarkup::new(rows))
        }
        Keyboard::Remove => ReplyMarkup::KeyboardRemove(KeyboardRemove::new()),
    };
    Ok(markup)
}

fn inline_button(button: InlineButton) -> Result<InlineKeyboardButton, MessagingError> {
    match button.action {
        InlineAction::Callback { data } => Ok(InlineKeyboardButton::callback(button.label, data)),
        InlineAction::Url { url } => {
            let parsed = reqwest::Url::parse(&url).map_err(|error| {
                MessagingError::Transport(format!("invalid button url `{url}`: {error}"))
            })?;
            Ok(InlineKeyboardButton::url(button.label, parsed))
        }
    }
}

/// Long-polls `getUpdates`, tracking the offset so every update is seen once.
pub struct TelegramUpdateSource {
    bot: Bot,
    poll_timeout_secs: u32,
    state: Mutex<PollState>,
    stopped: AtomicBool,
}

#[derive(Default)]
struct PollState {
    offset: i32,
    buffered: VecDeque<UpdateEnvelope>,
}

impl TelegramUpdateSource {
    pub fn new(bot: Bot, poll_timeout_secs: u32) -> Self {
        Self {
            bot,
            poll_timeout_secs,
            state: Mutex::new(PollState::default()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Makes the next poll end the stream.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl UpdateSource for TelegramUpdateSource {
    async fn connect(&self) -> Result<(), TransportError> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        info!(
            event_name = "ingress.telegram.connected",
            correlation_id = "bootstrap",
            bot_username = me.username.as_deref().unwrap_or("unknown"),
            "telegram bot identity confirmed"
        );
        Ok(())
    }

    async fn next_update(&self) -> Result<Option<UpdateEnvelope>, TransportError> {
        let mut state = self.state.lock().await;
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if let Some(envelope) = state.buffered.pop_front() {
                return Ok(Some(envelope));
            }

            let updates = self
                .bot
                .get_updates()
                .offset(state.offset)
                .timeout(self.poll_timeout_secs)
                .await
                .map_err(|error| TransportError::Receive(error.to_string()))?;
            debug!(count = updates.len(), offset = state.offset, "polled telegram updates");

            for update in updates {
                state.offset = state.offset.max(next_offset(&update));
                if let Some(envelope) = envelope_from_update(update) {
                    state.buffered.push_back(envelope);
                }
            }
        }
    }

    /// Callback queries must be answered or the client keeps spinning.
    async fn acknowledge(&self, envelope: &UpdateEnvelope) -> Result<(), TransportError> {
        if let InboundEvent::Callback { query_id, .. } = &envelope.event {
            self.bot
                .answer_callback_query(CallbackQueryId(query_id.clone()))
                .await
                .map_err(|error| TransportError::Acknowledge(error.to_string()))?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        info!(event_name = "ingress.telegram.disconnected", "telegram polling stopped");
        Ok(())
    }
}

fn next_offset(update: &Update) -> i32 {
    i32::try_from(update.id.0).map(|id| id.saturating_add(1)).unwrap_or(i32::MAX)
}

pub fn envelope_from_update(update: Update) -> Option<UpdateEnvelope> {
    let update_id = update.id.0.to_string();
    match update.kind {
        UpdateKind::Message(message) => Some(UpdateEnvelope {
            update_id,
            chat_id: ChatId(message.chat.id.0),
            sender_name: message.from.as_ref().map(|user| user.first_name.clone()),
            event: inbound_from_message(&message),
        }),
        UpdateKind::CallbackQuery(query) => {
            let chat_id = query
                .message
                .as_ref()
                .map(|message| ChatId(message.chat().id.0))
                .unwrap_or(ChatId(query.from.id.0 as i64));
            Some(UpdateEnvelope {
                update_id,
                chat_id,
                sender_name: Some(query.from.first_name.clone()),
                event: InboundEvent::Callback {
                    query_id: query.id.0.clone(),
                    data: query.data.clone().unwrap_or_default(),
                },
            })
        }
        _ => None,
    }
}

fn inbound_from_message(message: &Message) -> InboundEvent {
    if let Some(text) = message.text() {
        return InboundEvent::Text(text.to_owned());
    }
    if let Some(photo) = message.photo().and_then(|sizes| sizes.iter().max_by_key(|p| p.width * p.height)) {
        return InboundEvent::Media(MediaRef {
            file_id: photo.file.id.0.clone(),
            kind: MediaKind::Photo,
            mime_type: Some("image/jpeg".to_owned()),
        });
    }
    if let Some(document) = message.document() {
        return InboundEvent::Media(MediaRef {
            file_id: document.file.id.0.clone(),
            kind: MediaKind::Document,
            mime_type: document.mime_type.as_ref().map(ToString::to_string),
        });
    }
    if let Some(voice) = message.voice() {
        return InboundEvent::Media(MediaRef {
            file_id: voice.file.id.0.clone(),
            kind: MediaKind::Voice,
            mime_type: voice.mime_type.as_ref().map(ToString::to_string),
        });
    }
    if let Some(video) = message.video() {
        return InboundEvent::Media(MediaRef {
            file_id: video.file.id.0.clone(),
            kind: MediaKind::Video,
            mime_type: video.mime_type.as_ref().map(ToString::to_string),
        });
    }
    if let Some(note) = message.video_note() {
        return InboundEvent::Media(MediaRef {
            file_id: note.file.id.0.clone(),
            kind: MediaKind::Video,
            mime_type: Some("video/mp4".to_owned()),
        });
    }
    let event_type = if message.sticker().is_some() {
        "sticker"
    } else if message.animation().is_some() {
        "animation"
    } else if message.location().is_some() {
        "location"
    } else if message.contact().is_some() {
        "contact"
    } else {
        "other"
    };
    InboundEvent::Unsupported { event_type: event_type.to_owned() }
}

/// Downloads the file from Telegram and PUTs it into media storage.
pub struct TelegramMediaUploader {
    bot: Bot,
    bot_token: SecretString,
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl TelegramMediaUploader {
    pub fn new(
        bot: Bot,
        bot_token: SecretString,
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Self {
        Self { bot, bot_token, http, base_url: base_url.into(), api_key }
    }
}

#[async_trait]
impl MediaUploader for TelegramMediaUploader {
    async fn upload(&self, media: &MediaRef, key: &str) -> Result<String, UploadError> {
        let file = self
            .bot
            .get_file(FileId(media.file_id.clone()))
            .await
            .map_err(|error| UploadError::Transport(error.to_string()))?;

        let download_url = format!(
            "https://api.telegram.org/file/bot{}/{}",
            self.bot_token.expose_secret(),
            file.path
        );
        let bytes = self
            .http
            .get(&download_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| UploadError::Transport(error.without_url().to_string()))?
            .bytes()
            .await
            .map_err(|error| UploadError::Transport(error.to_string()))?;

        let target = object_url(&self.base_url, key, &file.path, media.kind);
        let mut request = self
            .http
            .put(&target)
            .header(reqwest::header::CONTENT_TYPE, content_type(media))
            .body(bytes);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }
        request
            .send()
            .await
            .map_err(|error| UploadError::Transport(error.to_string()))?
            .error_for_status()
            .map_err(|error| UploadError::Storage(error.to_string()))?;

        info!(event_name = "storage.media.uploaded", key, kind = media.kind.as_str(), "media stored");
        Ok(target)
    }
}

/// `<base>/<key>.<ext>`, taking the extension from Telegram's file path when it has one.
pub fn object_url(base_url: &str, key: &str, telegram_path: &str, kind: MediaKind) -> String {
    let extension = telegram_path
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && !ext.contains('/'))
        .unwrap_or(match kind {
            MediaKind::Photo => "jpg",
            MediaKind::Document => "bin",
            MediaKind::Voice => "ogg",
            MediaKind::Video => "mp4",
        });
    format!("{}/{}.{}", base_url.trim_end_matches('/'), key.trim_start_matches('/'), extension)
}

fn content_type(media: &MediaRef) -> String {
    media.mime_type.clone().unwrap_or_else(|| {
        match media.kind {
            MediaKind::Photo => "image/jpeg",
            MediaKind::Document => "application/octet-stream",
            MediaKind::Voice => "audio/ogg",
            MediaKind::Video => "video/mp4",
        }
        .to_owned()
    })
}
