use thiserror::Error;

use crate::domain::account::ChatId;
use crate::domain::mission::MissionType;
use crate::flows::states::FlowKind;
use crate::ports::{MessagingError, RenderError, StoreError, UploadError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{kind:?} has no step {step}")]
    UnknownStep { kind: FlowKind, step: usize },
    #[error("{kind:?} expected an answer for step {expected}, got step {got}")]
    OutOfSequence { kind: FlowKind, expected: usize, got: usize },
    #[error("flow {kind:?} is missing collected field `{field}`")]
    MissingField { kind: FlowKind, field: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures of a single flow advance. Validation and upload failures are
/// recovered inside the engine by re-prompting and are only returned by the
/// lower level validation helpers.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("chat {chat_id} has no linked account")]
    Unlinked { chat_id: ChatId },
    #[error("validation failed for `{field}`: {reason}")]
    ValidationFailed { field: String, reason: String },
    #[error("media upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("document rendering failed: {0}")]
    Render(#[from] RenderError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
    #[error("account {email} is already linked to another chat")]
    DuplicateLink { email: String },
    #[error("chat {chat_id} is already linked to {email}")]
    ChatAlreadyLinked { chat_id: ChatId, email: String },
    #[error("outbound message failed: {0}")]
    Messaging(#[from] MessagingError),
    #[error("mission `{}` already completed this week", .mission.as_str())]
    MissionAlreadyCompleted { mission: MissionType },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl FlowError {
    /// Short text shown to the chat; always followed by the main menu.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unlinked { .. } => {
                "Your Telegram account is not linked yet. Tap \"🔗 Link Account\" to get started."
            }
            Self::ValidationFailed { .. } => "That answer doesn't look right. Please try again.",
            Self::Upload(_) => "We couldn't save that file. Please send it again.",
            Self::Render(_) => "We couldn't prepare your document right now. Please try again later.",
            Self::DuplicateLink { .. } => {
                "This email is already linked to another Telegram account."
            }
            Self::ChatAlreadyLinked { .. } => {
                "This Telegram account is already linked to a Karigar account."
            }
            Self::MissionAlreadyCompleted { .. } => {
                "You've already completed this mission this week. Come back next week!"
            }
            Self::Persistence(_) | Self::Messaging(_) | Self::Domain(_) => {
                "Something went wrong while saving. Please start again from the menu."
            }
        }
    }
}
