use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::account::ChatId;
use crate::domain::mission::MissionType;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    SellerRegistration,
    Verification,
    StoreCreation,
    StoryCreation,
    WeeklyProductAdd,
    BuyerRegistration,
    ProductBrowsing,
}

impl FlowKind {
    /// Dispatch precedence when a chat has several active flows.
    pub const PRECEDENCE: [FlowKind; 7] = [
        Self::SellerRegistration,
        Self::Verification,
        Self::StoreCreation,
        Self::StoryCreation,
        Self::WeeklyProductAdd,
        Self::BuyerRegistration,
        Self::ProductBrowsing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SellerRegistration => "seller_registration",
            Self::Verification => "verification",
            Self::StoreCreation => "store_creation",
            Self::StoryCreation => "story_creation",
            Self::WeeklyProductAdd => "weekly_product_add",
            Self::BuyerRegistration => "buyer_registration",
            Self::ProductBrowsing => "product_browsing",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::PRECEDENCE.into_iter().find(|kind| kind.as_str() == normalized)
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::SellerRegistration => "Seller registration",
            Self::Verification => "Identity verification",
            Self::StoreCreation => "Store setup",
            Self::StoryCreation => "Trust story",
            Self::WeeklyProductAdd => "Weekly product",
            Self::BuyerRegistration => "Buyer registration",
            Self::ProductBrowsing => "Product browsing",
        }
    }

    /// Whether starting the flow needs an account linked to the chat.
    pub fn requires_link(&self) -> bool {
        !matches!(self, Self::BuyerRegistration | Self::ProductBrowsing)
    }

    /// The weekly mission a completed flow counts towards, if any.
    pub fn mission(&self) -> Option<MissionType> {
        match self {
            Self::WeeklyProductAdd => Some(MissionType::Product),
            _ => None,
        }
    }
}

/// Position of a flow: the step whose answer is awaited, or the completion
/// sentinel set just before finalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum StepCursor {
    Step(usize),
    Completed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    Url(String),
    Media { url: String },
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// URL of an uploaded photo or media object.
    pub fn as_url(&self) -> Option<&str> {
        match self {
            Self::Url(url) | Self::Media { url } => Some(url),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowInstance {
    pub chat_id: ChatId,
    pub kind: FlowKind,
    pub fields: BTreeMap<String, FieldValue>,
    pub cursor: StepCursor,
    pub identity: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlowInstance {
    pub fn start(
        chat_id: ChatId,
        kind: FlowKind,
        identity: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            chat_id,
            kind,
            fields: BTreeMap::new(),
            cursor: StepCursor::Step(1),
            identity,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn current_step(&self) -> Option<usize> {
        match self.cursor {
            StepCursor::Step(step) => Some(step),
            StepCursor::Completed => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.cursor == StepCursor::Completed
    }

    pub fn record(&mut self, field: &str, value: FieldValue, next_step: usize, now: DateTime<Utc>) {
        self.fields.insert(field.to_owned(), value);
        self.cursor = StepCursor::Step(next_step);
        self.updated_at = now;
    }

    pub fn text(&self, field: &str) -> Result<&str, DomainError> {
        self.fields.get(field).and_then(FieldValue::as_text).ok_or_else(|| self.missing(field))
    }

    pub fn flag(&self, field: &str) -> Result<bool, DomainError> {
        self.fields.get(field).and_then(FieldValue::as_bool).ok_or_else(|| self.missing(field))
    }

    pub fn url(&self, field: &str) -> Result<&str, DomainError> {
        self.fields.get(field).and_then(FieldValue::as_url).ok_or_else(|| self.missing(field))
    }

    fn missing(&self, field: &str) -> DomainError {
        DomainError::MissingField { kind: self.kind, field: field.to_owned() }
    }
}
