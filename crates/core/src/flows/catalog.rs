//! Static step definitions for every [`FlowKind`].
//!
//! Seller registration and the weekly product mission share one product
//! catalog; every other flow has its own.

use serde::Serialize;

use crate::domain::seller::ProductCategory;
use crate::flows::states::{FieldValue, FlowKind};
use crate::messages::{labels, Keyboard, MessageBuilder, OutgoingMessage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceSet {
    Category,
    YesNo,
}

impl ChoiceSet {
    pub fn labels(&self) -> Vec<&'static str> {
        match self {
            Self::Category => ProductCategory::ALL.iter().map(ProductCategory::label).collect(),
            Self::YesNo => vec![labels::YES, labels::NO],
        }
    }

    /// Exact label match only; anything else is outside the set.
    pub fn parse(&self, input: &str) -> Option<FieldValue> {
        let input = input.trim();
        match self {
            Self::Category => ProductCategory::from_label(input)
                .map(|category| FieldValue::Text(category.label().to_owned())),
            Self::YesNo if input == labels::YES => Some(FieldValue::Bool(true)),
            Self::YesNo if input == labels::NO => Some(FieldValue::Bool(false)),
            Self::YesNo => None,
        }
    }

    pub fn keyboard(&self) -> Keyboard {
        Keyboard::reply_grid(self.labels(), 2)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "choices", rename_all = "snake_case")]
pub enum InputKind {
    Text,
    Photo,
    Document,
    VoiceOrVideo,
    Choice(ChoiceSet),
}

impl InputKind {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Text => "a text message",
            Self::Photo => "a photo",
            Self::Document => "a document (PDF or image file)",
            Self::VoiceOrVideo => "a voice note or a video",
            Self::Choice(_) => "one of the buttons below",
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, Self::Photo | Self::Document | Self::VoiceOrVideo)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    Phone,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StepDefinition {
    pub field: &'static str,
    pub prompt: &'static str,
    pub input: InputKind,
    pub validator: Option<Validator>,
}

const fn step(field: &'static str, prompt: &'static str, input: InputKind) -> StepDefinition {
    StepDefinition { field, prompt, input, validator: None }
}

const fn phone_step(field: &'static str, prompt: &'static str) -> StepDefinition {
    StepDefinition { field, prompt, input: InputKind::Text, validator: Some(Validator::Phone) }
}

impl StepDefinition {
    pub fn keyboard(&self) -> Keyboard {
        match self.input {
            InputKind::Choice(choices) => choices.keyboard(),
            _ => Keyboard::reply([[labels::CANCEL]]),
        }
    }

    pub fn prompt_message(&self, index: usize, total: usize) -> OutgoingMessage {
        MessageBuilder::new(format!("Step {index} of {total}"))
            .line(self.prompt)
            .keyboard(self.keyboard())
            .build()
    }
}

const PRODUCT_STEPS: [StepDefinition; 6] = [
    step("productName", "What is the name of your product?", InputKind::Text),
    step("productPhoto", "Send a clear photo of the product 📸", InputKind::Photo),
    step("productDescription", "Describe the product in a few sentences.", InputKind::Text),
    step(
        "productType",
        "Which category does it belong to?",
        InputKind::Choice(ChoiceSet::Category),
    ),
    step("location", "Where is it made? (city, state)", InputKind::Text),
    step("sellsOnline", "Do you already sell online?", InputKind::Choice(ChoiceSet::YesNo)),
];

const VERIFICATION_STEPS: [StepDefinition; 5] = [
    step("fullName", "Enter your full name as on your ID.", InputKind::Text),
    phone_step("phoneNumber", "Enter your phone number with country code, e.g. +919876543210."),
    step("idDocument", "Upload your government ID document 🪪", InputKind::Document),
    step("selfiePhoto", "Send a selfie holding your ID 🤳", InputKind::Photo),
    step("businessAddress", "Enter your business address.", InputKind::Text),
];

const STORE_STEPS: [StepDefinition; 5] = [
    step("storeName", "What should your store be called?", InputKind::Text),
    step("storeLogo", "Send your store logo as a photo.", InputKind::Photo),
    step("storeDescription", "Tell buyers what your store offers.", InputKind::Text),
    step("storeCategory", "Pick your main category.", InputKind::Choice(ChoiceSet::Category)),
    phone_step("contactPhone", "Enter a contact phone number with country code."),
];

const STORY_STEPS: [StepDefinition; 4] = [
    step("storyTitle", "Give your story a title.", InputKind::Text),
    step("storyText", "Tell us how your craft began.", InputKind::Text),
    step("storyMedia", "Record a voice note or short video about your work 🎙", InputKind::VoiceOrVideo),
    step("workshopPhoto", "Send a photo of your workshop.", InputKind::Photo),
];

const BUYER_STEPS: [StepDefinition; 3] = [
    step("fullName", "What is your full name?", InputKind::Text),
    phone_step("phoneNumber", "Enter your phone number with country code, e.g. +919876543210."),
    step("city", "Which city do you live in?", InputKind::Text),
];

const BROWSING_STEPS: [StepDefinition; 1] = [step(
    "category",
    "Which category would you like to browse?",
    InputKind::Choice(ChoiceSet::Category),
)];

#[derive(Clone, Copy, Debug)]
pub struct StepCatalog {
    pub kind: FlowKind,
    steps: &'static [StepDefinition],
}

impl StepCatalog {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 1-based lookup.
    pub fn step(&self, index: usize) -> Option<&'static StepDefinition> {
        index.checked_sub(1).and_then(|offset| self.steps.get(offset))
    }

    pub fn steps(&self) -> &'static [StepDefinition] {
        self.steps
    }
}

pub fn catalog_for(kind: FlowKind) -> StepCatalog {
    let steps: &'static [StepDefinition] = match kind {
        FlowKind::SellerRegistration | FlowKind::WeeklyProductAdd => &PRODUCT_STEPS,
        FlowKind::Verification => &VERIFICATION_STEPS,
        FlowKind::StoreCreation => &STORE_STEPS,
        FlowKind::StoryCreation => &STORY_STEPS,
        FlowKind::BuyerRegistration => &BUYER_STEPS,
        FlowKind::ProductBrowsing => &BROWSING_STEPS,
    };
    StepCatalog { kind, steps }
}
