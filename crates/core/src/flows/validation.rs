use std::sync::OnceLock;

use regex::Regex;

use crate::errors::FlowError;
use crate::flows::catalog::{InputKind, StepDefinition, Validator};
use crate::flows::states::FieldValue;

pub const PHONE_ERROR: &str =
    "❗ Please enter a valid phone number starting with + and your country code, e.g. +919876543210.";
pub const EMPTY_TEXT_ERROR: &str = "❗ Please type an answer before continuing.";
pub const CHOICE_ERROR: &str = "❗ Please pick one of the options on the keyboard.";

const MIN_PHONE_DIGITS: usize = 10;
const MAX_PHONE_DIGITS: usize = 15;
const INDIA_PREFIX: &str = "91";
const INDIA_SUBSCRIBER_DIGITS: usize = 10;

/// Returns the cleaned number (`+` followed by digits only).
pub fn validate_phone(input: &str) -> Result<String, FlowError> {
    let rejected = || FlowError::ValidationFailed {
        field: "phone".to_owned(),
        reason: PHONE_ERROR.to_owned(),
    };

    let rest = input.trim().strip_prefix('+').ok_or_else(rejected)?;
    if rest.chars().any(|ch| !(ch.is_ascii_digit() || matches!(ch, ' ' | '-' | '(' | ')' | '.'))) {
        return Err(rejected());
    }

    let digits = rest.chars().filter(char::is_ascii_digit).collect::<String>();
    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len()) {
        return Err(rejected());
    }
    if let Some(subscriber) = digits.strip_prefix(INDIA_PREFIX) {
        if subscriber.len() != INDIA_SUBSCRIBER_DIGITS {
            return Err(rejected());
        }
    }

    Ok(format!("+{digits}"))
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$")
            .unwrap_or_else(|error| panic!("email pattern must compile: {error}"))
    })
}

/// Lower-cased email if the format is plausible.
pub fn normalize_email(input: &str) -> Option<String> {
    let candidate = input.trim();
    email_pattern().is_match(candidate).then(|| candidate.to_ascii_lowercase())
}

/// Validates a text answer for a non-media step and converts it to its stored value.
pub fn validate_text(step: &StepDefinition, input: &str) -> Result<FieldValue, FlowError> {
    let rejected = |reason: &str| FlowError::ValidationFailed {
        field: step.field.to_owned(),
        reason: reason.to_owned(),
    };

    match step.input {
        InputKind::Choice(choices) => choices.parse(input).ok_or_else(|| rejected(CHOICE_ERROR)),
        InputKind::Text => {
            let trimmed = input.trim();
            if trimmed.is_empty() {
                return Err(rejected(EMPTY_TEXT_ERROR));
            }
            match step.validator {
                Some(Validator::Phone) => validate_phone(trimmed)
                    .map(FieldValue::Text)
                    .map_err(|_| rejected(PHONE_ERROR)),
                None => Ok(FieldValue::Text(trimmed.to_owned())),
            }
        }
        InputKind::Photo | InputKind::Document | InputKind::VoiceOrVideo => Err(rejected(
            &format!("❗ This step needs {}.", step.input.describe()),
        )),
    }
}
