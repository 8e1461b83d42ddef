//! Resolution of free text into a [`BotCommand`].
//!
//! Resolution happens once per inbound text that no linking session or active
//! flow claimed. Slash commands win over button labels, button labels over
//! greetings, and everything else is [`BotCommand::Unknown`].

use karigar_core::flows::FlowKind;
use karigar_core::messages::labels;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Greeting,
    LinkAccount,
    Cancel,
    StartFlow(FlowKind),
    RegisterBuyer,
    Balance,
    Missions,
    Certificate,
    ShippingLabel,
    Invite,
    WhatsappShare,
    Unknown { text: String },
}

const GREETINGS: [&str; 7] =
    ["hi", "hello", "hey", "namaste", "good morning", "good afternoon", "good evening"];

pub fn resolve_command(text: &str) -> BotCommand {
    let trimmed = text.trim();
    if let Some(command) = trimmed.strip_prefix('/').and_then(parse_slash_command) {
        return command;
    }
    if let Some(command) = parse_button_label(trimmed) {
        return command;
    }
    if is_greeting(trimmed) {
        return BotCommand::Greeting;
    }
    BotCommand::Unknown { text: trimmed.to_owned() }
}

/// `/name@bot_username args` resolves on `name` alone; deep-link payloads
/// after `/start` are ignored.
fn parse_slash_command(body: &str) -> Option<BotCommand> {
    let head = body.split_whitespace().next()?;
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
    let command = match name.as_str() {
        "start" => BotCommand::Start,
        "help" => BotCommand::Help,
        "link" => BotCommand::LinkAccount,
        "cancel" => BotCommand::Cancel,
        "register" | "seller" => BotCommand::StartFlow(FlowKind::SellerRegistration),
        "verify" => BotCommand::StartFlow(FlowKind::Verification),
        "store" => BotCommand::StartFlow(FlowKind::StoreCreation),
        "story" => BotCommand::StartFlow(FlowKind::StoryCreation),
        "addproduct" | "product" => BotCommand::StartFlow(FlowKind::WeeklyProductAdd),
        "browse" => BotCommand::StartFlow(FlowKind::ProductBrowsing),
        "buyer" => BotCommand::RegisterBuyer,
        "balance" => BotCommand::Balance,
        "missions" => BotCommand::Missions,
        "certificate" => BotCommand::Certificate,
        "label" => BotCommand::ShippingLabel,
        "invite" => BotCommand::Invite,
        "share" => BotCommand::WhatsappShare,
        _ => return None,
    };
    Some(command)
}

fn parse_button_label(text: &str) -> Option<BotCommand> {
    let command = match text {
        labels::REGISTER_SELLER => BotCommand::StartFlow(FlowKind::SellerRegistration),
        labels::VERIFY => BotCommand::StartFlow(FlowKind::Verification),
        labels::CREATE_STORE => BotCommand::StartFlow(FlowKind::StoreCreation),
        labels::TRUST_STORY => BotCommand::StartFlow(FlowKind::StoryCreation),
        labels::WEEKLY_PRODUCT => BotCommand::StartFlow(FlowKind::WeeklyProductAdd),
        labels::BROWSE => BotCommand::StartFlow(FlowKind::ProductBrowsing),
        labels::LINK_ACCOUNT => BotCommand::LinkAccount,
        labels::MISSIONS => BotCommand::Missions,
        labels::BALANCE => BotCommand::Balance,
        labels::CERTIFICATE => BotCommand::Certificate,
        labels::SHIPPING_LABEL => BotCommand::ShippingLabel,
        labels::INVITE => BotCommand::Invite,
        labels::WHATSAPP => BotCommand::WhatsappShare,
        labels::REGISTER_BUYER => BotCommand::RegisterBuyer,
        labels::HELP => BotCommand::Help,
        labels::CANCEL => BotCommand::Cancel,
        _ => return None,
    };
    Some(command)
}

fn is_greeting(text: &str) -> bool {
    let lowered = text.to_lowercase();
    GREETINGS.iter().any(|greeting| lowered.starts_with(greeting))
}

/// True for the inputs that abandon an active flow.
pub fn is_cancel(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed == labels::CANCEL
        || trimmed.strip_prefix('/').and_then(parse_slash_command) == Some(BotCommand::Cancel)
}
