use serde::Serialize;

pub mod labels {
    pub const REGISTER_SELLER: &str = "🏭 Register as Seller";
    pub const VERIFY: &str = "✅ Verify Identity";
    pub const CREATE_STORE: &str = "🏪 Create Store";
    pub const TRUST_STORY: &str = "📖 Trust Story";
    pub const WEEKLY_PRODUCT: &str = "📦 Weekly Product";
    pub const BROWSE: &str = "🛍 Browse Products";
    pub const LINK_ACCOUNT: &str = "🔗 Link Account";
    pub const MISSIONS: &str = "🎯 Weekly Missions";
    pub const BALANCE: &str = "💰 My Balance";
    pub const CERTIFICATE: &str = "📜 My Certificate";
    pub const SHIPPING_LABEL: &str = "🏷 Shipping Label";
    pub const INVITE: &str = "🤝 Invite Friends";
    pub const WHATSAPP: &str = "📣 Share on WhatsApp";
    pub const REGISTER_BUYER: &str = "📝 Register as Buyer";
    pub const HELP: &str = "❓ Help";
    pub const CANCEL: &str = "❌ Cancel";
    pub const YES: &str = "✅ Yes";
    pub const NO: &str = "❌ No";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    Html,
    MarkdownV2,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InlineAction {
    Callback { data: String },
    Url { url: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub label: String,
    pub action: InlineAction,
}

impl InlineButton {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self { label: label.into(), action: InlineAction::Callback { data: data.into() } }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self { label: label.into(), action: InlineAction::Url { url: url.into() } }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Keyboard {
    Reply { rows: Vec<Vec<String>>, one_time: bool },
    Inline { rows: Vec<Vec<InlineButton>> },
    Remove,
}

impl Keyboard {
    pub fn reply<I, R, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Reply {
            rows: rows.into_iter().map(|row| row.into_iter().map(Into::into).collect()).collect(),
            one_time: false,
        }
    }

    pub fn one_time(self) -> Self {
        match self {
            Self::Reply { rows, .. } => Self::Reply { rows, one_time: true },
            other => other,
        }
    }

    pub fn inline(rows: Vec<Vec<InlineButton>>) -> Self {
        Self::Inline { rows }
    }

    /// Lays labels out `per_row` buttons wide.
    pub fn reply_grid<'a, I>(labels: I, per_row: usize) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let labels = labels.into_iter().map(str::to_owned).collect::<Vec<_>>();
        let rows = labels.chunks(per_row.max(1)).map(<[String]>::to_vec).collect::<Vec<_>>();
        Self::Reply { rows, one_time: true }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<Keyboard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), keyboard: None, parse_mode: None }
    }
}

pub struct MessageBuilder {
    lines: Vec<String>,
    keyboard: Option<Keyboard>,
    parse_mode: Option<ParseMode>,
}

impl MessageBuilder {
    pub fn new(first_line: impl Into<String>) -> Self {
        Self { lines: vec![first_line.into()], keyboard: None, parse_mode: None }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    pub fn keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn html(mut self) -> Self {
        self.parse_mode = Some(ParseMode::Html);
        self
    }

    pub fn build(self) -> OutgoingMessage {
        OutgoingMessage {
            text: self.lines.join("\n"),
            keyboard: self.keyboard,
            parse_mode: self.parse_mode,
        }
    }
}

pub fn main_menu() -> Keyboard {
    Keyboard::reply([
        vec![labels::REGISTER_SELLER, labels::VERIFY],
        vec![labels::CREATE_STORE, labels::TRUST_STORY],
        vec![labels::WEEKLY_PRODUCT, labels::BROWSE],
        vec![labels::MISSIONS, labels::BALANCE],
        vec![labels::CERTIFICATE, labels::SHIPPING_LABEL],
        vec![labels::INVITE, labels::WHATSAPP],
        vec![labels::LINK_ACCOUNT, labels::HELP],
    ])
}

/// A short user-facing notice that always hands the main menu back.
pub fn notice(text: impl Into<String>) -> OutgoingMessage {
    MessageBuilder::new(text).keyboard(main_menu()).build()
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
