//! One-shot menu actions that do not run through the step engine.

use tracing::info;

use karigar_core::domain::account::{Account, ChatId};
use karigar_core::domain::mission::MissionType;
use karigar_core::errors::FlowError;
use karigar_core::flows::{Collaborators, FlowKind};
use karigar_core::messages::{
    escape_html, labels, main_menu, notice, InlineButton, Keyboard, MessageBuilder,
};

use crate::events::DispatchError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotSettings {
    pub bot_username: String,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self { bot_username: "karigar_bot".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    Sent,
    Unlinked,
    /// The account lacks a prerequisite, e.g. a certificate without verification.
    NotEligible { requires: FlowKind },
    DocumentIssued { url: String },
}

pub struct StaticActions {
    deps: Collaborators,
    settings: BotSettings,
}

impl StaticActions {
    pub fn new(deps: Collaborators, settings: BotSettings) -> Self {
        Self { deps, settings }
    }

    pub async fn welcome(
        &self,
        chat_id: ChatId,
        sender_name: Option<&str>,
    ) -> Result<ActionOutcome, DispatchError> {
        let linked = self.deps.records.find_account_by_chat(chat_id).await?;
        let name = linked
            .as_ref()
            .map(|account| account.name.as_str())
            .or(sender_name)
            .unwrap_or("there");
        let mut builder = MessageBuilder::new(format!("👋 Namaste, {name}! Welcome to Karigar."))
            .line("Sell your craft, build trust with buyers and complete weekly missions.");
        if linked.is_none() {
            builder = builder
                .blank()
                .line(format!("Tap \"{}\" to connect your account.", labels::LINK_ACCOUNT));
        }
        self.deps.messenger.send(chat_id, builder.keyboard(main_menu()).build()).await?;
        Ok(ActionOutcome::Sent)
    }

    pub async fn help(&self, chat_id: ChatId) -> Result<ActionOutcome, DispatchError> {
        let message = MessageBuilder::new("❓ <b>How Karigar works</b>")
            .html()
            .line(format!("{} · add your first product", labels::REGISTER_SELLER))
            .line(format!("{} · get your verified certificate", labels::VERIFY))
            .line(format!("{} · set up your storefront", labels::CREATE_STORE))
            .line(format!("{} · tell buyers your story", labels::TRUST_STORY))
            .line(format!("{} · one new product every week", labels::WEEKLY_PRODUCT))
            .line(format!("{} · explore products by category", labels::BROWSE))
            .blank()
            .line("Send /cancel at any time to stop what you are doing.")
            .keyboard(main_menu())
            .build();
        self.deps.messenger.send(chat_id, message).await?;
        Ok(ActionOutcome::Sent)
    }

    pub async fn unknown(&self, chat_id: ChatId) -> Result<ActionOutcome, DispatchError> {
        self.deps
            .messenger
            .send(chat_id, notice("🤔 Sorry, I didn't understand that. Pick an option from the menu."))
            .await?;
        Ok(ActionOutcome::Sent)
    }

    pub async fn balance(&self, chat_id: ChatId) -> Result<ActionOutcome, DispatchError> {
        let Some(account) = self.linked_account(chat_id).await? else {
            return Ok(ActionOutcome::Unlinked);
        };
        self.deps
            .messenger
            .send(chat_id, notice(format!("💰 Your balance is {} credits.", account.balance)))
            .await?;
        Ok(ActionOutcome::Sent)
    }

    pub async fn missions(&self, chat_id: ChatId) -> Result<ActionOutcome, DispatchError> {
        let Some(account) = self.linked_account(chat_id).await? else {
            return Ok(ActionOutcome::Unlinked);
        };
        let status = self.deps.missions.status(&account.email).await?;

        let mut builder = MessageBuilder::new("🎯 <b>This week's missions</b>").html();
        let mut claim_rows = Vec::new();
        for (mission, done) in status {
            let mark = if done { "✅" } else { "⬜" };
            builder = builder.line(format!(
                "{mark} {} (+{} credits)",
                escape_html(mission.title()),
                self.deps.missions.reward_for(mission)
            ));
            if !done && mission != MissionType::Product {
                claim_rows.push(vec![InlineButton::callback(
                    format!("Claim: {}", mission.title()),
                    format!("mission_{}", mission.as_str()),
                )]);
            }
        }
        let message = if claim_rows.is_empty() {
            builder.keyboard(main_menu()).build()
        } else {
            builder.keyboard(Keyboard::inline(claim_rows)).build()
        };
        self.deps.messenger.send(chat_id, message).await?;
        Ok(ActionOutcome::Sent)
    }

    pub async fn certificate(&self, chat_id: ChatId) -> Result<ActionOutcome, DispatchError> {
        let Some(account) = self.linked_account(chat_id).await? else {
            return Ok(ActionOutcome::Unlinked);
        };
        let seller = self.deps.records.find_seller_by_email(&account.email).await?;
        let Some(seller) = seller.filter(|seller| seller.verification.is_some()) else {
            self.deps
                .messenger
                .send(
                    chat_id,
                    notice(format!("Complete \"{}\" first to get your certificate.", labels::VERIFY)),
                )
                .await?;
            return Ok(ActionOutcome::NotEligible { requires: FlowKind::Verification });
        };

        let url = self.deps.documents.render_certificate(&seller, &account).await?;
        self.send_document(chat_id, "📜 Your seller certificate is ready.", "Open certificate", &url)
            .await?;
        Ok(ActionOutcome::DocumentIssued { url })
    }

    pub async fn shipping_label(&self, chat_id: ChatId) -> Result<ActionOutcome, DispatchError> {
        let Some(account) = self.linked_account(chat_id).await? else {
            return Ok(ActionOutcome::Unlinked);
        };
        let seller = self.deps.records.find_seller_by_email(&account.email).await?;
        let Some(seller) = seller.filter(|seller| seller.store.is_some()) else {
            self.deps
                .messenger
                .send(
                    chat_id,
                    notice(format!(
                        "Set up your store with \"{}\" before printing labels.",
                        labels::CREATE_STORE
                    )),
                )
                .await?;
            return Ok(ActionOutcome::NotEligible { requires: FlowKind::StoreCreation });
        };

        let url = self.deps.documents.render_shipping_label(&seller, &account).await?;
        self.send_document(chat_id, "🏷 Your shipping label is ready.", "Download label", &url)
            .await?;
        Ok(ActionOutcome::DocumentIssued { url })
    }

    pub async fn invite(&self, chat_id: ChatId) -> Result<ActionOutcome, DispatchError> {
        let Some(_account) = self.linked_account(chat_id).await? else {
            return Ok(ActionOutcome::Unlinked);
        };
        let link = self.referral_link(chat_id);
        let text = "Join me on Karigar, the marketplace for handmade goods!";
        let share_url = format!(
            "https://t.me/share/url?url={}&text={}",
            urlencoding::encode(&link),
            urlencoding::encode(text)
        );

        let message = MessageBuilder::new("🤝 Invite a friend to Karigar")
            .line(format!("Your invite link: {link}"))
            .line(format!(
                "Claim +{} credits once you've shared it.",
                self.deps.missions.reward_for(MissionType::Invite)
            ))
            .keyboard(Keyboard::inline(vec![
                vec![InlineButton::url("📤 Share invite", share_url)],
                vec![InlineButton::callback("✅ I invited a friend", "mission_invite")],
            ]))
            .build();
        self.deps.messenger.send(chat_id, message).await?;
        info!(event_name = "action.invite", chat_id = chat_id.0, "invite link issued");
        Ok(ActionOutcome::Sent)
    }

    pub async fn whatsapp_share(&self, chat_id: ChatId) -> Result<ActionOutcome, DispatchError> {
        let Some(_account) = self.linked_account(chat_id).await? else {
            return Ok(ActionOutcome::Unlinked);
        };
        let link = self.referral_link(chat_id);
        let share_url = format!(
            "https://wa.me/?text={}",
            urlencoding::encode(&format!("Discover handmade products on Karigar: {link}"))
        );

        let message = MessageBuilder::new("📣 Share your store on WhatsApp")
            .line(format!(
                "Claim +{} credits once you've shared it.",
                self.deps.missions.reward_for(MissionType::Whatsapp)
            ))
            .keyboard(Keyboard::inline(vec![
                vec![InlineButton::url("📲 Open WhatsApp", share_url)],
                vec![InlineButton::callback("✅ I shared it", "mission_whatsapp")],
            ]))
            .build();
        self.deps.messenger.send(chat_id, message).await?;
        Ok(ActionOutcome::Sent)
    }

    fn referral_link(&self, chat_id: ChatId) -> String {
        format!("https://t.me/{}?start=ref{}", self.settings.bot_username, chat_id.0)
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        headline: &str,
        button: &str,
        url: &str,
    ) -> Result<(), DispatchError> {
        let message = MessageBuilder::new(headline)
            .line(url)
            .keyboard(Keyboard::inline(vec![vec![InlineButton::url(button, url)]]))
            .build();
        self.deps.messenger.send(chat_id, message).await?;
        Ok(())
    }

    /// Looks up the chat's account, telling the chat to link when there is none.
    async fn linked_account(&self, chat_id: ChatId) -> Result<Option<Account>, DispatchError> {
        let account = self.deps.records.find_account_by_chat(chat_id).await?;
        if account.is_none() {
            let error = FlowError::Unlinked { chat_id };
            self.deps.messenger.send(chat_id, notice(error.user_message())).await?;
        }
        Ok(account)
    }
}
