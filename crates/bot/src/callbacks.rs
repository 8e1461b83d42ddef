//! Inline button callbacks. Payloads are `action_entity`; callbacks never
//! touch flow instances.

use std::sync::Arc;

use tracing::info;

use karigar_core::domain::account::ChatId;
use karigar_core::domain::mission::MissionType;
use karigar_core::errors::FlowError;
use karigar_core::messages::notice;
use karigar_core::missions::{ClaimOutcome, MissionTracker};
use karigar_core::ports::{Messenger, RecordStore};

use crate::events::DispatchError;

pub const NOT_AVAILABLE: &str = "This action is not available.";
pub const SELLER_NOT_FOUND: &str = "Seller not found. They may have left the marketplace.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    Sample { seller_email: String },
    Chat { seller_email: String },
    Deal { seller_email: String },
    ClaimMission(MissionType),
    Unknown { data: String },
}

/// Splits on the first underscore so emails with underscores stay intact.
pub fn parse_callback(data: &str) -> CallbackAction {
    let Some((action, entity)) = data.trim().split_once('_') else {
        return CallbackAction::Unknown { data: data.to_owned() };
    };
    if entity.is_empty() {
        return CallbackAction::Unknown { data: data.to_owned() };
    }
    let seller_email = entity.to_owned();
    match action {
        "sample" => CallbackAction::Sample { seller_email },
        "chat" => CallbackAction::Chat { seller_email },
        "deal" => CallbackAction::Deal { seller_email },
        "mission" => match MissionType::parse(entity) {
            Some(mission @ (MissionType::Invite | MissionType::Whatsapp)) => {
                CallbackAction::ClaimMission(mission)
            }
            _ => CallbackAction::Unknown { data: data.to_owned() },
        },
        _ => CallbackAction::Unknown { data: data.to_owned() },
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackOutcome {
    Answered(CallbackAction),
    SellerNotFound,
    MissionClaimed { mission: MissionType, reward: i64, balance: i64 },
    MissionAlreadyCompleted(MissionType),
    Unlinked,
    NotAvailable,
}

pub struct CallbackHandler {
    records: Arc<dyn RecordStore>,
    missions: Arc<MissionTracker>,
    messenger: Arc<dyn Messenger>,
}

impl CallbackHandler {
    pub fn new(
        records: Arc<dyn RecordStore>,
        missions: Arc<MissionTracker>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self { records, missions, messenger }
    }

    pub async fn handle(&self, chat_id: ChatId, data: &str) -> Result<CallbackOutcome, DispatchError> {
        let action = parse_callback(data);
        info!(
            event_name = "dispatch.callback",
            chat_id = chat_id.0,
            action = ?action,
            "inline callback received"
        );

        match action {
            CallbackAction::Sample { ref seller_email }
            | CallbackAction::Chat { ref seller_email }
            | CallbackAction::Deal { ref seller_email } => {
                self.seller_action(chat_id, seller_email, &action).await
            }
            CallbackAction::ClaimMission(mission) => self.claim(chat_id, mission).await,
            CallbackAction::Unknown { .. } => {
                self.messenger.send(chat_id, notice(NOT_AVAILABLE)).await?;
                Ok(CallbackOutcome::NotAvailable)
            }
        }
    }

    async fn seller_action(
        &self,
        chat_id: ChatId,
        seller_email: &str,
        action: &CallbackAction,
    ) -> Result<CallbackOutcome, DispatchError> {
        let Some(seller) = self.records.find_seller_by_email(seller_email).await? else {
            self.messenger.send(chat_id, notice(SELLER_NOT_FOUND)).await?;
            return Ok(CallbackOutcome::SellerNotFound);
        };
        let name = seller.display_name();

        let text = match action {
            CallbackAction::Sample { .. } => {
                format!("🎁 Sample request sent to {name}. They will reach out with details.")
            }
            CallbackAction::Chat { .. } => {
                let contact = seller
                    .store
                    .as_ref()
                    .map(|store| store.contact_phone.clone())
                    .unwrap_or_else(|| seller.email.clone());
                format!("💬 You can reach {name} at {contact}.")
            }
            CallbackAction::Deal { .. } => {
                format!("🤝 Deal enquiry sent to {name}. Expect a quote soon.")
            }
            _ => NOT_AVAILABLE.to_owned(),
        };
        self.messenger.send(chat_id, notice(text)).await?;
        Ok(CallbackOutcome::Answered(action.clone()))
    }

    async fn claim(&self, chat_id: ChatId, mission: MissionType) -> Result<CallbackOutcome, DispatchError> {
        let Some(account) = self.records.find_account_by_chat(chat_id).await? else {
            let error = FlowError::Unlinked { chat_id };
            self.messenger.send(chat_id, notice(error.user_message())).await?;
            return Ok(CallbackOutcome::Unlinked);
        };

        match self.missions.claim(&account.email, mission).await? {
            ClaimOutcome::Claimed { reward, balance } => {
                self.messenger
                    .send(
                        chat_id,
                        notice(format!(
                            "🎉 Mission complete: {}! 💰 +{reward} credits. Balance: {balance}",
                            mission.title()
                        )),
                    )
                    .await?;
                Ok(CallbackOutcome::MissionClaimed { mission, reward, balance })
            }
            ClaimOutcome::AlreadyCompleted => {
                let error = FlowError::MissionAlreadyCompleted { mission };
                self.messenger.send(chat_id, notice(error.user_message())).await?;
                Ok(CallbackOutcome::MissionAlreadyCompleted(mission))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use karigar_core::domain::mission::MissionType;

    use super::{parse_callback, CallbackAction};

    #[test]
    fn parses_seller_actions_on_the_first_underscore() {
        assert_eq!(
            parse_callback("sample_first_last@x.com"),
            CallbackAction::Sample { seller_email: "first_last@x.com".to_owned() }
        );
        assert_eq!(
            parse_callback("deal_seller@x.com"),
            CallbackAction::Deal { seller_email: "seller@x.com".to_owned() }
        );
    }

    #[test]
    fn mission_callbacks_only_claim_invite_and_whatsapp() {
        assert_eq!(parse_callback("mission_invite"), CallbackAction::ClaimMission(MissionType::Invite));
        assert_eq!(
            parse_callback("mission_whatsapp"),
            CallbackAction::ClaimMission(MissionType::Whatsapp)
        );
        assert!(matches!(parse_callback("mission_product"), CallbackAction::Unknown { .. }));
    }

    #[test]
    fn malformed_payloads_are_unknown() {
        for data in ["refund", "sample_", "wishlist_seller@x.com", ""] {
            assert!(matches!(parse_callback(data), CallbackAction::Unknown { .. }), "data {data}");
        }
    }
}
