use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::config::RewardsConfig;
use crate::domain::account::{AccountRole, ChatId, NewAccount};
use crate::domain::seller::{
    ProductCategory, ProductRecord, Seller, SellerUpdate, StoreProfile, TrustStory,
    VerificationDetails, VerificationStatus,
};
use crate::errors::{DomainError, FlowError};
use crate::flows::catalog::{catalog_for, InputKind, StepDefinition};
use crate::flows::states::{FieldValue, FlowInstance, FlowKind, StepCursor};
use crate::flows::store::FlowStateStore;
use crate::flows::validation::validate_text;
use crate::messages::{
    escape_html, main_menu, notice, InlineButton, Keyboard, MessageBuilder, OutgoingMessage,
};
use crate::missions::MissionTracker;
use crate::ports::{
    DocumentRenderer, MediaKind, MediaRef, MediaUploader, Messenger, RecordStore, StoreError,
};

const BROWSE_LIMIT: usize = 10;
/// Telegram rejects inline buttons whose `callback_data` exceeds 64 bytes.
const CALLBACK_DATA_LIMIT: usize = 64;
const UPLOAD_RETRY: &str = "⚠️ We couldn't save your file. Please send it again.";

/// Everything the engine and the dispatcher talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub flows: Arc<dyn FlowStateStore>,
    pub records: Arc<dyn RecordStore>,
    pub media: Arc<dyn MediaUploader>,
    pub documents: Arc<dyn DocumentRenderer>,
    pub messenger: Arc<dyn Messenger>,
    pub missions: Arc<MissionTracker>,
    pub audit: Arc<dyn AuditSink>,
}

/// Raw answer supplied for the step being advanced past.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepInput {
    Empty,
    Text(String),
    Media(MediaRef),
}

impl StepInput {
    pub fn matches(&self, expected: InputKind) -> bool {
        match (self, expected) {
            (Self::Text(_), InputKind::Text | InputKind::Choice(_)) => true,
            (Self::Media(media), InputKind::Photo) => media.kind == MediaKind::Photo,
            (Self::Media(media), InputKind::Document) => media.kind == MediaKind::Document,
            (Self::Media(media), InputKind::VoiceOrVideo) => {
                matches!(media.kind, MediaKind::Voice | MediaKind::Video)
            }
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub kind: FlowKind,
    pub email: Option<String>,
    pub reward: i64,
    pub balance: Option<i64>,
    pub document_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The prompt for `step` was sent and the instance stored.
    Prompted { step: usize },
    /// The answer for `step` was rejected; the same prompt was sent again.
    Reprompted { step: usize, reason: String },
    Completed(Completion),
    /// The instance already passed its completion guard.
    AlreadyCompleted,
    NoActiveFlow,
}

/// Drives every [`FlowKind`] through its catalog.
///
/// Errors returned from [`StepEngine::advance`] have already been reported to
/// the chat, so callers only need to log them.
pub struct StepEngine {
    deps: Collaborators,
    rewards: RewardsConfig,
}

impl StepEngine {
    pub fn new(deps: Collaborators, rewards: RewardsConfig) -> Self {
        Self { deps, rewards }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.deps
    }

    pub async fn advance(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
        input: StepInput,
        target_step: usize,
    ) -> Result<AdvanceOutcome, FlowError> {
        let correlation_id = Uuid::new_v4().to_string();
        self.advance_traced(chat_id, kind, input, target_step, &correlation_id).await
    }

    pub async fn advance_traced(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
        input: StepInput,
        target_step: usize,
        correlation_id: &str,
    ) -> Result<AdvanceOutcome, FlowError> {
        let audit = AuditContext::for_flow(chat_id, kind, correlation_id);
        match target_step {
            0 => Err(DomainError::UnknownStep { kind, step: 0 }.into()),
            1 => self.start(chat_id, kind, None, &audit).await,
            _ => self.answer(chat_id, kind, input, target_step, &audit).await,
        }
    }

    /// Starts `kind` anchored on an identity captured outside the flow.
    pub async fn start_with_identity(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
        email: &str,
        correlation_id: &str,
    ) -> Result<AdvanceOutcome, FlowError> {
        let audit = AuditContext::for_flow(chat_id, kind, correlation_id);
        self.start(chat_id, kind, Some(email.to_owned()), &audit).await
    }

    /// Drops the chat's instance of `kind` and hands back the main menu.
    pub async fn abandon(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
        correlation_id: &str,
    ) -> Result<bool, FlowError> {
        let removed = self.deps.flows.remove(chat_id, kind).await?.is_some();
        if removed {
            let audit = AuditContext::for_flow(chat_id, kind, correlation_id);
            self.deps.audit.emit(audit.event(
                "flow.abandoned",
                AuditCategory::Flow,
                AuditOutcome::Rejected,
            ));
            info!(
                event_name = "flow.abandoned",
                correlation_id,
                chat_id = chat_id.0,
                flow_kind = kind.as_str(),
                "flow abandoned by user"
            );
        }
        let text = if removed {
            format!("❎ {} cancelled.", kind.title())
        } else {
            "Nothing to cancel.".to_owned()
        };
        self.deps.messenger.send(chat_id, notice(text)).await?;
        Ok(removed)
    }

    async fn start(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
        identity: Option<String>,
        audit: &AuditContext,
    ) -> Result<AdvanceOutcome, FlowError> {
        let identity = match identity {
            Some(email) => Some(email),
            None => {
                let linked = self.deps.records.find_account_by_chat(chat_id).await?;
                match linked {
                    Some(account) => Some(account.email),
                    None if kind.requires_link() => {
                        self.deps.flows.remove(chat_id, kind).await?;
                        return Err(self.fail(audit, FlowError::Unlinked { chat_id }).await);
                    }
                    None => None,
                }
            }
        };

        if let (Some(mission), Some(email)) = (kind.mission(), identity.as_deref()) {
            if self.deps.missions.is_completed(email, mission).await? {
                return Err(self.fail(audit, FlowError::MissionAlreadyCompleted { mission }).await);
            }
        }

        let catalog = catalog_for(kind);
        let first = catalog.step(1).ok_or(DomainError::UnknownStep { kind, step: 1 })?;
        self.deps.flows.put(FlowInstance::start(chat_id, kind, identity, Utc::now())).await?;

        let intro = OutgoingMessage::text(format!(
            "📝 {}. Send /cancel at any time to stop.",
            kind.title()
        ));
        self.deps.messenger.send(chat_id, intro).await?;
        self.deps.messenger.send(chat_id, first.prompt_message(1, catalog.len())).await?;

        self.deps.audit.emit(audit.event("flow.started", AuditCategory::Flow, AuditOutcome::Success));
        info!(
            event_name = "flow.started",
            correlation_id = %audit.correlation_id,
            chat_id = chat_id.0,
            flow_kind = kind.as_str(),
            "flow started"
        );
        Ok(AdvanceOutcome::Prompted { step: 1 })
    }

    async fn answer(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
        input: StepInput,
        target_step: usize,
        audit: &AuditContext,
    ) -> Result<AdvanceOutcome, FlowError> {
        let Some(mut instance) = self.deps.flows.get(chat_id, kind).await? else {
            return Ok(AdvanceOutcome::NoActiveFlow);
        };
        if instance.is_completed() {
            return Ok(AdvanceOutcome::AlreadyCompleted);
        }

        let answered = target_step - 1;
        let expected = instance.current_step().unwrap_or_default();
        if expected != answered {
            return Err(DomainError::OutOfSequence { kind, expected, got: answered }.into());
        }

        let catalog = catalog_for(kind);
        let step = catalog.step(answered).ok_or(DomainError::UnknownStep { kind, step: answered })?;

        let value = match self.accept(chat_id, step, input).await {
            Ok(value) => value,
            Err(reason) => {
                self.deps.audit.emit(
                    audit
                        .event("flow.step_rejected", AuditCategory::Flow, AuditOutcome::Rejected)
                        .with_metadata("field", step.field)
                        .with_metadata("step", answered.to_string()),
                );
                info!(
                    event_name = "flow.step_rejected",
                    correlation_id = %audit.correlation_id,
                    chat_id = chat_id.0,
                    flow_kind = kind.as_str(),
                    step = answered,
                    "step answer rejected"
                );
                self.deps.messenger.send(chat_id, OutgoingMessage::text(reason.clone())).await?;
                self.deps.messenger.send(chat_id, step.prompt_message(answered, catalog.len())).await?;
                return Ok(AdvanceOutcome::Reprompted { step: answered, reason });
            }
        };

        instance.record(step.field, value, target_step, Utc::now());
        self.deps.audit.emit(
            audit
                .event("flow.step_accepted", AuditCategory::Flow, AuditOutcome::Success)
                .with_metadata("field", step.field)
                .with_metadata("step", answered.to_string()),
        );

        if target_step > catalog.len() {
            return self.finalize(instance, audit).await;
        }

        let next = catalog.step(target_step).ok_or(DomainError::UnknownStep { kind, step: target_step })?;
        self.deps.flows.put(instance).await?;
        self.deps.messenger.send(chat_id, next.prompt_message(target_step, catalog.len())).await?;
        Ok(AdvanceOutcome::Prompted { step: target_step })
    }

    /// Validates or uploads one answer. `Err` carries the re-prompt reason.
    async fn accept(
        &self,
        chat_id: ChatId,
        step: &StepDefinition,
        input: StepInput,
    ) -> Result<FieldValue, String> {
        if !input.matches(step.input) {
            return Err(format!("❗ This step needs {}.", step.input.describe()));
        }

        match input {
            StepInput::Text(text) => validate_text(step, &text).map_err(|error| match error {
                FlowError::ValidationFailed { reason, .. } => reason,
                other => other.user_message().to_owned(),
            }),
            StepInput::Media(media) => {
                let key = match step.input {
                    InputKind::VoiceOrVideo => {
                        format!("{chat_id}/{}-{}", step.field, Utc::now().timestamp())
                    }
                    _ => format!("{chat_id}/{}", step.field),
                };
                match self.deps.media.upload(&media, &key).await {
                    Ok(url) if step.input == InputKind::Photo => Ok(FieldValue::Url(url)),
                    Ok(url) => Ok(FieldValue::Media { url }),
                    Err(error) => {
                        warn!(
                            event_name = "flow.upload_failed",
                            chat_id = chat_id.0,
                            field = step.field,
                            error = %error,
                            "media upload failed"
                        );
                        Err(UPLOAD_RETRY.to_owned())
                    }
                }
            }
            StepInput::Empty => Err(format!("❗ This step needs {}.", step.input.describe())),
        }
    }

    async fn finalize(
        &self,
        mut instance: FlowInstance,
        audit: &AuditContext,
    ) -> Result<AdvanceOutcome, FlowError> {
        let chat_id = instance.chat_id;
        let kind = instance.kind;

        instance.cursor = StepCursor::Completed;
        instance.updated_at = Utc::now();
        if let Err(error) = self.deps.flows.put(instance.clone()).await {
            return Err(self.fail(audit, error.into()).await);
        }

        let result = self.complete(&instance).await;
        if let Err(error) = self.deps.flows.remove(chat_id, kind).await {
            warn!(
                event_name = "flow.cleanup_failed",
                correlation_id = %audit.correlation_id,
                chat_id = chat_id.0,
                flow_kind = kind.as_str(),
                error = %error,
                "could not remove completed flow instance"
            );
        }

        match result {
            Ok((completion, message)) => {
                self.deps.messenger.send(chat_id, message).await?;
                self.deps.audit.emit(
                    audit
                        .event("flow.completed", AuditCategory::Flow, AuditOutcome::Success)
                        .with_metadata("reward", completion.reward.to_string()),
                );
                info!(
                    event_name = "flow.completed",
                    correlation_id = %audit.correlation_id,
                    chat_id = chat_id.0,
                    flow_kind = kind.as_str(),
                    reward = completion.reward,
                    "flow completed"
                );
                Ok(AdvanceOutcome::Completed(completion))
            }
            Err(error) => Err(self.fail(audit, error).await),
        }
    }

    /// Persists the assembled record, grants the reward and builds the
    /// completion message. Rendering runs before anything is written.
    async fn complete(
        &self,
        instance: &FlowInstance,
    ) -> Result<(Completion, OutgoingMessage), FlowError> {
        let kind = instance.kind;
        if kind == FlowKind::ProductBrowsing {
            return self.list_category(instance).await;
        }

        let email = instance
            .identity
            .clone()
            .ok_or_else(|| DomainError::MissingField { kind, field: "identity".to_owned() })?;
        let now = Utc::now();
        let mut completion = Completion {
            kind,
            email: Some(email.clone()),
            reward: self.rewards.bonus_for(kind),
            balance: None,
            document_url: None,
        };

        let headline = match kind {
            FlowKind::SellerRegistration | FlowKind::WeeklyProductAdd => {
                let product = product_from(instance, now)?;
                let name = product.name.clone();
                match self.deps.records.find_seller_by_email(&email).await? {
                    Some(_) => self.deps.records.append_product(&email, product).await?,
                    None => {
                        let mut seller = Seller::new(email.clone(), now);
                        seller.products.push(product);
                        self.deps.records.create_seller(seller).await?;
                    }
                }
                format!("🎉 \"{}\" is now listed in your catalog.", escape_html(&name))
            }
            FlowKind::Verification => {
                let update = SellerUpdate::Verification(VerificationDetails {
                    full_name: instance.text("fullName")?.to_owned(),
                    phone: instance.text("phoneNumber")?.to_owned(),
                    id_document_url: instance.url("idDocument")?.to_owned(),
                    selfie_url: instance.url("selfiePhoto")?.to_owned(),
                    business_address: instance.text("businessAddress")?.to_owned(),
                    status: VerificationStatus::Pending,
                    submitted_at: now,
                });
                let account = self
                    .deps
                    .records
                    .find_account_by_email(&email)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("account {email}")))?;
                let existing = self.deps.records.find_seller_by_email(&email).await?;
                let mut preview = existing.clone().unwrap_or_else(|| Seller::new(email.clone(), now));
                preview.apply(&update);
                let url = self.deps.documents.render_certificate(&preview, &account).await?;
                self.save_seller_update(&email, existing.is_some(), preview, update).await?;
                completion.document_url = Some(url.clone());
                format!("✅ Verification submitted. Your certificate: {url}")
            }
            FlowKind::StoreCreation => {
                let category_label = instance.text("storeCategory")?;
                let update = SellerUpdate::Store(StoreProfile {
                    name: instance.text("storeName")?.to_owned(),
                    logo_url: instance.url("storeLogo")?.to_owned(),
                    description: instance.text("storeDescription")?.to_owned(),
                    category: category_from(kind, category_label)?,
                    contact_phone: instance.text("contactPhone")?.to_owned(),
                    created_at: now,
                });
                self.apply_seller_update(&email, update, now).await?;
                "🏪 Your store is live.".to_owned()
            }
            FlowKind::StoryCreation => {
                let update = SellerUpdate::Story(TrustStory {
                    title: instance.text("storyTitle")?.to_owned(),
                    story: instance.text("storyText")?.to_owned(),
                    media_url: instance.url("storyMedia")?.to_owned(),
                    workshop_photo_url: instance.url("workshopPhoto")?.to_owned(),
                    created_at: now,
                });
                self.apply_seller_update(&email, update, now).await?;
                "📖 Your trust story has been published.".to_owned()
            }
            FlowKind::BuyerRegistration => {
                // Refuse before creating so a link conflict leaves no account behind.
                if let Some(linked) =
                    self.deps.records.find_account_by_chat(instance.chat_id).await?
                {
                    return Err(FlowError::ChatAlreadyLinked {
                        chat_id: instance.chat_id,
                        email: linked.email,
                    });
                }
                let account = NewAccount {
                    email: email.clone(),
                    name: instance.text("fullName")?.to_owned(),
                    phone: Some(instance.text("phoneNumber")?.to_owned()),
                    city: Some(instance.text("city")?.to_owned()),
                    role: AccountRole::Buyer,
                };
                self.deps.records.create_account(account).await?;
                match self.deps.records.link_account(&email, instance.chat_id).await {
                    Ok(()) => {}
                    Err(StoreError::Conflict(_)) => {
                        return Err(FlowError::DuplicateLink { email: email.clone() })
                    }
                    Err(other) => return Err(other.into()),
                }
                "🙏 Welcome to Karigar! Your buyer account is ready and linked.".to_owned()
            }
            FlowKind::ProductBrowsing => return self.list_category(instance).await,
        };

        if let Some(mission) = kind.mission() {
            completion.reward = self.deps.missions.reward_for(mission);
            completion.balance =
                Some(self.deps.missions.record_completion(&email, mission).await?);
        } else if completion.reward > 0 {
            completion.balance =
                Some(self.deps.records.increment_balance(&email, completion.reward).await?);
        }

        let mut builder = MessageBuilder::new(headline);
        if let Some(balance) = completion.balance {
            builder = builder
                .line(format!("💰 +{} credits. Balance: {balance}", completion.reward));
        }
        Ok((completion, builder.keyboard(main_menu()).build()))
    }

    async fn apply_seller_update(
        &self,
        email: &str,
        update: SellerUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let existing = self.deps.records.find_seller_by_email(email).await?;
        let exists = existing.is_some();
        let mut seller = existing.unwrap_or_else(|| Seller::new(email, now));
        seller.apply(&update);
        self.save_seller_update(email, exists, seller, update).await
    }

    async fn save_seller_update(
        &self,
        email: &str,
        exists: bool,
        seller: Seller,
        update: SellerUpdate,
    ) -> Result<(), StoreError> {
        if exists {
            self.deps.records.update_seller(email, update).await
        } else {
            self.deps.records.create_seller(seller).await
        }
    }

    async fn list_category(
        &self,
        instance: &FlowInstance,
    ) -> Result<(Completion, OutgoingMessage), FlowError> {
        let category = category_from(instance.kind, instance.text("category")?)?;
        let products = self.deps.records.products_by_category(category).await?;
        let completion = Completion {
            kind: instance.kind,
            email: instance.identity.clone(),
            reward: 0,
            balance: None,
            document_url: None,
        };

        if products.is_empty() {
            let message = notice(format!("No products in {} yet. Check back soon!", category.label()));
            return Ok((completion, message));
        }

        let mut builder = MessageBuilder::new(format!(
            "🛍 <b>{}</b>: {} product(s)",
            escape_html(category.label()),
            products.len()
        ))
        .html();
        let mut rows = Vec::new();
        for listed in products.iter().take(BROWSE_LIMIT) {
            builder = builder.line(format!(
                "• <b>{}</b> by {} ({}){}",
                escape_html(&listed.product.name),
                escape_html(&listed.seller_name),
                escape_html(&listed.product.location),
                if listed.product.sells_online { " 🌐" } else { "" }
            ));
            let email = &listed.seller_email;
            if "sample_".len() + email.len() > CALLBACK_DATA_LIMIT {
                debug!(seller_email = %email, "seller email too long for inline actions");
                continue;
            }
            rows.push(vec![
                InlineButton::callback("🎁 Sample", format!("sample_{email}")),
                InlineButton::callback("💬 Chat", format!("chat_{email}")),
                InlineButton::callback("🤝 Deal", format!("deal_{email}")),
            ]);
        }
        if !rows.is_empty() {
            builder = builder.keyboard(Keyboard::inline(rows));
        }
        Ok((completion, builder.build()))
    }

    /// Reports `error` to the chat, records it and hands it back.
    async fn fail(&self, audit: &AuditContext, error: FlowError) -> FlowError {
        let Some(chat_id) = audit.chat_id else {
            return error;
        };
        self.deps.audit.emit(
            audit
                .event("flow.failed", AuditCategory::Flow, AuditOutcome::Failed)
                .with_metadata("error", error.to_string()),
        );
        warn!(
            event_name = "flow.failed",
            correlation_id = %audit.correlation_id,
            chat_id = chat_id.0,
            flow_kind = audit.flow_kind.map(|kind| kind.as_str()),
            error = %error,
            "flow failed"
        );
        if let Err(send_error) = self.deps.messenger.send(chat_id, notice(error.user_message())).await
        {
            warn!(
                event_name = "flow.notify_failed",
                chat_id = chat_id.0,
                error = %send_error,
                "could not report flow failure to chat"
            );
        }
        error
    }
}

/// The reminder sent when an event does not fit the awaited step.
pub fn wrong_kind_message(step: &StepDefinition) -> OutgoingMessage {
    let text = format!("🙂 Please send {} to continue, or /cancel to stop.", step.input.describe());
    MessageBuilder::new(text).keyboard(step.keyboard()).build()
}

fn category_from(kind: FlowKind, label: &str) -> Result<ProductCategory, DomainError> {
    ProductCategory::from_label(label)
        .ok_or_else(|| DomainError::MissingField { kind, field: format!("category `{label}`") })
}

fn product_from(
    instance: &FlowInstance,
    now: DateTime<Utc>,
) -> Result<ProductRecord, DomainError> {
    Ok(ProductRecord {
        name: instance.text("productName")?.to_owned(),
        image_url: instance.url("productPhoto")?.to_owned(),
        description: instance.text("productDescription")?.to_owned(),
        category: category_from(instance.kind, instance.text("productType")?)?,
        location: instance.text("location")?.to_owned(),
        sells_online: instance.flag("sellsOnline")?,
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::{AdvanceOutcome, Collaborators, StepEngine, StepInput};
    use crate::audit::InMemoryAuditSink;
    use crate::config::{MissionsConfig, RewardsConfig};
    use crate::domain::account::{Account, AccountRole, ChatId};
    use crate::domain::seller::{ProductCategory, ProductRecord, Seller};
    use crate::errors::FlowError;
    use crate::flows::catalog::catalog_for;
    use crate::flows::states::{FieldValue, FlowKind};
    use crate::flows::store::{FlowStateStore, InMemoryFlowStateStore};
    use crate::flows::validation::PHONE_ERROR;
    use crate::missions::MissionTracker;
    use crate::ports::{
        InMemoryMissionStore, InMemoryRecordStore, MediaKind, MediaRef, RecordStore,
        RecordingMessenger, StaticDocumentRenderer, StaticMediaUploader,
    };

    const CHAT: ChatId = ChatId(1001);

    struct Harness {
        engine: StepEngine,
        flows: Arc<InMemoryFlowStateStore>,
        records: Arc<InMemoryRecordStore>,
        messenger: Arc<RecordingMessenger>,
        media: Arc<StaticMediaUploader>,
        documents: Arc<StaticDocumentRenderer>,
        audit: InMemoryAuditSink,
    }

    async fn harness() -> Harness {
        let flows = Arc::new(InMemoryFlowStateStore::default());
        let records = Arc::new(InMemoryRecordStore::default());
        let messenger = Arc::new(RecordingMessenger::default());
        let media = Arc::new(StaticMediaUploader::default());
        let documents = Arc::new(StaticDocumentRenderer::default());
        let audit = InMemoryAuditSink::default();
        let missions = Arc::new(MissionTracker::new(
            Arc::new(InMemoryMissionStore::default()),
            records.clone(),
            MissionsConfig::default(),
        ));
        records
            .insert_account(Account {
                email: "seller@x.com".to_owned(),
                name: "Meera".to_owned(),
                phone: None,
                city: None,
                role: AccountRole::Seller,
                chat_id: Some(CHAT),
                balance: 0,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await;

        let engine = StepEngine::new(
            Collaborators {
                flows: flows.clone(),
                records: records.clone(),
                media: media.clone(),
                documents: documents.clone(),
                messenger: messenger.clone(),
                missions,
                audit: Arc::new(audit.clone()),
            },
            RewardsConfig::default(),
        );
        Harness { engine, flows, records, messenger, media, documents, audit }
    }

    fn text(value: &str) -> StepInput {
        StepInput::Text(value.to_owned())
    }

    fn photo(file_id: &str) -> StepInput {
        StepInput::Media(MediaRef::new(file_id, MediaKind::Photo))
    }

    impl Harness {
        async fn current_step(&self, kind: FlowKind) -> Option<usize> {
            self.flows
                .get(CHAT, kind)
                .await
                .expect("flow lookup")
                .and_then(|instance| instance.current_step())
        }

        /// Feeds the answer for the chat's current step.
        async fn answer(&self, kind: FlowKind, input: StepInput) -> AdvanceOutcome {
            let step = self.current_step(kind).await.expect("active flow");
            self.engine.advance(CHAT, kind, input, step + 1).await.expect("advance")
        }

        async fn balance(&self) -> i64 {
            self.records
                .find_account_by_email("seller@x.com")
                .await
                .expect("lookup")
                .map(|account| account.balance)
                .unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn seller_registration_scenario_appends_one_product_and_credits_bonus() {
        let h = harness().await;
        let kind = FlowKind::SellerRegistration;

        let started = h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("start");
        assert_eq!(started, AdvanceOutcome::Prompted { step: 1 });

        assert_eq!(h.answer(kind, text("Handwoven Scarf")).await, AdvanceOutcome::Prompted { step: 2 });
        let last = h.messenger.last_to(CHAT).await.expect("photo prompt");
        assert!(last.text.contains("photo"));

        assert_eq!(h.answer(kind, photo("tg-photo-1")).await, AdvanceOutcome::Prompted { step: 3 });
        let instance = h.flows.get(CHAT, kind).await.expect("get").expect("instance");
        assert_eq!(
            instance.fields.get("productPhoto"),
            Some(&FieldValue::Url("https://media.test/1001/productPhoto".to_owned()))
        );

        h.answer(kind, text("Soft pashmina, hand dyed.")).await;
        let rejected = h.answer(kind, text("Toys")).await;
        assert!(matches!(rejected, AdvanceOutcome::Reprompted { step: 4, .. }));
        assert_eq!(h.current_step(kind).await, Some(4));

        h.answer(kind, text("Clothing")).await;
        h.answer(kind, text("Jaipur, Rajasthan")).await;
        let finished = h.answer(kind, text("✅ Yes")).await;

        let AdvanceOutcome::Completed(completion) = finished else {
            panic!("expected completion, got {finished:?}");
        };
        assert_eq!(completion.reward, RewardsConfig::default().seller_registration);
        assert_eq!(h.balance().await, RewardsConfig::default().seller_registration);

        let seller = h.records.find_seller_by_email("seller@x.com").await.expect("q").expect("seller");
        assert_eq!(seller.products.len(), 1);
        let product = &seller.products[0];
        assert_eq!(product.name, "Handwoven Scarf");
        assert_eq!(product.image_url, "https://media.test/1001/productPhoto");
        assert_eq!(product.description, "Soft pashmina, hand dyed.");
        assert_eq!(product.category, ProductCategory::Clothing);
        assert_eq!(product.location, "Jaipur, Rajasthan");
        assert!(product.sells_online);

        assert!(h.flows.get(CHAT, kind).await.expect("get").is_none());
        assert!(h.audit.event_types().contains(&"flow.completed".to_owned()));
    }

    #[tokio::test]
    async fn feeding_beyond_the_last_step_does_not_finalize_twice() {
        let h = harness().await;
        let kind = FlowKind::StoryCreation;
        h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("start");
        h.answer(kind, text("Block prints")).await;
        h.answer(kind, text("It began with my grandmother.")).await;
        h.answer(kind, StepInput::Media(MediaRef::new("voice-1", MediaKind::Voice))).await;
        let done = h.answer(kind, photo("workshop")).await;
        assert!(matches!(done, AdvanceOutcome::Completed(_)));
        let balance = h.balance().await;

        let again = h.engine.advance(CHAT, kind, photo("workshop"), 5).await.expect("replay");
        assert_eq!(again, AdvanceOutcome::NoActiveFlow);
        assert_eq!(h.balance().await, balance);
    }

    #[tokio::test]
    async fn invalid_phone_never_advances_and_repeats_the_identical_prompt() {
        let h = harness().await;
        let kind = FlowKind::Verification;
        h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("start");
        h.answer(kind, text("Meera Devi")).await;

        let catalog = catalog_for(kind);
        let expected_prompt = catalog.step(2).expect("phone step").prompt_message(2, catalog.len());
        for attempt in ["9400123456", "+91 12"] {
            let outcome = h.answer(kind, text(attempt)).await;
            assert_eq!(
                outcome,
                AdvanceOutcome::Reprompted { step: 2, reason: PHONE_ERROR.to_owned() }
            );
            assert_eq!(h.current_step(kind).await, Some(2));
            assert_eq!(h.messenger.last_to(CHAT).await, Some(expected_prompt.clone()));
        }

        assert_eq!(h.answer(kind, text("+919400123456")).await, AdvanceOutcome::Prompted { step: 3 });
    }

    #[tokio::test]
    async fn media_step_rejects_text_without_mutating_the_instance() {
        let h = harness().await;
        let kind = FlowKind::SellerRegistration;
        h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("start");
        h.answer(kind, text("Brass lamp")).await;
        let before = h.flows.get(CHAT, kind).await.expect("get").expect("instance");

        let outcome = h.answer(kind, text("here is my photo")).await;
        assert!(matches!(outcome, AdvanceOutcome::Reprompted { step: 2, .. }));
        let after = h.flows.get(CHAT, kind).await.expect("get").expect("instance");
        assert_eq!(before, after);
        assert!(h.media.uploaded_keys().await.is_empty());
    }

    #[tokio::test]
    async fn upload_failure_reprompts_the_same_step() {
        let h = harness().await;
        let kind = FlowKind::StoreCreation;
        h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("start");
        h.answer(kind, text("Indigo Looms")).await;

        h.media.set_failing(true);
        let outcome = h.answer(kind, photo("logo")).await;
        assert!(matches!(outcome, AdvanceOutcome::Reprompted { step: 2, .. }));
        assert_eq!(h.current_step(kind).await, Some(2));

        h.media.set_failing(false);
        assert_eq!(h.answer(kind, photo("logo")).await, AdvanceOutcome::Prompted { step: 3 });
    }

    #[tokio::test]
    async fn unlinked_chat_cannot_start_a_linked_flow() {
        let h = harness().await;
        let stranger = ChatId(77);
        let error = h
            .engine
            .advance(stranger, FlowKind::StoreCreation, StepInput::Empty, 1)
            .await
            .expect_err("unlinked");
        assert!(matches!(error, FlowError::Unlinked { chat_id } if chat_id == stranger));
        assert!(h.flows.active_for_chat(stranger).await.expect("active").is_empty());
        let notice = h.messenger.last_to(stranger).await.expect("notice");
        assert!(notice.text.contains("not linked"));
    }

    #[tokio::test]
    async fn persistence_failure_reports_and_drops_the_instance() {
        let h = harness().await;
        let kind = FlowKind::StoreCreation;
        h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("start");
        h.answer(kind, text("Indigo Looms")).await;
        h.answer(kind, photo("logo")).await;
        h.answer(kind, text("Hand-loomed indigo textiles")).await;
        h.answer(kind, text("Clothing")).await;

        h.records.set_fail_writes(true);
        let step = h.current_step(kind).await.expect("step 5");
        let error = h
            .engine
            .advance(CHAT, kind, text("+919400123456"), step + 1)
            .await
            .expect_err("persistence failure");

        assert!(matches!(error, FlowError::Persistence(_)));
        assert!(h.flows.get(CHAT, kind).await.expect("get").is_none());
        assert_eq!(h.balance().await, 0);
        assert!(h.audit.event_types().contains(&"flow.failed".to_owned()));
    }

    #[tokio::test]
    async fn render_failure_aborts_verification_before_anything_is_saved() {
        let h = harness().await;
        let kind = FlowKind::Verification;
        h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("start");
        h.answer(kind, text("Meera Devi")).await;
        h.answer(kind, text("+919400123456")).await;
        h.answer(kind, StepInput::Media(MediaRef::new("id-doc", MediaKind::Document))).await;
        h.answer(kind, photo("selfie")).await;

        h.documents.set_failing(true);
        let error = h
            .engine
            .advance(CHAT, kind, text("12 Craft Lane, Jaipur"), 6)
            .await
            .expect_err("render failure");

        assert!(matches!(error, FlowError::Render(_)));
        assert!(h.records.find_seller_by_email("seller@x.com").await.expect("q").is_none());
        assert!(h.flows.get(CHAT, kind).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn verification_completion_embeds_certificate_url() {
        let h = harness().await;
        let kind = FlowKind::Verification;
        h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("start");
        h.answer(kind, text("Meera Devi")).await;
        h.answer(kind, text("+919400123456")).await;
        h.answer(kind, StepInput::Media(MediaRef::new("id-doc", MediaKind::Document))).await;
        h.answer(kind, photo("selfie")).await;
        let done = h.answer(kind, text("12 Craft Lane, Jaipur")).await;

        let AdvanceOutcome::Completed(completion) = done else {
            panic!("expected completion");
        };
        let url = completion.document_url.expect("certificate url");
        assert_eq!(url, "https://docs.test/certificates/seller@x.com.pdf");
        let seller = h.records.find_seller_by_email("seller@x.com").await.expect("q").expect("seller");
        let verification = seller.verification.expect("verification saved");
        assert_eq!(verification.id_document_url, "https://media.test/1001/idDocument");
        assert!(h.messenger.last_to(CHAT).await.expect("msg").text.contains(&url));
    }

    #[tokio::test]
    async fn weekly_product_pays_through_the_mission_once_per_week() {
        let h = harness().await;
        let kind = FlowKind::WeeklyProductAdd;
        h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("start");
        for input in [
            text("Terracotta pot"),
            photo("pot"),
            text("Wheel thrown"),
            text("Home Decor"),
            text("Khurja"),
            text("❌ No"),
        ] {
            h.answer(kind, input).await;
        }
        assert_eq!(h.balance().await, MissionsConfig::default().product_reward);

        let error = h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect_err("repeat");
        assert!(matches!(error, FlowError::MissionAlreadyCompleted { .. }));
        assert!(h.flows.get(CHAT, kind).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn starting_again_discards_the_previous_instance() {
        let h = harness().await;
        let kind = FlowKind::StoreCreation;
        h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("start");
        h.answer(kind, text("First name")).await;
        h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("restart");

        let instance = h.flows.get(CHAT, kind).await.expect("get").expect("instance");
        assert!(instance.fields.is_empty());
        assert_eq!(instance.current_step(), Some(1));
    }

    #[tokio::test]
    async fn abandon_removes_the_flow() {
        let h = harness().await;
        let kind = FlowKind::StoryCreation;
        h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("start");
        assert!(h.engine.abandon(CHAT, kind, "upd-1").await.expect("abandon"));
        assert!(h.flows.get(CHAT, kind).await.expect("get").is_none());
        assert!(!h.engine.abandon(CHAT, kind, "upd-2").await.expect("abandon twice"));
    }

    #[tokio::test]
    async fn browsing_lists_products_with_seller_callbacks() {
        let h = harness().await;
        let kind = FlowKind::SellerRegistration;
        h.engine.advance(CHAT, kind, StepInput::Empty, 1).await.expect("start");
        for input in [
            text("Silver anklet"),
            photo("anklet"),
            text("Oxidised silver"),
            text("Jewellery"),
            text("Udaipur"),
            text("✅ Yes"),
        ] {
            h.answer(kind, input).await;
        }

        let shopper = ChatId(2002);
        h.engine
            .advance(shopper, FlowKind::ProductBrowsing, StepInput::Empty, 1)
            .await
            .expect("anonymous browsing");
        let done = h
            .engine
            .advance(shopper, FlowKind::ProductBrowsing, text("Jewellery"), 2)
            .await
            .expect("listing");
        assert!(matches!(done, AdvanceOutcome::Completed(_)));

        let listing = h.messenger.last_to(shopper).await.expect("listing message");
        assert!(listing.text.contains("Silver anklet"));
        let Some(crate::messages::Keyboard::Inline { rows }) = listing.keyboard else {
            panic!("expected inline keyboard");
        };
        assert_eq!(rows.len(), 1);
        assert!(matches!(
            &rows[0][0].action,
            crate::messages::InlineAction::Callback { data } if data == "sample_seller@x.com"
        ));
    }

    #[tokio::test]
    async fn sellers_with_oversized_callback_keys_are_listed_without_buttons() {
        let h = harness().await;
        let now = Utc::now();
        let long_email = format!("{}@weavers-collective.example.in", "handloom".repeat(5));
        assert!("sample_".len() + long_email.len() > 64);

        let mut seller = Seller::new(long_email, now);
        seller.products.push(ProductRecord {
            name: "Kantha throw".to_owned(),
            image_url: "https://media.test/kantha.jpg".to_owned(),
            description: "Stitched by hand".to_owned(),
            category: ProductCategory::HomeDecor,
            location: "Shantiniketan".to_owned(),
            sells_online: false,
            created_at: now,
            updated_at: now,
        });
        h.records.insert_seller(seller).await;

        let shopper = ChatId(2002);
        h.engine
            .advance(shopper, FlowKind::ProductBrowsing, StepInput::Empty, 1)
            .await
            .expect("anonymous browsing");
        h.engine
            .advance(shopper, FlowKind::ProductBrowsing, text(ProductCategory::HomeDecor.label()), 2)
            .await
            .expect("listing");

        let listing = h.messenger.last_to(shopper).await.expect("listing message");
        assert!(listing.text.contains("Kantha throw"));
        assert!(listing.keyboard.is_none());
    }

    #[tokio::test]
    async fn buyer_registration_on_a_linked_chat_creates_no_account() {
        let h = harness().await;
        let kind = FlowKind::BuyerRegistration;
        h.engine
            .start_with_identity(CHAT, kind, "buyer@x.com", "corr-buyer")
            .await
            .expect("start");
        h.answer(kind, text("Ravi Kumar")).await;
        h.answer(kind, text("+919812345678")).await;

        let step = h.current_step(kind).await.expect("city step");
        let error = h
            .engine
            .advance(CHAT, kind, text("Jaipur"), step + 1)
            .await
            .expect_err("chat already linked");

        assert!(matches!(
            error,
            FlowError::ChatAlreadyLinked { chat_id, ref email } if chat_id == CHAT && email == "seller@x.com"
        ));
        assert!(h.records.find_account_by_email("buyer@x.com").await.expect("lookup").is_none());
        let notice = h.messenger.last_to(CHAT).await.expect("notice");
        assert!(notice.text.contains("already linked"));
    }
}
