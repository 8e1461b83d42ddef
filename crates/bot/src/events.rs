use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use karigar_core::domain::account::ChatId;
use karigar_core::errors::{DomainError, FlowError};
use karigar_core::flows::{
    catalog_for, wrong_kind_message, AdvanceOutcome, FlowInstance, FlowKind, StepEngine,
    StepInput,
};
use karigar_core::messages::notice;
use karigar_core::ports::{MediaRef, MessagingError, RenderError, StoreError};

use crate::actions::{ActionOutcome, BotSettings, StaticActions};
use crate::callbacks::{CallbackHandler, CallbackOutcome};
use crate::commands::{is_cancel, resolve_command, BotCommand};
use crate::linking::{AccountLinker, LinkOutcome, LinkingSessions};

/// One inbound update from the messaging platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateEnvelope {
    pub update_id: String,
    pub chat_id: ChatId,
    pub sender_name: Option<String>,
    pub event: InboundEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    Text(String),
    Media(MediaRef),
    Callback { query_id: String, data: String },
    Unsupported { event_type: String },
}

impl InboundEvent {
    pub fn event_type(&self) -> InboundEventType {
        match self {
            Self::Text(_) => InboundEventType::Text,
            Self::Media(_) => InboundEventType::Media,
            Self::Callback { .. } => InboundEventType::Callback,
            Self::Unsupported { .. } => InboundEventType::Unsupported,
        }
    }

    /// Engine input for this event, if it can answer a step at all.
    pub fn step_input(&self) -> Option<StepInput> {
        match self {
            Self::Text(text) => Some(StepInput::Text(text.clone())),
            Self::Media(media) => Some(StepInput::Media(media.clone())),
            Self::Callback { .. } | Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InboundEventType {
    Text,
    Media,
    Callback,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

/// Which rule claimed the event and what it did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Linking(LinkOutcome),
    Flow { kind: FlowKind, outcome: AdvanceOutcome },
    WrongInputKind { kind: FlowKind, step: usize },
    FlowCancelled { kind: FlowKind },
    /// The engine reported a failure to the chat itself.
    FlowFailed { kind: FlowKind, reason: String },
    Command { command: BotCommand, outcome: ActionOutcome },
    Callback(CallbackOutcome),
    Ignored,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error("record store failed: {0}")]
    Store(#[from] StoreError),
    #[error("document rendering failed: {0}")]
    Render(#[from] RenderError),
    #[error("outbound message failed: {0}")]
    Messaging(#[from] MessagingError),
}

impl DispatchError {
    /// Text to show the chat, or `None` when it was already told or cannot be reached.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::Flow(_) | Self::Messaging(_) => None,
            Self::Store(error) => {
                Some(FlowError::Persistence(StoreError::Backend(error.to_string())).user_message())
            }
            Self::Render(error) => {
                Some(FlowError::Render(RenderError::Service(error.to_string())).user_message())
            }
        }
    }
}

/// Single ordered-priority router for every inbound event:
/// callbacks, then email capture, then the chat's active flow, then commands.
/// Commands preempt an active product browse.
pub struct Dispatcher {
    engine: Arc<StepEngine>,
    linker: AccountLinker,
    callbacks: CallbackHandler,
    actions: StaticActions,
}

impl Dispatcher {
    pub fn new(engine: Arc<StepEngine>, sessions: Arc<LinkingSessions>, settings: BotSettings) -> Self {
        let deps = engine.collaborators().clone();
        Self {
            linker: AccountLinker::new(sessions, deps.records.clone(), deps.messenger.clone()),
            callbacks: CallbackHandler::new(
                deps.records.clone(),
                deps.missions.clone(),
                deps.messenger.clone(),
            ),
            actions: StaticActions::new(deps, settings),
            engine,
        }
    }

    pub fn linking_sessions(&self) -> &Arc<LinkingSessions> {
        self.linker.sessions()
    }

    pub async fn dispatch(
        &self,
        envelope: &UpdateEnvelope,
        ctx: &EventContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        match self.route(envelope, ctx).await {
            Ok(outcome) => {
                info!(
                    event_name = "dispatch.routed",
                    correlation_id = %ctx.correlation_id,
                    chat_id = envelope.chat_id.0,
                    outcome = ?outcome,
                    "event routed"
                );
                Ok(outcome)
            }
            Err(error) => {
                if let Some(text) = error.user_message() {
                    let messenger = &self.engine.collaborators().messenger;
                    if let Err(send_error) = messenger.send(envelope.chat_id, notice(text)).await {
                        warn!(
                            correlation_id = %ctx.correlation_id,
                            chat_id = envelope.chat_id.0,
                            error = %send_error,
                            "failed to report dispatch error to chat"
                        );
                    }
                }
                Err(error)
            }
        }
    }

    async fn route(
        &self,
        envelope: &UpdateEnvelope,
        ctx: &EventContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let chat_id = envelope.chat_id;
        if let InboundEvent::Callback { data, .. } = &envelope.event {
            return Ok(DispatchOutcome::Callback(self.callbacks.handle(chat_id, data).await?));
        }
        let input = envelope.event.step_input();

        if self.linker.sessions().is_awaiting_email(chat_id).await {
            let outcome = match &input {
                Some(StepInput::Text(text)) if is_cancel(text) => self.linker.cancel(chat_id).await?,
                Some(StepInput::Text(text)) => self.linker.capture(chat_id, text).await?,
                _ => self.linker.capture(chat_id, "").await?,
            };
            return Ok(DispatchOutcome::Linking(outcome));
        }

        let active = self.engine.collaborators().flows.active_for_chat(chat_id).await?;
        if let Some(instance) = active.into_iter().next() {
            if let Some(command) = browsing_command(&instance, input.as_ref()) {
                self.engine.collaborators().flows.remove(chat_id, FlowKind::ProductBrowsing).await?;
                info!(
                    event_name = "dispatch.browsing_left",
                    correlation_id = %ctx.correlation_id,
                    chat_id = chat_id.0,
                    "command ended product browsing"
                );
                return self.run_command(envelope, command, ctx).await;
            }
            return self.route_to_flow(instance, input, ctx).await;
        }

        let Some(input) = input else {
            return Ok(DispatchOutcome::Ignored);
        };
        let StepInput::Text(text) = input else {
            let outcome = self.actions.unknown(chat_id).await?;
            return Ok(DispatchOutcome::Command {
                command: BotCommand::Unknown { text: String::new() },
                outcome,
            });
        };
        let command = resolve_command(&text);
        self.run_command(envelope, command, ctx).await
    }

    /// `input` is `None` for events that can never answer a step.
    async fn route_to_flow(
        &self,
        instance: FlowInstance,
        input: Option<StepInput>,
        ctx: &EventContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let (chat_id, kind) = (instance.chat_id, instance.kind);
        if matches!(&input, Some(StepInput::Text(text)) if is_cancel(text)) {
            self.engine.abandon(chat_id, kind, &ctx.correlation_id).await?;
            return Ok(DispatchOutcome::FlowCancelled { kind });
        }

        let Some(step) = instance.current_step() else {
            return Ok(DispatchOutcome::Flow { kind, outcome: AdvanceOutcome::AlreadyCompleted });
        };
        let catalog = catalog_for(kind);
        let Some(definition) = catalog.step(step) else {
            return Err(FlowError::from(DomainError::UnknownStep { kind, step }).into());
        };

        let Some(input) = input.filter(|input| input.matches(definition.input)) else {
            let reminder = wrong_kind_message(definition);
            self.engine.collaborators().messenger.send(chat_id, reminder).await?;
            return Ok(DispatchOutcome::WrongInputKind { kind, step });
        };

        match self.engine.advance_traced(chat_id, kind, input, step + 1, &ctx.correlation_id).await {
            Ok(outcome) => Ok(DispatchOutcome::Flow { kind, outcome }),
            Err(error) => {
                warn!(
                    event_name = "dispatch.flow_failed",
                    correlation_id = %ctx.correlation_id,
                    chat_id = chat_id.0,
                    flow_kind = kind.as_str(),
                    step,
                    error = %error,
                    "flow advance failed"
                );
                Ok(DispatchOutcome::FlowFailed { kind, reason: error.to_string() })
            }
        }
    }

    async fn run_command(
        &self,
        envelope: &UpdateEnvelope,
        command: BotCommand,
        ctx: &EventContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let chat_id = envelope.chat_id;
        let outcome = match &command {
            BotCommand::Start | BotCommand::Greeting => {
                self.actions.welcome(chat_id, envelope.sender_name.as_deref()).await?
            }
            BotCommand::Help => self.actions.help(chat_id).await?,
            BotCommand::LinkAccount => {
                let outcome = self.linker.begin(chat_id).await?;
                return Ok(DispatchOutcome::Linking(outcome));
            }
            BotCommand::Cancel => {
                let cancelled_offer = self.linker.sessions().clear(chat_id).await.is_some();
                let text = if cancelled_offer { "❎ Cancelled." } else { "Nothing to cancel." };
                self.engine.collaborators().messenger.send(chat_id, notice(text)).await?;
                ActionOutcome::Sent
            }
            BotCommand::StartFlow(kind) => return self.start_flow(chat_id, *kind, None, ctx).await,
            BotCommand::RegisterBuyer => {
                return match self.linker.sessions().take_offer(chat_id).await {
                    Some(email) => {
                        self.start_flow(chat_id, FlowKind::BuyerRegistration, Some(email), ctx).await
                    }
                    None => Ok(DispatchOutcome::Linking(self.linker.begin(chat_id).await?)),
                };
            }
            BotCommand::Balance => self.actions.balance(chat_id).await?,
            BotCommand::Missions => self.actions.missions(chat_id).await?,
            BotCommand::Certificate => self.actions.certificate(chat_id).await?,
            BotCommand::ShippingLabel => self.actions.shipping_label(chat_id).await?,
            BotCommand::Invite => self.actions.invite(chat_id).await?,
            BotCommand::WhatsappShare => self.actions.whatsapp_share(chat_id).await?,
            BotCommand::Unknown { .. } => self.actions.unknown(chat_id).await?,
        };
        Ok(DispatchOutcome::Command { command, outcome })
    }

    async fn start_flow(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
        identity: Option<String>,
        ctx: &EventContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let started = match identity {
            Some(email) => {
                self.engine.start_with_identity(chat_id, kind, &email, &ctx.correlation_id).await
            }
            None => {
                self.engine
                    .advance_traced(chat_id, kind, StepInput::Empty, 1, &ctx.correlation_id)
                    .await
            }
        };
        match started {
            Ok(outcome) => Ok(DispatchOutcome::Flow { kind, outcome }),
            Err(error) => {
                warn!(
                    event_name = "dispatch.flow_failed",
                    correlation_id = %ctx.correlation_id,
                    chat_id = chat_id.0,
                    flow_kind = kind.as_str(),
                    error = %error,
                    "flow start failed"
                );
                Ok(DispatchOutcome::FlowFailed { kind, reason: error.to_string() })
            }
        }
    }
}

/// Slash commands and menu buttons typed while browsing leave the catalog
/// instead of being read as a category pick. `/cancel` stays with the flow.
fn browsing_command(instance: &FlowInstance, input: Option<&StepInput>) -> Option<BotCommand> {
    if instance.kind != FlowKind::ProductBrowsing {
        return None;
    }
    let Some(StepInput::Text(text)) = input else {
        return None;
    };
    match resolve_command(text) {
        BotCommand::Unknown { .. } | BotCommand::Cancel => None,
        command => Some(command),
    }
}
