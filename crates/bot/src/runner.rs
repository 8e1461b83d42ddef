use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use karigar_core::domain::account::ChatId;

use crate::events::{Dispatcher, EventContext, UpdateEnvelope};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Where inbound updates come from. `Ok(None)` from [`UpdateSource::next_update`]
/// means the stream ended cleanly.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_update(&self) -> Result<Option<UpdateEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope: &UpdateEnvelope) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Pulls updates and dispatches them. Each chat gets its own lane so its
/// events are handled strictly in arrival order while different chats run
/// concurrently. Idle lanes shut themselves down after `lane_idle` and are
/// pruned from the lane table.
pub struct PollingRunner {
    source: Arc<dyn UpdateSource>,
    dispatcher: Arc<Dispatcher>,
    reconnect_policy: ReconnectPolicy,
    lane_idle: Duration,
}

const MIN_PRUNE_THRESHOLD: usize = 64;

struct Lane {
    sender: mpsc::UnboundedSender<UpdateEnvelope>,
    handle: JoinHandle<()>,
}

/// Live per-chat lanes. A lane that closed itself may still be dispatching
/// the updates that raced its close; its replacement waits for it.
struct LaneTable {
    dispatcher: Arc<Dispatcher>,
    idle: Duration,
    lanes: HashMap<ChatId, Lane>,
    prune_at: usize,
}

impl LaneTable {
    fn new(dispatcher: Arc<Dispatcher>, idle: Duration) -> Self {
        Self { dispatcher, idle, lanes: HashMap::new(), prune_at: MIN_PRUNE_THRESHOLD }
    }

    fn len(&self) -> usize {
        self.lanes.len()
    }

    fn enqueue(&mut self, envelope: UpdateEnvelope) {
        if self.lanes.len() >= self.prune_at {
            self.prune();
        }

        let chat_id = envelope.chat_id;
        let (envelope, previous) = match self.lanes.remove(&chat_id) {
            Some(lane) => match lane.sender.send(envelope) {
                Ok(()) => {
                    self.lanes.insert(chat_id, lane);
                    return;
                }
                Err(mpsc::error::SendError(envelope)) => (envelope, Some(lane.handle)),
            },
            None => (envelope, None),
        };

        let previous = previous.filter(|handle| !handle.is_finished());
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle =
            tokio::spawn(run_lane(self.dispatcher.clone(), receiver, self.idle, previous));
        if sender.send(envelope).is_err() {
            warn!(chat_id = chat_id.0, "chat lane closed before its first update");
        }
        self.lanes.insert(chat_id, Lane { sender, handle });
    }

    /// Drops lanes whose task has ended.
    fn prune(&mut self) {
        let before = self.lanes.len();
        self.lanes.retain(|_, lane| !lane.handle.is_finished());
        self.prune_at = (self.lanes.len() * 2).max(MIN_PRUNE_THRESHOLD);
        debug!(pruned = before - self.lanes.len(), live = self.lanes.len(), "pruned idle chat lanes");
    }

    async fn drain(self) {
        let handles = self
            .lanes
            .into_values()
            .map(|lane| {
                drop(lane.sender);
                lane.handle
            })
            .collect::<Vec<_>>();
        for handle in handles {
            if let Err(error) = handle.await {
                warn!(error = %error, "chat lane ended abnormally");
            }
        }
    }
}

impl PollingRunner {
    pub fn new(
        source: Arc<dyn UpdateSource>,
        dispatcher: Arc<Dispatcher>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { source, dispatcher, reconnect_policy, lane_idle: Duration::from_secs(300) }
    }

    pub fn with_lane_idle(mut self, lane_idle: Duration) -> Self {
        self.lane_idle = lane_idle;
        self
    }

    pub async fn start(&self) -> Result<()> {
        let mut lanes = LaneTable::new(self.dispatcher.clone(), self.lane_idle);
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt, &mut lanes).await {
                Ok(()) => break,
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "update source failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "update source retries exhausted; continuing process without crash"
                        );
                        break;
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        lanes.drain().await;
        Ok(())
    }

    async fn connect_and_pump(
        &self,
        attempt: u32,
        lanes: &mut LaneTable,
    ) -> Result<(), TransportError> {
        info!(attempt, "opening update source");
        self.source.connect().await?;
        info!(attempt, "update source connected");

        loop {
            let Some(envelope) = self.source.next_update().await? else {
                info!(attempt, "update stream closed");
                self.source.disconnect().await?;
                return Ok(());
            };

            info!(
                event_name = "ingress.telegram.update_received",
                update_id = %envelope.update_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.update_id,
                chat_id = envelope.chat_id.0,
                "received update"
            );

            if let Err(error) = self.source.acknowledge(&envelope).await {
                warn!(
                    event_name = "ingress.telegram.ack_sent",
                    update_id = %envelope.update_id,
                    correlation_id = %envelope.update_id,
                    chat_id = envelope.chat_id.0,
                    error = %error,
                    "failed to acknowledge update"
                );
            } else {
                debug!(
                    event_name = "ingress.telegram.ack_sent",
                    update_id = %envelope.update_id,
                    correlation_id = %envelope.update_id,
                    chat_id = envelope.chat_id.0,
                    "acknowledged update"
                );
            }

            lanes.enqueue(envelope);
        }
    }
}

async fn run_lane(
    dispatcher: Arc<Dispatcher>,
    mut receiver: mpsc::UnboundedReceiver<UpdateEnvelope>,
    idle: Duration,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        if let Err(error) = previous.await {
            warn!(error = %error, "previous chat lane ended abnormally");
        }
    }

    loop {
        let envelope = match tokio::time::timeout(idle, receiver.recv()).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return,
            Err(_) => {
                receiver.close();
                // Updates that raced the close are still ours to handle.
                while let Ok(envelope) = receiver.try_recv() {
                    dispatch_one(&dispatcher, &envelope).await;
                }
                return;
            }
        };
        dispatch_one(&dispatcher, &envelope).await;
    }
}

async fn dispatch_one(dispatcher: &Dispatcher, envelope: &UpdateEnvelope) {
    let context = EventContext { correlation_id: envelope.update_id.clone() };
    if let Err(error) = dispatcher.dispatch(envelope, &context).await {
        warn!(
            update_id = %envelope.update_id,
            correlation_id = %envelope.update_id,
            chat_id = envelope.chat_id.0,
            error = %error,
            "event dispatch failed; continuing update loop"
        );
    }
}
