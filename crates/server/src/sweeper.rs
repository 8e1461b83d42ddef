use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use karigar_bot::LinkingSessions;
use karigar_core::flows::FlowStateStore;
use karigar_core::ports::StoreError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub flows: usize,
    pub linking_sessions: usize,
}

/// Evicts flow instances and linking sessions idle for longer than `ttl`.
pub struct StaleFlowSweeper {
    flows: Arc<dyn FlowStateStore>,
    sessions: Arc<LinkingSessions>,
    ttl: chrono::Duration,
}

impl StaleFlowSweeper {
    pub fn new(
        flows: Arc<dyn FlowStateStore>,
        sessions: Arc<LinkingSessions>,
        ttl_hours: u32,
    ) -> Self {
        Self { flows, sessions, ttl: chrono::Duration::hours(i64::from(ttl_hours)) }
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let flows = self.flows.evict_stale(now - self.ttl).await?;
        let linking_sessions = self.sessions.evict_stale(now).await;
        Ok(SweepReport { flows, linking_sessions })
    }

    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.sweep_at(Utc::now()).await {
                    Ok(report) if report != SweepReport::default() => info!(
                        event_name = "system.sweeper.evicted",
                        flows = report.flows,
                        linking_sessions = report.linking_sessions,
                        "evicted stale conversations"
                    ),
                    Ok(_) => {}
                    Err(error) => warn!(
                        event_name = "system.sweeper.failed",
                        error = %error,
                        "stale flow sweep failed"
                    ),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use karigar_bot::linking::LinkingState;
    use karigar_bot::LinkingSessions;
    use karigar_core::domain::account::ChatId;
    use karigar_core::flows::{FlowInstance, FlowKind, FlowStateStore, InMemoryFlowStateStore};

    use super::{StaleFlowSweeper, SweepReport};

    #[tokio::test]
    async fn sweep_drops_only_idle_conversations() {
        let flows = Arc::new(InMemoryFlowStateStore::default());
        let sessions = Arc::new(LinkingSessions::new(Duration::hours(24)));
        let now = Utc::now();

        flows
            .put(FlowInstance::start(ChatId(1), FlowKind::StoryCreation, None, now - Duration::hours(30)))
            .await
            .expect("stale");
        flows
            .put(FlowInstance::start(ChatId(2), FlowKind::StoryCreation, None, now))
            .await
            .expect("fresh");
        sessions.set(ChatId(3), LinkingState::AwaitingEmail).await;

        let sweeper = StaleFlowSweeper::new(flows.clone(), sessions.clone(), 24);
        assert_eq!(sweeper.sweep_at(now).await.expect("sweep"), SweepReport { flows: 1, linking_sessions: 0 });
        assert_eq!(flows.count().await.expect("count"), 1);

        let later = now + Duration::hours(25);
        let report = sweeper.sweep_at(later).await.expect("sweep");
        assert_eq!(report, SweepReport { flows: 1, linking_sessions: 1 });
    }
}
