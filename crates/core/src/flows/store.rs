use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::account::ChatId;
use crate::flows::states::{FlowInstance, FlowKind};
use crate::ports::StoreError;

/// Keyed by `(chat, kind)`; at most one live instance per key.
#[async_trait]
pub trait FlowStateStore: Send + Sync {
    async fn get(&self, chat_id: ChatId, kind: FlowKind)
        -> Result<Option<FlowInstance>, StoreError>;

    /// Inserts or overwrites the instance for its key.
    async fn put(&self, instance: FlowInstance) -> Result<(), StoreError>;

    async fn remove(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, StoreError>;

    /// Active instances of the chat in dispatch precedence order.
    async fn active_for_chat(&self, chat_id: ChatId) -> Result<Vec<FlowInstance>, StoreError>;

    /// Drops instances not touched since `cutoff`, returning how many went.
    async fn evict_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

pub fn sort_by_precedence(instances: &mut [FlowInstance]) {
    instances.sort_by_key(|instance| {
        FlowKind::PRECEDENCE.iter().position(|kind| *kind == instance.kind).unwrap_or(usize::MAX)
    });
}

#[derive(Default)]
pub struct InMemoryFlowStateStore {
    instances: RwLock<HashMap<(ChatId, FlowKind), FlowInstance>>,
}

#[async_trait]
impl FlowStateStore for InMemoryFlowStateStore {
    async fn get(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, StoreError> {
        Ok(self.instances.read().await.get(&(chat_id, kind)).cloned())
    }

    async fn put(&self, instance: FlowInstance) -> Result<(), StoreError> {
        let mut instances = self.instances.write().await;
        instances.insert((instance.chat_id, instance.kind), instance);
        Ok(())
    }

    async fn remove(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, StoreError> {
        Ok(self.instances.write().await.remove(&(chat_id, kind)))
    }

    async fn active_for_chat(&self, chat_id: ChatId) -> Result<Vec<FlowInstance>, StoreError> {
        let instances = self.instances.read().await;
        let mut active = instances
            .values()
            .filter(|instance| instance.chat_id == chat_id && !instance.is_completed())
            .cloned()
            .collect::<Vec<_>>();
        sort_by_precedence(&mut active);
        Ok(active)
    }

    async fn evict_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut instances = self.instances.write().await;
        let before = instances.len();
        instances.retain(|_, instance| instance.updated_at >= cutoff);
        Ok(before - instances.len())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.instances.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{FlowStateStore, InMemoryFlowStateStore};
    use crate::domain::account::ChatId;
    use crate::flows::states::{FieldValue, FlowInstance, FlowKind};

    #[tokio::test]
    async fn put_overwrites_the_same_key_without_merging() {
        let store = InMemoryFlowStateStore::default();
        let now = Utc::now();
        let mut first = FlowInstance::start(ChatId(1), FlowKind::StoreCreation, None, now);
        first.record("storeName", FieldValue::Text("Old".to_owned()), 2, now);
        store.put(first).await.expect("put first");

        store
            .put(FlowInstance::start(ChatId(1), FlowKind::StoreCreation, None, now))
            .await
            .expect("put second");

        let current =
            store.get(ChatId(1), FlowKind::StoreCreation).await.expect("get").expect("present");
        assert!(current.fields.is_empty());
        assert_eq!(current.current_step(), Some(1));
        assert_eq!(store.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn active_for_chat_follows_dispatch_precedence() {
        let store = InMemoryFlowStateStore::default();
        let now = Utc::now();
        for kind in [FlowKind::ProductBrowsing, FlowKind::StoryCreation, FlowKind::Verification] {
            store.put(FlowInstance::start(ChatId(5), kind, None, now)).await.expect("put");
        }
        store
            .put(FlowInstance::start(ChatId(6), FlowKind::SellerRegistration, None, now))
            .await
            .expect("put other chat");

        let kinds = store
            .active_for_chat(ChatId(5))
            .await
            .expect("active")
            .into_iter()
            .map(|instance| instance.kind)
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![FlowKind::Verification, FlowKind::StoryCreation, FlowKind::ProductBrowsing]
        );
    }

    #[tokio::test]
    async fn evict_stale_drops_only_untouched_instances() {
        let store = InMemoryFlowStateStore::default();
        let now = Utc::now();
        let stale = FlowInstance::start(
            ChatId(1),
            FlowKind::Verification,
            None,
            now - Duration::hours(30),
        );
        store.put(stale).await.expect("put stale");
        store
            .put(FlowInstance::start(ChatId(2), FlowKind::Verification, None, now))
            .await
            .expect("put fresh");

        let evicted = store.evict_stale(now - Duration::hours(24)).await.expect("evict");
        assert_eq!(evicted, 1);
        assert!(store.get(ChatId(1), FlowKind::Verification).await.expect("get").is_none());
        assert!(store.get(ChatId(2), FlowKind::Verification).await.expect("get").is_some());
    }
}
