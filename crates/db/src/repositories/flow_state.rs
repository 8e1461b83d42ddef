use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use karigar_core::domain::account::ChatId;
use karigar_core::flows::store::sort_by_precedence;
use karigar_core::flows::{FlowInstance, FlowKind, FlowStateStore};
use karigar_core::flows::states::StepCursor;
use karigar_core::ports::StoreError;

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

const INSTANCE_COLUMNS: &str =
    "chat_id, kind, cursor_step, identity, fields_json, started_at, updated_at";

/// Flow instances persisted across restarts when `flows.persist_state` is on.
/// A `NULL` cursor column marks the completion sentinel.
pub struct SqlFlowStateStore {
    pool: DbPool,
}

impl SqlFlowStateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM flow_instances WHERE chat_id = ? AND kind = ?"
        ))
        .bind(chat_id.0)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(instance_from_row).transpose()
    }

    async fn save(&self, instance: FlowInstance) -> Result<(), RepositoryError> {
        let cursor_step = match instance.cursor {
            StepCursor::Step(step) => Some(i64::try_from(step).map_err(|_| {
                RepositoryError::Decode(format!("step {step} does not fit the cursor column"))
            })?),
            StepCursor::Completed => None,
        };

        sqlx::query(
            "INSERT INTO flow_instances (
                chat_id,
                kind,
                cursor_step,
                identity,
                fields_json,
                started_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(chat_id, kind) DO UPDATE SET
                cursor_step = excluded.cursor_step,
                identity = excluded.identity,
                fields_json = excluded.fields_json,
                started_at = excluded.started_at,
                updated_at = excluded.updated_at",
        )
        .bind(instance.chat_id.0)
        .bind(instance.kind.as_str())
        .bind(cursor_step)
        .bind(instance.identity.as_deref())
        .bind(serde_json::to_string(&instance.fields)?)
        .bind(instance.started_at.to_rfc3339())
        .bind(instance.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, RepositoryError> {
        let row = sqlx::query(&format!(
            "DELETE FROM flow_instances WHERE chat_id = ? AND kind = ? RETURNING {INSTANCE_COLUMNS}"
        ))
        .bind(chat_id.0)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(instance_from_row).transpose()
    }

    async fn active(&self, chat_id: ChatId) -> Result<Vec<FlowInstance>, RepositoryError> {
        let mut instances = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS}
             FROM flow_instances
             WHERE chat_id = ? AND cursor_step IS NOT NULL"
        ))
        .bind(chat_id.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(instance_from_row)
        .collect::<Result<Vec<_>, _>>()?;
        sort_by_precedence(&mut instances);
        Ok(instances)
    }

    /// RFC 3339 text in UTC sorts chronologically, so the cutoff compares as a string.
    async fn evict(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let evicted = sqlx::query("DELETE FROM flow_instances WHERE updated_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(usize::try_from(evicted).unwrap_or(usize::MAX))
    }

    async fn total(&self) -> Result<usize, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flow_instances")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl FlowStateStore for SqlFlowStateStore {
    async fn get(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, StoreError> {
        Ok(self.load(chat_id, kind).await?)
    }

    async fn put(&self, instance: FlowInstance) -> Result<(), StoreError> {
        Ok(self.save(instance).await?)
    }

    async fn remove(
        &self,
        chat_id: ChatId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, StoreError> {
        Ok(self.delete(chat_id, kind).await?)
    }

    async fn active_for_chat(&self, chat_id: ChatId) -> Result<Vec<FlowInstance>, StoreError> {
        Ok(self.active(chat_id).await?)
    }

    async fn evict_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.evict(cutoff).await?)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.total().await?)
    }
}

fn instance_from_row(row: SqliteRow) -> Result<FlowInstance, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = FlowKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown flow kind `{kind_raw}`")))?;

    let cursor = match row.try_get::<Option<i64>, _>("cursor_step")? {
        Some(step) => StepCursor::Step(usize::try_from(step).map_err(|_| {
            RepositoryError::Decode(format!("invalid cursor step {step} for {kind_raw}"))
        })?),
        None => StepCursor::Completed,
    };

    let fields_json = row.try_get::<String, _>("fields_json")?;

    Ok(FlowInstance {
        chat_id: ChatId(row.try_get("chat_id")?),
        kind,
        fields: serde_json::from_str(&fields_json)?,
        cursor,
        identity: row.try_get("identity")?,
        started_at: parse_timestamp("started_at", row.try_get("started_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use karigar_core::domain::account::ChatId;
    use karigar_core::flows::states::{FieldValue, StepCursor};
    use karigar_core::flows::{FlowInstance, FlowKind, FlowStateStore};

    use super::SqlFlowStateStore;
    use crate::repositories::test_support::setup_pool;

    #[tokio::test]
    async fn instance_survives_a_round_trip_with_collected_fields() {
        let store = SqlFlowStateStore::new(setup_pool().await);
        let now = Utc::now();
        let mut instance = FlowInstance::start(
            ChatId(1001),
            FlowKind::WeeklyProductAdd,
            Some("seller@x.com".to_owned()),
            now,
        );
        instance.record("productName", FieldValue::Text("Handwoven Scarf".to_owned()), 2, now);
        instance.record("productPhoto", FieldValue::Url("https://media.test/p.jpg".to_owned()), 3, now);
        instance.record("sellsOnline", FieldValue::Bool(true), 4, now);
        store.put(instance.clone()).await.expect("put");

        let loaded =
            store.get(ChatId(1001), FlowKind::WeeklyProductAdd).await.expect("get").expect("row");
        assert_eq!(loaded, instance);
    }

    #[tokio::test]
    async fn put_overwrites_and_remove_returns_the_last_state() {
        let store = SqlFlowStateStore::new(setup_pool().await);
        let now = Utc::now();
        let mut instance = FlowInstance::start(ChatId(1), FlowKind::StoreCreation, None, now);
        instance.record("storeName", FieldValue::Text("Old".to_owned()), 2, now);
        store.put(instance).await.expect("put first");

        let mut completed = FlowInstance::start(ChatId(1), FlowKind::StoreCreation, None, now);
        completed.cursor = StepCursor::Completed;
        store.put(completed.clone()).await.expect("put second");
        assert_eq!(store.count().await.expect("count"), 1);
        assert!(store.active_for_chat(ChatId(1)).await.expect("active").is_empty());

        let removed = store.remove(ChatId(1), FlowKind::StoreCreation).await.expect("remove");
        assert_eq!(removed, Some(completed));
        assert!(store.remove(ChatId(1), FlowKind::StoreCreation).await.expect("remove").is_none());
    }

    #[tokio::test]
    async fn active_instances_come_back_in_precedence_order() {
        let store = SqlFlowStateStore::new(setup_pool().await);
        let now = Utc::now();
        for kind in [FlowKind::ProductBrowsing, FlowKind::SellerRegistration, FlowKind::StoryCreation]
        {
            store.put(FlowInstance::start(ChatId(9), kind, None, now)).await.expect("put");
        }

        let kinds = store
            .active_for_chat(ChatId(9))
            .await
            .expect("active")
            .into_iter()
            .map(|instance| instance.kind)
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![FlowKind::SellerRegistration, FlowKind::StoryCreation, FlowKind::ProductBrowsing]
        );
    }

    #[tokio::test]
    async fn stale_instances_are_evicted() {
        let store = SqlFlowStateStore::new(setup_pool().await);
        let now = Utc::now();
        store
            .put(FlowInstance::start(ChatId(1), FlowKind::Verification, None, now - Duration::hours(30)))
            .await
            .expect("put stale");
        store
            .put(FlowInstance::start(ChatId(2), FlowKind::Verification, None, now))
            .await
            .expect("put fresh");

        assert_eq!(store.evict_stale(now - Duration::hours(24)).await.expect("evict"), 1);
        assert_eq!(store.count().await.expect("count"), 1);
    }
}
