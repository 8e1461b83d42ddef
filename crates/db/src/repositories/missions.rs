use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use karigar_core::domain::mission::{MissionCompletion, MissionType};
use karigar_core::ports::{MissionStore, StoreError};

use super::{parse_timestamp, parse_u32, RepositoryError};
use crate::DbPool;

/// Weekly mission completions. The unique index on `(email, mission, week,
/// year)` turns a racing second completion into [`StoreError::Conflict`].
pub struct SqlMissionStore {
    pool: DbPool,
}

impl SqlMissionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn completion(
        &self,
        email: &str,
        mission: MissionType,
        week: u32,
        year: i32,
    ) -> Result<Option<MissionCompletion>, RepositoryError> {
        let row = sqlx::query(
            "SELECT email, mission, week, year, completed_at
             FROM mission_completions
             WHERE email = ? AND mission = ? AND week = ? AND year = ?",
        )
        .bind(email)
        .bind(mission.as_str())
        .bind(i64::from(week))
        .bind(year)
        .fetch_optional(&self.pool)
        .await?;

        row.map(completion_from_row).transpose()
    }

    async fn insert(&self, completion: MissionCompletion) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO mission_completions (email, mission, week, year, completed_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&completion.email)
        .bind(completion.mission.as_str())
        .bind(i64::from(completion.week))
        .bind(completion.year)
        .bind(completion.completed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Completions of one account, newest first. Used by the operator CLI.
    pub async fn history(&self, email: &str) -> Result<Vec<MissionCompletion>, StoreError> {
        let rows = sqlx::query(
            "SELECT email, mission, week, year, completed_at
             FROM mission_completions
             WHERE email = ?
             ORDER BY year DESC, week DESC, id DESC",
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(completion_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl MissionStore for SqlMissionStore {
    async fn find_completion(
        &self,
        email: &str,
        mission: MissionType,
        week: u32,
        year: i32,
    ) -> Result<Option<MissionCompletion>, StoreError> {
        Ok(self.completion(email, mission, week, year).await?)
    }

    async fn create_completion(&self, completion: MissionCompletion) -> Result<(), StoreError> {
        Ok(self.insert(completion).await?)
    }
}

fn completion_from_row(row: SqliteRow) -> Result<MissionCompletion, RepositoryError> {
    let mission_raw = row.try_get::<String, _>("mission")?;
    let mission = MissionType::parse(&mission_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown mission `{mission_raw}`")))?;

    Ok(MissionCompletion {
        email: row.try_get("email")?,
        mission,
        week: parse_u32("week", row.try_get("week")?)?,
        year: row.try_get("year")?,
        completed_at: parse_timestamp("completed_at", row.try_get("completed_at")?)?,
    })
}
