//! Weekly mission bookkeeping.
//!
//! A completion record for `(email, mission, week, year)` means the mission
//! is done for that week. Weeks use day-of-year bucketing rather than
//! ISO-8601 weeks, evaluated in the configured UTC offset.

use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc, Weekday};
use tracing::info;

use crate::config::MissionsConfig;
use crate::domain::mission::{MissionCompletion, MissionType};
use crate::ports::{MissionStore, RecordStore, StoreError};

/// `ceil((day_of_year + jan1_weekday + 1) / 7)` with a 1-based day of year
/// and the weekday of January 1st counted from Sunday = 0.
pub fn week_number(date: NaiveDate) -> u32 {
    let jan1_weekday = NaiveDate::from_ymd_opt(date.year(), 1, 1)
        .map(|jan1| jan1.weekday().num_days_from_sunday())
        .unwrap_or(Weekday::Sun.num_days_from_sunday());
    (date.ordinal() + jan1_weekday + 1).div_ceil(7)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeekKey {
    pub week: u32,
    pub year: i32,
}

impl WeekKey {
    pub fn at(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local = now.with_timezone(&offset).date_naive();
        Self { week: week_number(local), year: local.year() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed { reward: i64, balance: i64 },
    AlreadyCompleted,
}

pub struct MissionTracker {
    missions: Arc<dyn MissionStore>,
    records: Arc<dyn RecordStore>,
    config: MissionsConfig,
}

impl MissionTracker {
    pub fn new(
        missions: Arc<dyn MissionStore>,
        records: Arc<dyn RecordStore>,
        config: MissionsConfig,
    ) -> Self {
        Self { missions, records, config }
    }

    pub fn week_of(&self, now: DateTime<Utc>) -> WeekKey {
        WeekKey::at(now, self.config.offset())
    }

    pub fn reward_for(&self, mission: MissionType) -> i64 {
        self.config.reward_for(mission)
    }

    pub async fn is_completed(&self, email: &str, mission: MissionType) -> Result<bool, StoreError> {
        self.is_completed_at(email, mission, Utc::now()).await
    }

    pub async fn is_completed_at(
        &self,
        email: &str,
        mission: MissionType,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let key = self.week_of(now);
        let record = self.missions.find_completion(email, mission, key.week, key.year).await?;
        Ok(record.is_some())
    }

    /// Records the completion and credits the reward. Does not deduplicate;
    /// callers check [`Self::is_completed`] first.
    pub async fn record_completion(
        &self,
        email: &str,
        mission: MissionType,
    ) -> Result<i64, StoreError> {
        self.record_completion_at(email, mission, Utc::now()).await
    }

    pub async fn record_completion_at(
        &self,
        email: &str,
        mission: MissionType,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let key = self.week_of(now);
        self.missions
            .create_completion(MissionCompletion {
                email: email.to_owned(),
                mission,
                week: key.week,
                year: key.year,
                completed_at: now,
            })
            .await?;
        let reward = self.reward_for(mission);
        let balance = self.records.increment_balance(email, reward).await?;
        info!(
            event_name = "mission.completed",
            mission = mission.as_str(),
            week = key.week,
            year = key.year,
            reward,
            "weekly mission recorded"
        );
        Ok(balance)
    }

    /// Guarded completion used by claim buttons.
    pub async fn claim(&self, email: &str, mission: MissionType) -> Result<ClaimOutcome, StoreError> {
        let now = Utc::now();
        if self.is_completed_at(email, mission, now).await? {
            return Ok(ClaimOutcome::AlreadyCompleted);
        }
        match self.record_completion_at(email, mission, now).await {
            Ok(balance) => Ok(ClaimOutcome::Claimed { reward: self.reward_for(mission), balance }),
            // A concurrent claim won the unique index.
            Err(StoreError::Conflict(_)) => Ok(ClaimOutcome::AlreadyCompleted),
            Err(error) => Err(error),
        }
    }

    pub async fn status(&self, email: &str) -> Result<Vec<(MissionType, bool)>, StoreError> {
        let now = Utc::now();
        let mut status = Vec::with_capacity(MissionType::ALL.len());
        for mission in MissionType::ALL {
            status.push((mission, self.is_completed_at(email, mission, now).await?));
        }
        Ok(status)
    }
}
