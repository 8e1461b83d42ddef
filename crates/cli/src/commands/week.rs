use chrono::{Datelike, NaiveDate, Utc};
use karigar_core::config::{AppConfig, LoadOptions};
use karigar_core::missions::{week_number, WeekKey};

use crate::commands::CommandResult;

/// Resolves the mission week for `date`, or for today in the configured
/// mission timezone when no date is given.
pub fn run(date: Option<&str>) -> CommandResult {
    let Some(raw) = date else {
        // Default mission settings apply when the config does not validate.
        let missions = AppConfig::load(LoadOptions::default())
            .map(|config| config.missions)
            .unwrap_or_default();
        let key = WeekKey::at(Utc::now(), missions.offset());
        return CommandResult::success(
            "week",
            format!(
                "today (UTC{}) falls in week {} of {}",
                missions.offset(),
                key.week,
                key.year
            ),
        );
    };

    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(date) => CommandResult::success("week", describe(date)),
        Err(error) => CommandResult::failure(
            "week",
            "invalid_date",
            format!("expected YYYY-MM-DD, got `{raw}`: {error}"),
            2,
        ),
    }
}

pub fn describe(date: NaiveDate) -> String {
    format!("{date} falls in week {} of {}", week_number(date), date.year())
}
