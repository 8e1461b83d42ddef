use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionType {
    Product,
    Invite,
    Whatsapp,
}

impl MissionType {
    pub const ALL: [MissionType; 3] = [Self::Product, Self::Invite, Self::Whatsapp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Invite => "invite",
            Self::Whatsapp => "whatsapp",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "product" => Some(Self::Product),
            "invite" => Some(Self::Invite),
            "whatsapp" => Some(Self::Whatsapp),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Product => "Add a new product",
            Self::Invite => "Invite a friend",
            Self::Whatsapp => "Share your store on WhatsApp",
        }
    }
}

/// Presence of a record means the mission was completed in that week.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionCompletion {
    pub email: String,
    pub mission: MissionType,
    pub week: u32,
    pub year: i32,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::MissionType;

    #[test]
    fn mission_type_round_trips_from_storage_encoding() {
        for mission in MissionType::ALL {
            assert_eq!(MissionType::parse(mission.as_str()), Some(mission));
        }
        assert_eq!(MissionType::parse(" WhatsApp "), Some(MissionType::Whatsapp));
        assert_eq!(MissionType::parse("referral"), None);
    }
}
