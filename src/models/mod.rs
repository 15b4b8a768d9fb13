use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

pub mod day_key;

pub use day_key::{DayKey, InvalidDayKey};

/// Broadcast tier a channel belongs to
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
pub enum Category {
    /// National free-to-air
    #[serde(rename = "TDT")]
    #[strum(serialize = "TDT")]
    Tdt,
    /// Premium pay-TV tier
    Movistar,
    Cable,
    /// Regional broadcaster; always paired with a region
    Autonomic,
    Unknown,
}

/// Result of classifying a channel name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            category: Category::Unknown,
            region: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.category != Category::Unknown
    }
}

/// A `<channel>` element as it appears in the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedChannel {
    pub id: String,
    pub display_names: Vec<String>,
    pub icon: Option<String>,
}

impl FeedChannel {
    /// First display name, falling back to the feed id
    pub fn display_name(&self) -> &str {
        self.display_names
            .iter()
            .map(|n| n.trim())
            .find(|n| !n.is_empty())
            .unwrap_or(&self.id)
    }
}

/// Channel as persisted in the document store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Store-side id, empty until the writer allocates one
    #[serde(default, skip_serializing)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Channel {
    pub fn new(name: impl Into<String>, image: Option<String>, class: Classification) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            image,
            category: class.category,
            region: class.region,
        }
    }

    pub fn classification(&self) -> Classification {
        Classification {
            category: self.category,
            region: self.region.clone(),
        }
    }
}

/// One normalized programme for one channel and day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Feed-side channel reference
    pub channel_id: String,
    pub channel_name: String,
    pub day: DayKey,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub title: String,
    /// Untruncated `<desc>` text, input to [`crate::ingestor::description::decompose`]
    #[serde(default)]
    pub raw_description: String,
    /// `raw_description` bounded to the configured character limit
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Program {
    /// Whole minutes between start and end; negative for inverted slots
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// Metadata recovered from a programme description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramDetail {
    pub duration_minutes: i64,
    pub year: String,
    pub age_rating: String,
    pub votes: String,
    pub genre: String,
    pub subgenre: String,
    pub synopsis: String,
    pub detail_map: IndexMap<String, String>,
}

/// A stored program together with its derived detail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramView {
    #[serde(flatten)]
    pub program: Program,
    pub detail: ProgramDetail,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_category_names() {
        assert_eq!(Category::Tdt.to_string(), "TDT");
        assert_eq!(Category::from_str("TDT").unwrap(), Category::Tdt);
        assert_eq!(Category::from_str("Autonomic").unwrap(), Category::Autonomic);
        assert_eq!(serde_json::to_string(&Category::Tdt).unwrap(), "\"TDT\"");
        assert_eq!(Category::iter().count(), 5);
    }

    #[test]
    fn test_display_name_fallback() {
        let named = FeedChannel {
            id: "c1".to_string(),
            display_names: vec!["La 1".to_string(), "TVE 1".to_string()],
            icon: None,
        };
        assert_eq!(named.display_name(), "La 1");

        let unnamed = FeedChannel {
            id: "c9".to_string(),
            display_names: vec!["  ".to_string()],
            icon: None,
        };
        assert_eq!(unnamed.display_name(), "c9");
    }

    #[test]
    fn test_channel_serialization_omits_id_and_empty_region() {
        let channel = Channel {
            id: "abc".to_string(),
            name: "La 1".to_string(),
            image: None,
            category: Category::Tdt,
            region: None,
        };
        let value = serde_json::to_value(&channel).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("region").is_none());
        assert_eq!(value["category"], "TDT");
    }
}
