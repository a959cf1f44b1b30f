use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    #[default]
    Work,
    Health,
    Sport,
    Social,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Category {
    /// Case-insensitive parse of the wire name (`WORK`, `health`, ...).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "WORK" => Some(Self::Work),
            "HEALTH" => Some(Self::Health),
            "SPORT" => Some(Self::Sport),
            "SOCIAL" => Some(Self::Social),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Work => "WORK",
            Self::Health => "HEALTH",
            Self::Sport => "SPORT",
            Self::Social => "SOCIAL",
        }
    }
}

impl Priority {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

/// A server-confirmed calendar event. Only records that carry an id assigned
/// by the remote store ever live in the canonical collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: NaiveDate,
    /// Event time: either a time of day (`HH:mm`) or a full timestamp.
    /// This is not the end of a duration.
    pub end: Option<String>,
    pub category: Category,
    pub priority: Priority,
    pub summary: Option<String>,
}

/// Field values for an event that has not been confirmed by the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub title: String,
    pub start: NaiveDate,
    pub end: Option<String>,
    pub category: Category,
    pub priority: Priority,
    pub summary: Option<String>,
}

impl EventDraft {
    pub fn new(title: impl Into<String>, start: NaiveDate) -> Self {
        Self {
            title: title.into(),
            start,
            end: None,
            category: Category::default(),
            priority: Priority::default(),
            summary: None,
        }
    }

    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.end = Some(time.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

impl From<&CalendarEvent> for EventDraft {
    fn from(event: &CalendarEvent) -> Self {
        Self {
            title: event.title.clone(),
            start: event.start,
            end: event.end.clone(),
            category: event.category,
            priority: event.priority,
            summary: event.summary.clone(),
        }
    }
}

impl CalendarEvent {
    pub fn title_contains(&self, needle_lowercase: &str) -> bool {
        self.title.to_lowercase().contains(needle_lowercase)
    }
}
