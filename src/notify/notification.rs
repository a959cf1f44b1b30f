use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Unknown notification type: {0}")]
    UnknownKind(String),
    #[error("Payload has neither message nor title")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "REMINDER", alias = "reminder")]
    Reminder,
    #[serde(rename = "TEST")]
    Test,
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "UPDATED")]
    Updated,
    #[serde(rename = "DELETED")]
    Deleted,
    #[serde(rename = "AI_EXTRACTED")]
    AiExtracted,
}

impl NotificationKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "info" => Some(Self::Info),
            "success" => Some(Self::Success),
            "warning" => Some(Self::Warning),
            "reminder" | "REMINDER" => Some(Self::Reminder),
            "TEST" => Some(Self::Test),
            "CREATED" => Some(Self::Created),
            "UPDATED" => Some(Self::Updated),
            "DELETED" => Some(Self::Deleted),
            "AI_EXTRACTED" => Some(Self::AiExtracted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Reminder => "REMINDER",
            Self::Test => "TEST",
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
            Self::AiExtracted => "AI_EXTRACTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message: message.into(),
            kind,
            timestamp: Utc::now(),
            read: false,
            event_id: None,
            title: None,
            user_id: None,
        }
    }

    /// Validates a push message and fills in the defaults the server may omit.
    pub fn from_push(raw: &str) -> Result<Self, PayloadError> {
        let payload: PushPayload = serde_json::from_str(raw)?;
        payload.into_notification(Utc::now())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireText {
    Number(i64),
    Text(String),
}

impl WireText {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushPayload {
    id: Option<WireText>,
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    user_id: Option<String>,
    event_id: Option<WireText>,
    timestamp: Option<serde_json::Value>,
}

impl PushPayload {
    fn into_notification(self, received_at: DateTime<Utc>) -> Result<Notification, PayloadError> {
        let kind = match self.kind.as_deref() {
            None | Some("") => NotificationKind::Info,
            Some(raw) => {
                NotificationKind::parse(raw).ok_or_else(|| PayloadError::UnknownKind(raw.to_string()))?
            }
        };

        let title = self.title.filter(|t| !t.trim().is_empty());
        let message = match (self.message.filter(|m| !m.trim().is_empty()), &title) {
            (Some(message), _) => message,
            (None, Some(title)) => format!("{}: {}", kind.as_str(), title),
            (None, None) => return Err(PayloadError::Empty),
        };

        let id = self
            .id
            .map(WireText::into_string)
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Notification {
            id,
            message,
            kind,
            timestamp: self
                .timestamp
                .as_ref()
                .and_then(parse_timestamp)
                .unwrap_or(received_at),
            read: false,
            event_id: self.event_id.map(WireText::into_string),
            title,
            user_id: self.user_id,
        })
    }
}

/// RFC 3339, a zone-less local date-time, or epoch milliseconds.
fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
                Local
                    .from_local_datetime(&naive)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_payload_is_parsed() {
        let raw = r#"{
            "id": "1700000000000",
            "type": "CREATED",
            "userId": "alice",
            "title": "Gym",
            "message": "New event created: Gym",
            "eventId": "12",
            "timestamp": "2025-01-02T10:00:00Z"
        }"#;

        let notification = Notification::from_push(raw).unwrap();

        assert_eq!(notification.id, "1700000000000");
        assert_eq!(notification.kind, NotificationKind::Created);
        assert_eq!(notification.message, "New event created: Gym");
        assert_eq!(notification.event_id.as_deref(), Some("12"));
        assert_eq!(notification.user_id.as_deref(), Some("alice"));
        assert!(!notification.read);
        assert_eq!(notification.timestamp.to_rfc3339(), "2025-01-02T10:00:00+00:00");
    }

    #[test]
    fn missing_message_is_built_from_type_and_title() {
        let notification = Notification::from_push(r#"{"type": "REMINDER", "title": "Dentist"}"#).unwrap();

        assert_eq!(notification.message, "REMINDER: Dentist");
        assert_eq!(notification.kind, NotificationKind::Reminder);
    }

    #[test]
    fn missing_type_defaults_to_info() {
        let notification = Notification::from_push(r#"{"message": "hello"}"#).unwrap();

        assert_eq!(notification.kind, NotificationKind::Info);
        assert!(!notification.id.is_empty());
    }

    #[test]
    fn lowercase_reminder_is_accepted() {
        let notification = Notification::from_push(r#"{"type": "reminder", "message": "soon"}"#).unwrap();

        assert_eq!(notification.kind, NotificationKind::Reminder);
    }

    #[test]
    fn numeric_event_id_becomes_string() {
        let notification = Notification::from_push(r#"{"message": "x", "eventId": 77}"#).unwrap();

        assert_eq!(notification.event_id.as_deref(), Some("77"));
    }

    #[test]
    fn invalid_json_is_rejected() {
        let result = Notification::from_push("not json");

        assert!(matches!(result, Err(PayloadError::InvalidJson(_))));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = Notification::from_push(r#"{"type": "EXPLODED", "message": "x"}"#);

        assert!(matches!(result, Err(PayloadError::UnknownKind(_))));
    }

    #[test]
    fn payload_without_message_or_title_is_rejected() {
        let result = Notification::from_push(r#"{"type": "CREATED"}"#);

        assert!(matches!(result, Err(PayloadError::Empty)));
    }

    #[test]
    fn zoneless_timestamp_is_read_as_local_time() {
        let value = serde_json::json!("2025-01-02T10:00:00.123");

        assert!(parse_timestamp(&value).is_some());
    }

    #[test]
    fn unparsable_timestamp_falls_back_to_receipt_time() {
        let payload: PushPayload =
            serde_json::from_str(r#"{"message": "x", "timestamp": [2025, 1, 2]}"#).unwrap();
        let received_at = Utc::now();

        let notification = payload.into_notification(received_at).unwrap();

        assert_eq!(notification.timestamp, received_at);
    }

    #[test]
    fn persisted_form_round_trips_kind_names() {
        let notification = Notification::new(NotificationKind::AiExtracted, "extracted");

        let json = serde_json::to_value(&notification).unwrap();

        assert_eq!(json["type"], "AI_EXTRACTED");
        assert_eq!(json["read"], false);
    }
}
