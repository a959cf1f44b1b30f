use crate::calendar::{CalendarEvent, Category, EventDraft, Priority};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const UNTITLED: &str = "Untitled";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed")]
    Unauthorized,
    #[error("Server unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed response (status {status}): {reason}")]
    Malformed { status: u16, reason: String },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::Unreachable(_) => None,
            Self::Status { status, .. } | Self::Malformed { status, .. } => Some(*status),
        }
    }
}

/// Request body for create and update calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub title: String,
    pub start_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    pub category: Category,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&EventDraft> for EventPayload {
    fn from(draft: &EventDraft) -> Self {
        Self {
            title: draft.title.clone(),
            start_date: draft.start,
            start_time: draft.end.clone(),
            category: draft.category,
            priority: draft.priority,
            description: draft.summary.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(i64),
    Text(String),
}

/// Event record as returned by the calendar service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerEvent {
    id: Option<WireId>,
    title: Option<String>,
    start_date: Option<String>,
    start: Option<String>,
    start_time: Option<String>,
    end: Option<String>,
    category: Option<String>,
    priority: Option<String>,
    description: Option<String>,
}

impl ServerEvent {
    fn into_event(self, today: NaiveDate) -> Result<CalendarEvent, String> {
        let id = match self.id {
            Some(WireId::Number(n)) => n.to_string(),
            Some(WireId::Text(s)) if !s.trim().is_empty() => s,
            _ => return Err("missing event id".to_string()),
        };

        let start = match non_empty(self.start_date).or_else(|| non_empty(self.start)) {
            Some(raw) => parse_date(&raw).ok_or_else(|| format!("invalid start date '{}'", raw))?,
            None => today,
        };

        let category = non_empty(self.category)
            .and_then(|c| Category::parse(&c))
            .unwrap_or_default();
        let priority = non_empty(self.priority)
            .and_then(|p| Priority::parse(&p))
            .unwrap_or_default();

        Ok(CalendarEvent {
            id,
            title: non_empty(self.title).unwrap_or_else(|| UNTITLED.to_string()),
            start,
            end: non_empty(self.start_time).or_else(|| non_empty(self.end)),
            category,
            priority,
            summary: non_empty(self.description),
        })
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time component.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn list(&self) -> Result<Vec<CalendarEvent>, ApiError>;

    async fn create(&self, payload: &EventPayload) -> Result<CalendarEvent, ApiError>;

    async fn update(&self, id: &str, payload: &EventPayload) -> Result<CalendarEvent, ApiError>;

    async fn delete(&self, id: &str) -> Result<(), ApiError>;
}

pub(crate) fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

pub(crate) async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();

    if status == 401 {
        tracing::error!("Request rejected as unauthorized");
        return Err(ApiError::Unauthorized);
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!("Request failed. Status: {}, Body: {}", status, body);
        return Err(ApiError::Status { status: status.as_u16(), body });
    }

    Ok(response)
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ApiError::Malformed {
        status,
        reason: e.to_string(),
    })
}

pub struct HttpCalendarClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpCalendarClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn collection_url(&self) -> String {
        format!("{}/api/calendar", self.base_url)
    }

    fn event_url(&self, id: &str) -> String {
        format!("{}/api/calendar/{}", self.base_url, urlencoding::encode(id))
    }

    fn convert_response(record: ServerEvent, status: u16) -> Result<CalendarEvent, ApiError> {
        record
            .into_event(Local::now().date_naive())
            .map_err(|reason| ApiError::Malformed { status, reason })
    }
}

#[async_trait]
impl CalendarApi for HttpCalendarClient {
    async fn list(&self) -> Result<Vec<CalendarEvent>, ApiError> {
        let url = self.collection_url();
        tracing::info!("Fetching events from {}", url);

        let request = authorize(self.client.get(&url), self.token.as_deref());
        let response = check_status(request.send().await?).await?;
        let records: Vec<ServerEvent> = read_json(response).await?;

        let today = Local::now().date_naive();
        let events: Vec<CalendarEvent> = records
            .into_iter()
            .filter_map(|record| match record.into_event(today) {
                Ok(event) => Some(event),
                Err(reason) => {
                    tracing::warn!("Skipping malformed event record: {}", reason);
                    None
                }
            })
            .collect();

        tracing::info!("Fetched {} events successfully", events.len());
        Ok(events)
    }

    async fn create(&self, payload: &EventPayload) -> Result<CalendarEvent, ApiError> {
        let url = self.collection_url();
        tracing::info!("Creating event: {} on {}", payload.title, payload.start_date);
        tracing::debug!("POST {} with payload: {:?}", url, payload);

        let request = authorize(self.client.post(&url), self.token.as_deref()).json(payload);
        let response = check_status(request.send().await?).await?;
        let status = response.status().as_u16();
        let record: ServerEvent = read_json(response).await?;
        let event = Self::convert_response(record, status)?;

        tracing::info!("Event created successfully with ID: {}", event.id);
        Ok(event)
    }

    async fn update(&self, id: &str, payload: &EventPayload) -> Result<CalendarEvent, ApiError> {
        let url = self.event_url(id);
        tracing::info!("Updating event {}: {}", id, payload.title);
        tracing::debug!("PUT {} with payload: {:?}", url, payload);

        let request = authorize(self.client.put(&url), self.token.as_deref()).json(payload);
        let response = check_status(request.send().await?).await?;
        let status = response.status().as_u16();
        let record: ServerEvent = read_json(response).await?;
        let event = Self::convert_response(record, status)?;

        tracing::info!("Event {} updated successfully", id);
        Ok(event)
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let url = self.event_url(id);
        tracing::info!("Deleting event {}", id);

        let request = authorize(self.client.delete(&url), self.token.as_deref());
        check_status(request.send().await?).await?;

        tracing::info!("Event {} deleted", id);
        Ok(())
    }
}
