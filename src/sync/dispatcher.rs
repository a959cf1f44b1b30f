use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;
use tokio::time::Instant;

use crate::calendar::store::local_today;
use crate::calendar::{CalendarEvent, Category, EventDraft, EventStore, Priority};
use crate::sync::calendar_api::{parse_date, ApiError, CalendarApi, EventPayload};
use crate::sync::extraction::{Action, EventExtractor, ExtractionResult};

pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Timed out waiting for a response")]
    Timeout,
    #[error("No event matches \"{search_title}\"")]
    TargetNotFound { search_title: String },
    #[error("Remote request failed with status {status}")]
    Remote { status: u16 },
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Server unreachable")]
    Unreachable,
    #[error("Nothing to interpret")]
    EmptyCommand,
}

impl DispatchError {
    /// Text shown to the user for this kind of failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout => "The assistant is taking too long (over 2 minutes)".to_string(),
            Self::TargetNotFound { search_title } => format!("Event \"{}\" not found", search_title),
            Self::Remote { status } => format!("Service unavailable (status {})", status),
            Self::Unauthorized => "Session expired, please sign in again".to_string(),
            Self::Unreachable => "Server unreachable".to_string(),
            Self::EmptyCommand => "Please describe the event".to_string(),
        }
    }
}

impl From<ApiError> for DispatchError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => Self::Unauthorized,
            ApiError::Unreachable(_) => Self::Unreachable,
            ApiError::Status { status: 0, .. } => Self::Unreachable,
            ApiError::Status { status: 401, .. } => Self::Unauthorized,
            ApiError::Status { status, .. } | ApiError::Malformed { status, .. } => {
                Self::Remote { status }
            }
        }
    }
}

/// The single mutation a dispatch applied to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Created(CalendarEvent),
    Updated(CalendarEvent),
    Deleted(CalendarEvent),
}

/// Turns utterances and manual edits into remote mutations, and applies
/// them to the [`EventStore`] once the remote store confirms.
///
/// Calls are independent of each other: nothing is coalesced or queued.
pub struct CommandDispatcher {
    store: Arc<EventStore>,
    api: Arc<dyn CalendarApi>,
    extractor: Arc<dyn EventExtractor>,
    timeout: Duration,
    today: fn() -> NaiveDate,
}

impl CommandDispatcher {
    pub fn new(
        store: Arc<EventStore>,
        api: Arc<dyn CalendarApi>,
        extractor: Arc<dyn EventExtractor>,
    ) -> Self {
        Self {
            store,
            api,
            extractor,
            timeout: DEFAULT_EXTRACTION_TIMEOUT,
            today: local_today,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub async fn interpret(&self, text: &str) -> Result<Outcome, DispatchError> {
        let _request = self.store.begin_request();
        self.store.clear_error();

        let result = self.run_interpret(text).await;
        self.record(result)
    }

    pub async fn create_event(&self, draft: EventDraft) -> Result<CalendarEvent, DispatchError> {
        let _request = self.store.begin_request();
        self.store.clear_error();

        let payload = EventPayload::from(&draft);
        let result = match self.api.create(&payload).await {
            Ok(created) => {
                self.store.upsert(created.clone());
                tracing::info!("Event saved: {}", created.id);
                Ok(created)
            }
            Err(e) => {
                tracing::error!("Failed to save event: {}", e);
                Err(DispatchError::from(e))
            }
        };
        self.record(result)
    }

    pub async fn update_event(
        &self,
        id: &str,
        draft: EventDraft,
    ) -> Result<CalendarEvent, DispatchError> {
        let _request = self.store.begin_request();
        self.store.clear_error();

        let payload = EventPayload::from(&draft);
        let result = match self.api.update(id, &payload).await {
            Ok(updated) => {
                self.store.upsert(updated.clone());
                tracing::info!("Event updated: {}", updated.id);
                Ok(updated)
            }
            Err(e) => {
                tracing::error!("Failed to update event {}: {}", id, e);
                Err(DispatchError::from(e))
            }
        };
        self.record(result)
    }

    pub async fn delete_event(&self, id: &str) -> Result<(), DispatchError> {
        let _request = self.store.begin_request();
        self.store.clear_error();

        let result = match self.api.delete(id).await {
            Ok(()) => {
                self.store.remove(id);
                tracing::info!("Event deleted: {}", id);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to delete event {}: {}", id, e);
                Err(DispatchError::from(e))
            }
        };
        self.record(result)
    }

    async fn run_interpret(&self, text: &str) -> Result<Outcome, DispatchError> {
        // A blank utterance would fall back to an untitled create.
        if text.trim().is_empty() {
            return Err(DispatchError::EmptyCommand);
        }

        let deadline = Instant::now() + self.timeout;

        let extractor = Arc::clone(&self.extractor);
        let owned_text = text.to_string();
        let extraction = await_until(deadline, async move {
            extractor.extract(&owned_text).await
        })
        .await?
        .map_err(|e| {
            tracing::error!("Extraction failed: {}", e);
            DispatchError::from(e)
        })?
        .normalized();

        tracing::debug!("Extraction result: {:?}", extraction);

        match extraction.action() {
            Action::Delete => self.apply_delete(&extraction, deadline).await,
            Action::Update => self.apply_update(&extraction, deadline).await,
            Action::Create => self.apply_create(text, &extraction, deadline).await,
        }
    }

    fn resolve_target(&self, extraction: &ExtractionResult) -> Result<CalendarEvent, DispatchError> {
        let reference = extraction.target_reference().unwrap_or_default();
        let snapshot = self.store.snapshot();

        if reference.trim().is_empty() {
            tracing::warn!("Extraction named no target event");
            return Err(DispatchError::TargetNotFound {
                search_title: reference.to_string(),
            });
        }

        snapshot.find_by_title(reference).cloned().ok_or_else(|| {
            tracing::warn!("No event matches \"{}\"", reference);
            DispatchError::TargetNotFound {
                search_title: reference.to_string(),
            }
        })
    }

    async fn apply_delete(
        &self,
        extraction: &ExtractionResult,
        deadline: Instant,
    ) -> Result<Outcome, DispatchError> {
        let target = self.resolve_target(extraction)?;
        tracing::info!("Deleting \"{}\" ({}) on request", target.title, target.id);

        let api = Arc::clone(&self.api);
        let id = target.id.clone();
        await_until(deadline, async move { api.delete(&id).await })
            .await?
            .map_err(DispatchError::from)?;

        self.store.remove(&target.id);
        Ok(Outcome::Deleted(target))
    }

    async fn apply_update(
        &self,
        extraction: &ExtractionResult,
        deadline: Instant,
    ) -> Result<Outcome, DispatchError> {
        let target = self.resolve_target(extraction)?;
        let payload = merge_update(&target, extraction);
        tracing::info!("Updating \"{}\" ({}) on request", target.title, target.id);

        let api = Arc::clone(&self.api);
        let id = target.id.clone();
        let updated = await_until(deadline, async move { api.update(&id, &payload).await })
            .await?
            .map_err(DispatchError::from)?;

        self.store.upsert(updated.clone());
        Ok(Outcome::Updated(updated))
    }

    async fn apply_create(
        &self,
        text: &str,
        extraction: &ExtractionResult,
        deadline: Instant,
    ) -> Result<Outcome, DispatchError> {
        let payload = build_create(text, extraction, (self.today)());
        tracing::info!("Creating \"{}\" on {}", payload.title, payload.start_date);

        let api = Arc::clone(&self.api);
        let created = await_until(deadline, async move { api.create(&payload).await })
            .await?
            .map_err(DispatchError::from)?;

        self.store.upsert(created.clone());
        Ok(Outcome::Created(created))
    }

    fn record<T>(&self, result: Result<T, DispatchError>) -> Result<T, DispatchError> {
        if let Err(e) = &result {
            tracing::warn!("Dispatch failed: {}", e);
            self.store.record_error(e.user_message());
        }
        result
    }
}

/// Runs `work` on its own task and waits for it until `deadline`. On timeout
/// the task keeps running but its result is dropped.
async fn await_until<T, F>(deadline: Instant, work: F) -> Result<T, DispatchError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(work);
    match tokio::time::timeout_at(deadline, handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_error)) if join_error.is_panic() => {
            std::panic::resume_unwind(join_error.into_panic())
        }
        Ok(Err(_)) => Err(DispatchError::Unreachable),
        Err(_) => {
            tracing::warn!("Deadline elapsed; a late response will be discarded");
            Err(DispatchError::Timeout)
        }
    }
}

/// Extracted fields win; anything the extraction omitted keeps the target's value.
fn merge_update(target: &CalendarEvent, extraction: &ExtractionResult) -> EventPayload {
    EventPayload {
        title: extraction.title.clone().unwrap_or_else(|| target.title.clone()),
        start_date: extraction
            .start_date
            .as_deref()
            .and_then(parse_date)
            .unwrap_or(target.start),
        start_time: extraction.start_time.clone().or_else(|| target.end.clone()),
        category: extraction
            .category
            .as_deref()
            .and_then(Category::parse)
            .unwrap_or(target.category),
        priority: extraction
            .priority
            .as_deref()
            .and_then(Priority::parse)
            .unwrap_or(target.priority),
        description: target.summary.clone(),
    }
}

fn build_create(text: &str, extraction: &ExtractionResult, today: NaiveDate) -> EventPayload {
    let start_date = match extraction.start_date.as_deref() {
        Some(raw) => parse_date(raw).unwrap_or_else(|| {
            tracing::warn!("Ignoring unparsable start date '{}'", raw);
            today
        }),
        None => today,
    };

    EventPayload {
        title: extraction.title.clone().unwrap_or_else(|| text.trim().to_string()),
        start_date,
        start_time: extraction.start_time.clone(),
        category: extraction
            .category
            .as_deref()
            .and_then(Category::parse)
            .unwrap_or_default(),
        priority: extraction
            .priority
            .as_deref()
            .and_then(Priority::parse)
            .unwrap_or_default(),
        description: None,
    }
}
