use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tokio::sync::watch;

use crate::calendar::CalendarEvent;
use crate::sync::calendar_api::{ApiError, CalendarApi};

pub const UPCOMING_LIMIT: usize = 5;

pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Immutable view of the canonical collection at one point in time.
#[derive(Debug, Clone, Default)]
pub struct EventSnapshot {
    events: Arc<Vec<CalendarEvent>>,
    pending: usize,
    last_error: Option<String>,
}

impl EventSnapshot {
    /// Events in insertion order.
    pub fn events(&self) -> &[CalendarEvent] {
        &self.events
    }

    pub fn count(&self) -> usize {
        self.events.len()
    }

    pub fn today(&self, on: NaiveDate) -> Vec<&CalendarEvent> {
        self.events.iter().filter(|e| e.start == on).collect()
    }

    /// The earliest events starting on or after `from`. Ties keep insertion order.
    pub fn upcoming(&self, from: NaiveDate) -> Vec<&CalendarEvent> {
        let mut upcoming: Vec<&CalendarEvent> =
            self.events.iter().filter(|e| e.start >= from).collect();
        upcoming.sort_by_key(|e| e.start);
        upcoming.truncate(UPCOMING_LIMIT);
        upcoming
    }

    pub fn next(&self, from: NaiveDate) -> Option<&CalendarEvent> {
        self.upcoming(from).into_iter().next()
    }

    pub fn is_loading(&self) -> bool {
        self.pending > 0
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&CalendarEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    /// First event, in insertion order, whose title contains `reference`
    /// ignoring case.
    pub fn find_by_title(&self, reference: &str) -> Option<&CalendarEvent> {
        let needle = reference.trim().to_lowercase();
        self.events.iter().find(|e| e.title_contains(&needle))
    }
}

/// Owner of the canonical event collection. Readers observe it through
/// snapshots; every mutation publishes a new one.
pub struct EventStore {
    api: Arc<dyn CalendarApi>,
    state: watch::Sender<EventSnapshot>,
}

impl EventStore {
    pub fn new(api: Arc<dyn CalendarApi>) -> Self {
        let (state, _) = watch::channel(EventSnapshot::default());
        Self { api, state }
    }

    pub fn snapshot(&self) -> EventSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EventSnapshot> {
        self.state.subscribe()
    }

    /// Replaces the whole collection with the remote list. On failure the
    /// previous collection stays as it was.
    pub async fn load(&self) -> Result<usize, ApiError> {
        let _request = self.begin_request();

        match self.api.list().await {
            Ok(events) => {
                let count = events.len();
                self.state.send_modify(|s| s.events = Arc::new(dedup_by_id(events)));
                tracing::info!("Events loaded: {}", count);
                Ok(count)
            }
            Err(e) => {
                tracing::error!("Failed to load events: {}", e);
                Err(e)
            }
        }
    }

    pub fn upsert(&self, event: CalendarEvent) {
        self.state.send_modify(|s| {
            let events = Arc::make_mut(&mut s.events);
            match events.iter_mut().find(|e| e.id == event.id) {
                Some(existing) => *existing = event,
                None => events.push(event),
            }
        });
    }

    /// Returns whether an entry was removed. Unknown ids are a no-op.
    pub fn remove(&self, id: &str) -> bool {
        self.state.send_if_modified(|s| {
            if !s.events.iter().any(|e| e.id == id) {
                return false;
            }
            Arc::make_mut(&mut s.events).retain(|e| e.id != id);
            true
        })
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|s| s.last_error.take().is_some());
    }

    pub(crate) fn record_error(&self, message: String) {
        self.state.send_modify(|s| s.last_error = Some(message));
    }

    /// Marks one request in flight until the returned guard is dropped.
    pub(crate) fn begin_request(&self) -> PendingRequest<'_> {
        self.state.send_modify(|s| s.pending += 1);
        PendingRequest { state: &self.state }
    }
}

pub(crate) struct PendingRequest<'a> {
    state: &'a watch::Sender<EventSnapshot>,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|s| s.pending = s.pending.saturating_sub(1));
    }
}

fn dedup_by_id(events: Vec<CalendarEvent>) -> Vec<CalendarEvent> {
    let mut unique: Vec<CalendarEvent> = Vec::with_capacity(events.len());
    for event in events {
        match unique.iter_mut().find(|e| e.id == event.id) {
            Some(existing) => {
                tracing::warn!("Duplicate event id {} in remote list", event.id);
                *existing = event;
            }
            None => unique.push(event),
        }
    }
    unique
}
