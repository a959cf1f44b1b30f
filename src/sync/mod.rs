pub mod calendar_api;
pub mod dispatcher;
pub mod extraction;

pub use calendar_api::{ApiError, CalendarApi, EventPayload, HttpCalendarClient};
pub use dispatcher::{CommandDispatcher, DispatchError, Outcome};
pub use extraction::{Action, EventExtractor, ExtractionResult, HttpExtractionClient};
