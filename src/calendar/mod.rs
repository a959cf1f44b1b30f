pub mod event;
pub mod store;

pub use event::{CalendarEvent, Category, EventDraft, Priority};
pub use store::{EventSnapshot, EventStore};
