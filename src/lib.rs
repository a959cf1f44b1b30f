pub mod calendar;
pub mod notify;
pub mod storage;
pub mod sync;

pub use calendar::{CalendarEvent, EventStore};
pub use notify::NotificationChannel;
pub use sync::{CommandDispatcher, DispatchError};
