pub mod channel;
pub mod notification;
pub mod transport;

pub use channel::{Alert, ChannelSettings, ConnectionStatus, NotificationChannel, NotificationState};
pub use notification::{Notification, NotificationKind};
pub use transport::{PushTransport, TcpLineTransport};
