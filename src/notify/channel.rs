use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::notify::notification::{Notification, NotificationKind};
use crate::notify::transport::{Frame, PushSession, PushTransport, TransportError};
use crate::storage::kv::KeyValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub topic: String,
    pub capacity: usize,
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    pub storage_key: String,
}

impl ChannelSettings {
    /// Replaces zero capacity and zero durations with the defaults.
    fn sanitized(self) -> Self {
        let defaults = Self::default();
        let mut settings = self;
        if settings.capacity == 0 {
            tracing::warn!("Notification capacity of 0, using {}", defaults.capacity);
            settings.capacity = defaults.capacity;
        }
        if settings.reconnect_delay.is_zero() {
            tracing::warn!("Reconnect delay of 0, using {:?}", defaults.reconnect_delay);
            settings.reconnect_delay = defaults.reconnect_delay;
        }
        if settings.heartbeat_interval.is_zero() {
            tracing::warn!("Heart-beat interval of 0, using {:?}", defaults.heartbeat_interval);
            settings.heartbeat_interval = defaults.heartbeat_interval;
        }
        settings
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            topic: "/topic/notifications".to_string(),
            capacity: 20,
            reconnect_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(4),
            storage_key: "agenda-notifications".to_string(),
        }
    }
}

/// Read-only view of the notification log.
#[derive(Debug, Clone)]
pub struct NotificationState {
    entries: Vec<Notification>,
    unread: usize,
    status: ConnectionStatus,
}

impl NotificationState {
    /// Newest first.
    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }
}

/// Transient user-facing alert raised for each new notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub message: String,
    pub kind: NotificationKind,
}

struct Shared {
    settings: ChannelSettings,
    storage: Arc<dyn KeyValueStore>,
    state: watch::Sender<NotificationState>,
    alerts: broadcast::Sender<Alert>,
}

pub struct NotificationChannel {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationChannel {
    /// Rehydrates the log from `storage`. Unreadable persisted data is
    /// discarded and the log starts empty.
    pub fn new(settings: ChannelSettings, storage: Arc<dyn KeyValueStore>) -> Self {
        let settings = settings.sanitized();
        let mut entries = load_persisted(storage.as_ref(), &settings.storage_key);
        entries.truncate(settings.capacity);
        let unread = count_unread(&entries);

        let (state, _) = watch::channel(NotificationState {
            entries,
            unread,
            status: ConnectionStatus::Disconnected,
        });
        let (alerts, _) = broadcast::channel(32);

        Self {
            shared: Arc::new(Shared {
                settings,
                storage,
                state,
                alerts,
            }),
            supervisor: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> NotificationState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationState> {
        self.shared.state.subscribe()
    }

    pub fn alerts(&self) -> broadcast::Receiver<Alert> {
        self.shared.alerts.subscribe()
    }

    /// Starts the supervised connection loop. Calling it while a loop is
    /// already running has no effect.
    pub fn connect(&self, transport: Arc<dyn PushTransport>) {
        let mut supervisor = self.supervisor.lock().unwrap_or_else(PoisonError::into_inner);
        if supervisor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!("Notification channel already running");
            return;
        }

        let shared = Arc::clone(&self.shared);
        *supervisor = Some(tokio::spawn(async move { shared.supervise(transport).await }));
    }

    /// Stops the connection loop, including any pending reconnect. Idempotent.
    pub fn disconnect(&self) {
        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("Notification channel stopped");
        }
        self.shared.set_status(ConnectionStatus::Disconnected);
    }

    /// Handles one raw push message. Malformed payloads are logged and dropped.
    pub fn receive(&self, raw: &str) -> bool {
        self.shared.receive(raw)
    }

    /// Adds a locally generated notification.
    pub fn notify_local(&self, kind: NotificationKind, message: impl Into<String>) {
        self.shared.append(Notification::new(kind, message));
    }

    pub fn mark_read(&self, id: &str) -> bool {
        let changed = self.shared.state.send_if_modified(|s| {
            match s.entries.iter_mut().find(|n| n.id == id && !n.read) {
                Some(entry) => {
                    entry.read = true;
                    s.unread = count_unread(&s.entries);
                    true
                }
                None => false,
            }
        });
        if changed {
            self.shared.persist();
        }
        changed
    }

    /// Flips every entry to read; the history itself is kept.
    pub fn mark_all_read(&self) {
        self.shared.state.send_modify(|s| {
            s.entries.iter_mut().for_each(|n| n.read = true);
            s.unread = 0;
        });
        self.shared.persist();
    }

    pub fn clear(&self) {
        self.shared.state.send_modify(|s| {
            s.entries.clear();
            s.unread = 0;
        });
        if let Err(e) = self.shared.storage.remove(&self.shared.settings.storage_key) {
            tracing::warn!("Failed to remove persisted notifications: {}", e);
        }
    }
}

impl Drop for NotificationChannel {
    fn drop(&mut self) {
        if let Some(handle) = self
            .supervisor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Shared {
    async fn supervise(self: Arc<Self>, transport: Arc<dyn PushTransport>) {
        loop {
            self.set_status(ConnectionStatus::Connecting);

            match transport.connect(&self.settings.topic).await {
                Ok(mut session) => {
                    self.set_status(ConnectionStatus::Connected);
                    tracing::info!("Subscribed to {}", self.settings.topic);

                    let err = self.run_session(session.as_mut()).await;
                    tracing::warn!("Push connection lost: {}", err);
                    session.close().await;
                }
                Err(e) => tracing::warn!("Push connection failed: {}", e),
            }

            self.set_status(ConnectionStatus::Disconnected);
            tracing::info!("Reconnecting in {:?}", self.settings.reconnect_delay);
            tokio::time::sleep(self.settings.reconnect_delay).await;
        }
    }

    /// Pumps frames until the session fails. Returns the failure.
    async fn run_session(&self, session: &mut dyn PushSession) -> TransportError {
        let interval = self.settings.heartbeat_interval;
        let tolerance = interval * 2;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if last_inbound.elapsed() > tolerance {
                        return TransportError::HeartbeatTimeout(tolerance);
                    }
                    if let Err(e) = session.send_heartbeat().await {
                        return e;
                    }
                }
                frame = session.next_frame() => match frame {
                    Ok(Frame::Heartbeat) => last_inbound = Instant::now(),
                    Ok(Frame::Message(raw)) => {
                        last_inbound = Instant::now();
                        self.receive(&raw);
                    }
                    Err(e) => return e,
                },
            }
        }
    }

    fn receive(&self, raw: &str) -> bool {
        match Notification::from_push(raw) {
            Ok(notification) => {
                tracing::info!("Notification received: {:?} {}", notification.kind, notification.id);
                self.append(notification);
                true
            }
            Err(e) => {
                tracing::warn!("Dropping malformed push payload: {}", e);
                false
            }
        }
    }

    fn append(&self, notification: Notification) {
        let alert = Alert {
            message: notification.message.clone(),
            kind: notification.kind,
        };
        let capacity = self.settings.capacity;

        self.state.send_modify(|s| {
            s.entries.insert(0, notification);
            s.entries.truncate(capacity);
            s.unread = count_unread(&s.entries);
        });
        self.persist();

        // No subscriber is not an error.
        let _ = self.alerts.send(alert);
    }

    fn persist(&self) {
        let serialized = serde_json::to_string(&self.state.borrow().entries);
        match serialized {
            Ok(json) => {
                if let Err(e) = self.storage.set(&self.settings.storage_key, &json) {
                    tracing::warn!("Failed to persist notifications: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize notifications: {}", e),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.state.send_if_modified(|s| {
            let changed = s.status != status;
            s.status = status;
            changed
        });
    }
}

fn count_unread(entries: &[Notification]) -> usize {
    entries.iter().filter(|n| !n.read).count()
}

fn load_persisted(storage: &dyn KeyValueStore, key: &str) -> Vec<Notification> {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!("Failed to read persisted notifications: {}", e);
            return Vec::new();
        }
    };

    serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!("Discarding malformed persisted notifications: {}", e);
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryKeyValueStore;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    const KEY: &str = "agenda-notifications";

    fn create_test_channel() -> (NotificationChannel, Arc<MemoryKeyValueStore>) {
        let storage = Arc::new(MemoryKeyValueStore::new());
        let channel = NotificationChannel::new(ChannelSettings::default(), storage.clone());
        (channel, storage)
    }

    fn push_message(i: usize) -> String {
        format!(r#"{{"id": "n{}", "type": "CREATED", "message": "Event {}"}}"#, i, i)
    }

    fn persisted(storage: &MemoryKeyValueStore) -> Vec<Notification> {
        serde_json::from_str(&storage.get(KEY).unwrap().unwrap()).unwrap()
    }

    #[test]
    fn received_notification_is_prepended_and_persisted() {
        let (channel, storage) = create_test_channel();

        assert!(channel.receive(&push_message(1)));
        assert!(channel.receive(&push_message(2)));

        let state = channel.snapshot();
        assert_eq!(state.entries()[0].id, "n2");
        assert_eq!(state.unread(), 2);
        assert_eq!(persisted(&storage).len(), 2);
    }

    #[test]
    fn log_keeps_only_the_twenty_most_recent() {
        let (channel, _storage) = create_test_channel();

        for i in 1..=25 {
            channel.receive(&push_message(i));
        }

        let state = channel.snapshot();
        let ids: Vec<String> = state.entries().iter().map(|n| n.id.clone()).collect();
        let expected: Vec<String> = (6..=25).rev().map(|i| format!("n{}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn malformed_payload_is_dropped() {
        let (channel, storage) = create_test_channel();

        assert!(!channel.receive("{not json"));

        assert!(channel.snapshot().entries().is_empty());
        assert_eq!(storage.get(KEY).unwrap(), None);
    }

    #[test]
    fn mark_read_flips_one_entry() {
        let (channel, storage) = create_test_channel();
        channel.receive(&push_message(1));
        channel.receive(&push_message(2));

        assert!(channel.mark_read("n1"));
        assert!(!channel.mark_read("n1"));

        let state = channel.snapshot();
        assert_eq!(state.unread(), 1);
        assert!(persisted(&storage).iter().any(|n| n.id == "n1" && n.read));
    }

    #[test]
    fn mark_all_read_keeps_history() {
        let (channel, _storage) = create_test_channel();
        for i in 1..=3 {
            channel.receive(&push_message(i));
        }

        channel.mark_all_read();

        let state = channel.snapshot();
        assert_eq!(state.unread(), 0);
        assert_eq!(state.entries().len(), 3);
        assert!(state.entries().iter().all(|n| n.read));
    }

    #[test]
    fn clear_empties_log_and_storage() {
        let (channel, storage) = create_test_channel();
        channel.receive(&push_message(1));

        channel.clear();

        assert!(channel.snapshot().entries().is_empty());
        assert_eq!(channel.snapshot().unread(), 0);
        assert_eq!(storage.get(KEY).unwrap(), None);
    }

    #[test]
    fn log_is_rehydrated_from_storage() {
        let storage = Arc::new(MemoryKeyValueStore::new());
        {
            let channel = NotificationChannel::new(ChannelSettings::default(), storage.clone());
            channel.receive(&push_message(1));
            channel.receive(&push_message(2));
            channel.mark_read("n2");
        }

        let channel = NotificationChannel::new(ChannelSettings::default(), storage);

        let state = channel.snapshot();
        assert_eq!(state.entries().len(), 2);
        assert_eq!(state.unread(), 1);
    }

    #[test]
    fn malformed_persisted_log_is_discarded() {
        let storage = Arc::new(MemoryKeyValueStore::new());
        storage.set(KEY, "{\"oops\": true").unwrap();

        let channel = NotificationChannel::new(ChannelSettings::default(), storage);

        assert!(channel.snapshot().entries().is_empty());
    }

    #[tokio::test]
    async fn local_notification_raises_alert() {
        let (channel, _storage) = create_test_channel();
        let mut alerts = channel.alerts();

        channel.notify_local(NotificationKind::Success, "Event saved");

        let alert = alerts.recv().await.unwrap();
        assert_eq!(alert.message, "Event saved");
        assert_eq!(channel.snapshot().unread(), 1);
    }

    /// Transport whose sessions are fed through channels handed to the test.
    struct ScriptedTransport {
        attempts: AtomicUsize,
        sessions: Mutex<mpsc::UnboundedReceiver<ScriptedSession>>,
    }

    struct ScriptedSession {
        frames: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
        heartbeats: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl PushTransport for ScriptedTransport {
        async fn connect(&self, _topic: &str) -> Result<Box<dyn PushSession>, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.sessions.lock().unwrap().try_recv();
            match next {
                Ok(session) => Ok(Box::new(session)),
                Err(_) => Err(TransportError::Closed),
            }
        }
    }

    #[async_trait]
    impl PushSession for ScriptedSession {
        async fn next_frame(&mut self) -> Result<Frame, TransportError> {
            match self.frames.recv().await {
                Some(frame) => frame,
                None => std::future::pending().await,
            }
        }

        async fn send_heartbeat(&mut self) -> Result<(), TransportError> {
            let _ = self.heartbeats.send(());
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn fast_settings() -> ChannelSettings {
        ChannelSettings {
            reconnect_delay: Duration::from_millis(50),
            heartbeat_interval: Duration::from_millis(40),
            ..ChannelSettings::default()
        }
    }

    async fn wait_for_status(channel: &NotificationChannel, status: ConnectionStatus) {
        let mut receiver = channel.subscribe();
        tokio::time::timeout(
            Duration::from_secs(2),
            receiver.wait_for(|s| s.status() == status),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn connected_channel_receives_messages_and_reconnects_after_error() {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(ScriptedTransport {
            attempts: AtomicUsize::new(0),
            sessions: Mutex::new(session_rx),
        });
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (heartbeat_tx, _heartbeat_rx) = mpsc::unbounded_channel();
        session_tx
            .send(ScriptedSession {
                frames: frames_rx,
                heartbeats: heartbeat_tx,
            })
            .unwrap();

        let channel = NotificationChannel::new(fast_settings(), Arc::new(MemoryKeyValueStore::new()));
        channel.connect(transport.clone());
        wait_for_status(&channel, ConnectionStatus::Connected).await;

        frames_tx.send(Ok(Frame::Message(push_message(1)))).unwrap();
        frames_tx.send(Ok(Frame::Message("garbage".to_string()))).unwrap();
        frames_tx.send(Err(TransportError::Closed)).unwrap();
        wait_for_status(&channel, ConnectionStatus::Disconnected).await;

        assert_eq!(channel.snapshot().entries().len(), 1);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(transport.attempts.load(Ordering::SeqCst) >= 2);

        channel.disconnect();
    }

    #[tokio::test]
    async fn silent_peer_is_treated_as_transport_error() {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(ScriptedTransport {
            attempts: AtomicUsize::new(0),
            sessions: Mutex::new(session_rx),
        });
        let (_frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::unbounded_channel();
        session_tx
            .send(ScriptedSession {
                frames: frames_rx,
                heartbeats: heartbeat_tx,
            })
            .unwrap();

        let channel = NotificationChannel::new(fast_settings(), Arc::new(MemoryKeyValueStore::new()));
        channel.connect(transport);
        wait_for_status(&channel, ConnectionStatus::Connected).await;

        tokio::time::timeout(Duration::from_secs(1), heartbeat_rx.recv())
            .await
            .unwrap();
        wait_for_status(&channel, ConnectionStatus::Disconnected).await;

        channel.disconnect();
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_stops_reconnecting() {
        let (_session_tx, session_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(ScriptedTransport {
            attempts: AtomicUsize::new(0),
            sessions: Mutex::new(session_rx),
        });
        let channel = NotificationChannel::new(fast_settings(), Arc::new(MemoryKeyValueStore::new()));

        channel.connect(transport.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.disconnect();
        channel.disconnect();
        let attempts = transport.attempts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(transport.attempts.load(Ordering::SeqCst), attempts);
        assert_eq!(channel.snapshot().status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn zero_heartbeat_interval_falls_back_to_default_and_keeps_running() {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(ScriptedTransport {
            attempts: AtomicUsize::new(0),
            sessions: Mutex::new(session_rx),
        });
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (heartbeat_tx, _heartbeat_rx) = mpsc::unbounded_channel();
        session_tx
            .send(ScriptedSession {
                frames: frames_rx,
                heartbeats: heartbeat_tx,
            })
            .unwrap();
        let settings = ChannelSettings {
            capacity: 0,
            reconnect_delay: Duration::ZERO,
            heartbeat_interval: Duration::ZERO,
            ..ChannelSettings::default()
        };

        let channel = NotificationChannel::new(settings, Arc::new(MemoryKeyValueStore::new()));
        assert_eq!(channel.shared.settings.capacity, 20);
        assert_eq!(channel.shared.settings.reconnect_delay, Duration::from_secs(5));
        assert_eq!(channel.shared.settings.heartbeat_interval, Duration::from_secs(4));

        channel.connect(transport);
        wait_for_status(&channel, ConnectionStatus::Connected).await;
        frames_tx.send(Ok(Frame::Message(push_message(1)))).unwrap();
        let mut state = channel.subscribe();
        tokio::time::timeout(Duration::from_secs(1), state.wait_for(|s| s.entries().len() == 1))
            .await
            .unwrap()
            .unwrap();

        let finished = channel
            .supervisor
            .lock()
            .unwrap()
            .as_ref()
            .map(|handle| handle.is_finished());
        assert_eq!(finished, Some(false));

        channel.disconnect();
    }

    proptest! {
        #[test]
        fn log_never_exceeds_capacity(count in 0usize..60) {
            let (channel, storage) = create_test_channel();
            for i in 0..count {
                channel.receive(&push_message(i));
            }

            let state = channel.snapshot();
            prop_assert_eq!(state.entries().len(), count.min(20));
            prop_assert_eq!(state.unread(), count.min(20));
            if count > 0 {
                prop_assert_eq!(persisted(&storage).len(), count.min(20));
                prop_assert_eq!(&state.entries()[0].id, &format!("n{}", count - 1));
            }
        }
    }
}
