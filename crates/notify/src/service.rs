//! Notification synchronization service.
//!
//! The facade owning the full pipeline: connection manager, normalization,
//! reconciliation store, message templating, and alert fan-out. One
//! long-lived task consumes transport events in arrival order; everything
//! the UI layer needs flows out through a broadcast stream of
//! [`SyncEvent`]s and snapshot accessors.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::alert::{AlertFanout, AlertSink, DesktopNotifier};
use crate::api::{NotificationApi, UserDirectory};
use crate::connection::{ConnectionConfig, ConnectionManager, TransportEvent};
use crate::dedup::DEFAULT_DEDUP_CAPACITY;
use crate::error::Result;
use crate::model::{ConnectionState, Notification, NotificationKind};
use crate::normalizer;
use crate::protocol::{HubProtocol, PushFrame};
use crate::store::{ReconciliationStore, StoredNotification};
use crate::template::MessageTemplater;
use crate::token::TokenGuard;

/// Configuration for the synchronization engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Push endpoint (`ws://` or `wss://`).
    pub endpoint: String,
    /// Operator the engine synchronizes notifications for.
    pub user_id: String,
    /// Logical group joined after every connect, when set.
    pub group: Option<String>,
    /// Page size for the history fetch.
    pub history_page_size: u32,
    /// Ids remembered by the dedup registries before eviction.
    pub dedup_capacity: usize,
    /// Keep-alive cadence on the push channel, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Auto-dismiss window for in-app alerts, in milliseconds.
    pub alert_dismiss_ms: u64,
    /// Reconnect attempts before giving up. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            user_id: String::new(),
            group: None,
            history_page_size: 20,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            heartbeat_interval_ms: 15_000,
            alert_dismiss_ms: 5_000,
            max_reconnect_attempts: None,
        }
    }
}

/// Events published to the UI layer.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The push connection changed state.
    ConnectionChanged(ConnectionState),
    /// A new notification was accepted into the store.
    Received(Notification),
    /// History rows were merged; how many were new.
    HistoryMerged(usize),
    /// The displayed unread total changed.
    UnreadChanged(u64),
    /// A message finished resolving to human-readable text.
    MessageResolved { id: String, message: String },
    /// One notification was marked read.
    MarkedRead(String),
    /// Every notification was marked read.
    MarkedAllRead(usize),
    /// The collection was dropped.
    Cleared,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStats {
    pub accepted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub merged: u64,
    pub total: usize,
    pub displayed_unread: u64,
    pub live_unread: u64,
    pub rest_unread: u64,
    pub alerts_shown: usize,
    pub connection: ConnectionState,
    pub reconnect_count: u32,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    merged: AtomicU64,
}

/// Real-time notification synchronization engine.
pub struct NotificationSyncService {
    config: SyncConfig,
    api: Arc<dyn NotificationApi>,
    store: Arc<ReconciliationStore>,
    templater: Arc<MessageTemplater>,
    fanout: Arc<AlertFanout>,
    connection: Arc<ConnectionManager<HubProtocol>>,
    transport_tx: mpsc::Sender<TransportEvent>,
    transport_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    events_tx: broadcast::Sender<SyncEvent>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    pipeline: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationSyncService {
    /// Wire up the engine. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: SyncConfig,
        token_guard: Arc<TokenGuard>,
        api: Arc<dyn NotificationApi>,
        directory: Arc<dyn UserDirectory>,
        sink: Arc<dyn AlertSink>,
        desktop: Option<Arc<dyn DesktopNotifier>>,
    ) -> Self {
        let store = Arc::new(ReconciliationStore::new(config.dedup_capacity));
        let templater = Arc::new(MessageTemplater::new(directory));
        let fanout = Arc::new(AlertFanout::new(
            sink,
            desktop,
            templater.clone(),
            config.dedup_capacity,
            Duration::from_millis(config.alert_dismiss_ms),
        ));

        let (transport_tx, transport_rx) = mpsc::channel(256);
        let protocol = HubProtocol::new(&config.endpoint, config.heartbeat_interval_ms);
        let connection = Arc::new(ConnectionManager::new(
            protocol,
            token_guard,
            ConnectionConfig {
                max_reconnect_attempts: config.max_reconnect_attempts,
                group: config.group.clone(),
            },
            transport_tx.clone(),
        ));
        let (events_tx, _) = broadcast::channel(256);

        Self {
            config,
            api,
            store,
            templater,
            fanout,
            connection,
            transport_tx,
            transport_rx: Mutex::new(Some(transport_rx)),
            events_tx,
            counters: Arc::new(Counters::default()),
            cancel: CancellationToken::new(),
            pipeline: Mutex::new(None),
        }
    }

    /// Prime local state from REST and open the push channel.
    ///
    /// History and unread-count failures are tolerated so live events can
    /// still flow; a second call is a no-op.
    pub async fn start(&self) -> Result<()> {
        let Some(transport_rx) = self.transport_rx.lock().take() else {
            debug!("Start ignored, engine already started");
            return Ok(());
        };
        self.spawn_pipeline(transport_rx);
        info!(user_id = %self.config.user_id, "Starting notification sync");

        if let Err(e) = self.refresh_history().await {
            warn!(error = %e, "History fetch failed on start");
        }
        match self.api.unread_count(&self.config.user_id).await {
            Ok(count) => {
                self.store.set_rest_unread(count);
                let _ = self
                    .events_tx
                    .send(SyncEvent::UnreadChanged(self.store.displayed_unread()));
            }
            Err(e) => debug!(error = %e, "Unread count fetch failed on start"),
        }

        self.connection.connect().await
    }

    /// Fetch a page of history and merge it into the collection.
    ///
    /// Merged rows are seeded as already shown, so history never alerts.
    #[instrument(skip(self))]
    pub async fn refresh_history(&self) -> Result<usize> {
        let rows = self
            .api
            .history(&self.config.user_id, 1, self.config.history_page_size)
            .await?;
        if self.cancel.is_cancelled() {
            return Ok(0);
        }

        let items: Vec<Notification> = rows.iter().filter_map(normalizer::normalize).collect();
        if items.len() < rows.len() {
            debug!(
                dropped = rows.len() - items.len(),
                "History rows rejected by normalization"
            );
        }

        // Seed before merging so a concurrent sweep cannot alert a row
        // that is about to become visible.
        self.fanout.seed(items.iter().map(|n| n.id.as_str()));
        let added = self.store.merge_history(items);
        self.counters.merged.fetch_add(added as u64, Ordering::SeqCst);

        if added > 0 {
            debug!(added, "History merged");
            let _ = self.events_tx.send(SyncEvent::HistoryMerged(added));
        }
        Ok(added)
    }

    /// Mark one notification read.
    ///
    /// Local state changes only after the backend acknowledged, so a
    /// failed call leaves everything untouched and retryable.
    #[instrument(skip(self))]
    pub async fn mark_read(&self, id: &str) -> Result<bool> {
        let acknowledged = self.api.mark_read(id, &self.config.user_id).await?;
        if !acknowledged {
            debug!(id, "Mark-read not acknowledged");
            return Ok(false);
        }
        if self.cancel.is_cancelled() {
            return Ok(true);
        }

        if self.store.mark_read(id, Utc::now()) {
            let _ = self.events_tx.send(SyncEvent::MarkedRead(id.to_string()));
            let _ = self
                .events_tx
                .send(SyncEvent::UnreadChanged(self.store.displayed_unread()));
        }
        Ok(true)
    }

    /// Mark every notification read.
    #[instrument(skip(self))]
    pub async fn mark_all_read(&self) -> Result<bool> {
        let acknowledged = self.api.mark_all_read(&self.config.user_id).await?;
        if !acknowledged {
            debug!("Mark-all-read not acknowledged");
            return Ok(false);
        }
        if self.cancel.is_cancelled() {
            return Ok(true);
        }

        let flipped = self.store.mark_all_read(Utc::now());
        let _ = self.events_tx.send(SyncEvent::MarkedAllRead(flipped));
        let _ = self
            .events_tx
            .send(SyncEvent::UnreadChanged(self.store.displayed_unread()));
        Ok(true)
    }

    /// Drop every notification and forget all session state.
    pub fn clear(&self) {
        self.store.clear();
        self.fanout.clear();
        let _ = self.events_tx.send(SyncEvent::Cleared);
        let _ = self.events_tx.send(SyncEvent::UnreadChanged(0));
    }

    /// Merged collection, newest first, with resolved messages applied.
    pub fn notifications(&self) -> Vec<StoredNotification> {
        self.store.ordered_view()
    }

    /// Look up one notification.
    pub fn notification(&self, id: &str) -> Option<Notification> {
        self.store.get(id)
    }

    /// Unread total with the live-then-rest fallback.
    pub fn displayed_unread(&self) -> u64 {
        self.store.displayed_unread()
    }

    /// Current push connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    /// Sender feeding the processing pipeline.
    ///
    /// The managed websocket uses this internally; alternate transports
    /// (tests, replays) can inject [`TransportEvent`]s through it.
    pub fn transport_sender(&self) -> mpsc::Sender<TransportEvent> {
        self.transport_tx.clone()
    }

    /// Snapshot of the engine counters.
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            accepted: self.counters.accepted.load(Ordering::SeqCst),
            duplicates: self.counters.duplicates.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
            merged: self.counters.merged.load(Ordering::SeqCst),
            total: self.store.len(),
            displayed_unread: self.store.displayed_unread(),
            live_unread: self.store.live_unread(),
            rest_unread: self.store.rest_unread(),
            alerts_shown: self.fanout.shown_len(),
            connection: self.connection.state(),
            reconnect_count: self.connection.reconnect_count(),
        }
    }

    /// Stop the transport and the pipeline. Safe to call twice or when
    /// never started.
    pub async fn shutdown(&self) {
        info!("Shutting down notification sync");
        self.cancel.cancel();
        self.connection.shutdown().await;
        let handle = self.pipeline.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn spawn_pipeline(&self, mut transport_rx: mpsc::Receiver<TransportEvent>) {
        let store = self.store.clone();
        let fanout = self.fanout.clone();
        let templater = self.templater.clone();
        let api = self.api.clone();
        let events_tx = self.events_tx.clone();
        let counters = self.counters.clone();
        let user_id = self.config.user_id.clone();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = transport_rx.recv() => {
                        let Some(event) = event else {
                            break;
                        };
                        match event {
                            TransportEvent::State(state) => {
                                let _ = events_tx.send(SyncEvent::ConnectionChanged(state));
                                if state == ConnectionState::Connected {
                                    // Recover the unread baseline after every
                                    // (re)connect; events may have been missed
                                    // while offline.
                                    match api.unread_count(&user_id).await {
                                        Ok(count) => {
                                            store.set_rest_unread(count);
                                            let _ = events_tx.send(SyncEvent::UnreadChanged(
                                                store.displayed_unread(),
                                            ));
                                        }
                                        Err(e) => {
                                            debug!(error = %e, "Unread count refresh failed")
                                        }
                                    }
                                }
                            }
                            TransportEvent::Frame(frame) => {
                                process_frame(
                                    frame, &store, &fanout, &templater, &events_tx, &counters,
                                    &cancel,
                                )
                                .await;
                            }
                        }
                    }
                }
            }
            debug!("Notification pipeline stopped");
        });
        *self.pipeline.lock() = Some(handle);
    }
}

/// Handle one decoded push frame: normalize, dedup, store, resolve, alert.
async fn process_frame(
    frame: PushFrame,
    store: &ReconciliationStore,
    fanout: &AlertFanout,
    templater: &MessageTemplater,
    events_tx: &broadcast::Sender<SyncEvent>,
    counters: &Counters,
    cancel: &CancellationToken,
) {
    let Some(notification) = normalizer::normalize(&frame.payload) else {
        counters.rejected.fetch_add(1, Ordering::SeqCst);
        return;
    };

    if !store.ingest(notification.clone()) {
        counters.duplicates.fetch_add(1, Ordering::SeqCst);
        return;
    }
    counters.accepted.fetch_add(1, Ordering::SeqCst);
    debug!(
        id = %notification.id,
        kind = %notification.kind,
        channel = %frame.channel,
        "Notification accepted"
    );

    let _ = events_tx.send(SyncEvent::Received(notification.clone()));
    let _ = events_tx.send(SyncEvent::UnreadChanged(store.displayed_unread()));

    // The record is visible with its original text already; the resolved
    // message lands as an overlay once lookups settle.
    let resolved = match notification.kind {
        NotificationKind::WithdrawPending => {
            templater.resolve_withdrawal(&notification.message).await
        }
        _ => templater.resolve(&notification.message).await,
    };
    if resolved != notification.message
        && !cancel.is_cancelled()
        && store.set_resolved_message(&notification.id, &resolved)
    {
        let _ = events_tx.send(SyncEvent::MessageResolved {
            id: notification.id.clone(),
            message: resolved,
        });
    }

    fanout.maybe_alert(&notification).await;

    // Backup watcher pass, the collection just grew.
    fanout.sweep(&store.ordered_view()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::DesktopPermission;
    use crate::error::NotifyError;
    use crate::token::CredentialProvider;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::AtomicU32;

    struct TestProvider;

    #[async_trait]
    impl CredentialProvider for TestProvider {
        async fn access_token(&self) -> Option<String> {
            None
        }

        async fn refresh(&self) -> Result<Option<String>> {
            Ok(Some("h.p.s".to_string()))
        }
    }

    struct TestApi {
        history_rows: Vec<Value>,
        unread: u64,
        fail_mark_read: bool,
        mark_read_calls: AtomicU32,
    }

    impl TestApi {
        fn new() -> Self {
            Self {
                history_rows: Vec::new(),
                unread: 0,
                fail_mark_read: false,
                mark_read_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl NotificationApi for TestApi {
        async fn history(&self, _user_id: &str, _page: u32, _page_size: u32) -> Result<Vec<Value>> {
            Ok(self.history_rows.clone())
        }

        async fn unread_count(&self, _user_id: &str) -> Result<u64> {
            Ok(self.unread)
        }

        async fn mark_read(&self, _id: &str, _user_id: &str) -> Result<bool> {
            self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_mark_read {
                return Err(NotifyError::api(500, "boom"));
            }
            Ok(true)
        }

        async fn mark_all_read(&self, _user_id: &str) -> Result<bool> {
            Ok(true)
        }
    }

    struct NullDirectory;

    #[async_trait]
    impl UserDirectory for NullDirectory {
        async fn display_name(&self, _user_id: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn withdrawal_owner(&self, _withdrawal_id: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    struct NullSink;

    #[async_trait]
    impl AlertSink for NullSink {
        async fn show(&self, _notification: &Notification, _dismiss_after: Duration) -> Result<()> {
            Ok(())
        }
    }

    struct NullDesktop;

    #[async_trait]
    impl DesktopNotifier for NullDesktop {
        async fn permission(&self) -> DesktopPermission {
            DesktopPermission::Denied
        }

        async fn request_permission(&self) -> DesktopPermission {
            DesktopPermission::Denied
        }

        async fn show(&self, _notification: &Notification, _tag: &str) -> Result<()> {
            Ok(())
        }
    }

    fn service(api: TestApi) -> NotificationSyncService {
        let guard = Arc::new(TokenGuard::new(Arc::new(TestProvider)));
        NotificationSyncService::new(
            SyncConfig {
                user_id: "operator-1".to_string(),
                ..SyncConfig::default()
            },
            guard,
            Arc::new(api),
            Arc::new(NullDirectory),
            Arc::new(NullSink),
            Some(Arc::new(NullDesktop)),
        )
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.history_page_size, 20);
        assert_eq!(config.dedup_capacity, DEFAULT_DEDUP_CAPACITY);
        assert_eq!(config.heartbeat_interval_ms, 15_000);
        assert_eq!(config.alert_dismiss_ms, 5_000);
        assert!(config.max_reconnect_attempts.is_none());
    }

    #[test]
    fn test_config_deserializes_with_partial_fields() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"endpoint": "wss://x.example/hub", "user_id": "u"}"#).unwrap();
        assert_eq!(config.endpoint, "wss://x.example/hub");
        assert_eq!(config.history_page_size, 20);
    }

    #[tokio::test]
    async fn test_start_primes_history_without_alerts() {
        let mut api = TestApi::new();
        api.unread = 3;
        api.history_rows = vec![
            json!({"id": "h1", "title": "t1", "message": "m1", "createdAt": "2024-05-01T10:00:00Z"}),
            json!({"id": "h2", "title": "t2", "message": "m2", "createdAt": "2024-05-01T11:00:00Z"}),
        ];
        let service = service(api);

        service.start().await.unwrap();

        let stats = service.stats();
        assert_eq!(stats.merged, 2);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.rest_unread, 3);
        assert_eq!(stats.displayed_unread, 3);
        // History is pre-seeded as shown, never alerted.
        assert_eq!(stats.alerts_shown, 2);
        assert_eq!(stats.accepted, 0);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_start_is_ignored() {
        let service = service(TestApi::new());

        service.start().await.unwrap();
        service.start().await.unwrap();

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_mark_read_failure_leaves_store_untouched() {
        let mut api = TestApi::new();
        api.fail_mark_read = true;
        let service = service(api);

        let frame = PushFrame {
            channel: "ReceiveNotification".to_string(),
            payload: json!({"id": "n1", "title": "t", "message": "m"}),
        };
        process_frame(
            frame,
            &service.store,
            &service.fanout,
            &service.templater,
            &service.events_tx,
            &service.counters,
            &service.cancel,
        )
        .await;

        let err = service.mark_read("n1").await.unwrap_err();
        assert!(!err.requires_login());

        let n = service.notification("n1").unwrap();
        assert!(!n.is_read);
        assert_eq!(service.displayed_unread(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_success_flips_record() {
        let service = service(TestApi::new());

        let frame = PushFrame {
            channel: "ReceiveNotification".to_string(),
            payload: json!({"id": "n1", "title": "t", "message": "m"}),
        };
        process_frame(
            frame,
            &service.store,
            &service.fanout,
            &service.templater,
            &service.events_tx,
            &service.counters,
            &service.cancel,
        )
        .await;

        assert!(service.mark_read("n1").await.unwrap());
        assert!(service.notification("n1").unwrap().is_read);
        assert_eq!(service.displayed_unread(), 0);
    }

    #[tokio::test]
    async fn test_clear_resets_collection() {
        let service = service(TestApi::new());

        let frame = PushFrame {
            channel: "ReceiveNotification".to_string(),
            payload: json!({"id": "n1", "title": "t", "message": "m"}),
        };
        process_frame(
            frame,
            &service.store,
            &service.fanout,
            &service.templater,
            &service.events_tx,
            &service.counters,
            &service.cancel,
        )
        .await;
        assert_eq!(service.notifications().len(), 1);

        service.clear();

        assert!(service.notifications().is_empty());
        assert_eq!(service.displayed_unread(), 0);
    }
}
