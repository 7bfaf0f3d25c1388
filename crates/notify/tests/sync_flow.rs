//! End-to-end tests for the notification synchronization engine.
//!
//! These drive a full [`NotificationSyncService`] with mock REST and
//! directory collaborators, injecting push frames through the transport
//! seam instead of a live websocket.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast};
use tokio::time::timeout;

use agromart_notify::alert::AlertSink;
use agromart_notify::api::{NotificationApi, UserDirectory};
use agromart_notify::connection::TransportEvent;
use agromart_notify::protocol::PushFrame;
use agromart_notify::token::{CredentialProvider, TokenGuard};
use agromart_notify::{
    ConnectionState, Notification, NotificationSyncService, NotifyError, Result, SyncConfig,
    SyncEvent,
};

const USER_A: &str = "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d";
const WITHDRAWAL_1: &str = "11111111-2222-4333-8444-555555555555";

struct MockProvider;

#[async_trait]
impl CredentialProvider for MockProvider {
    async fn access_token(&self) -> Option<String> {
        None
    }

    async fn refresh(&self) -> Result<Option<String>> {
        Ok(Some("header.payload.sig".to_string()))
    }
}

#[derive(Default)]
struct MockApi {
    history_rows: Vec<Value>,
    unread: AtomicU64,
    fail_mark_read: bool,
}

impl MockApi {
    fn with_history(mut self, rows: Vec<Value>) -> Self {
        self.history_rows = rows;
        self
    }

    fn with_unread(self, count: u64) -> Self {
        self.unread.store(count, Ordering::SeqCst);
        self
    }

    fn set_unread(&self, count: u64) {
        self.unread.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationApi for MockApi {
    async fn history(&self, _user_id: &str, _page: u32, _page_size: u32) -> Result<Vec<Value>> {
        Ok(self.history_rows.clone())
    }

    async fn unread_count(&self, _user_id: &str) -> Result<u64> {
        Ok(self.unread.load(Ordering::SeqCst))
    }

    async fn mark_read(&self, _id: &str, _user_id: &str) -> Result<bool> {
        if self.fail_mark_read {
            return Err(NotifyError::api(500, "mark-read unavailable"));
        }
        Ok(true)
    }

    async fn mark_all_read(&self, _user_id: &str) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Default)]
struct MockDirectory {
    names: HashMap<String, String>,
    owners: HashMap<String, String>,
}

#[async_trait]
impl UserDirectory for MockDirectory {
    async fn display_name(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.names.get(user_id).cloned())
    }

    async fn withdrawal_owner(&self, withdrawal_id: &str) -> Result<Option<String>> {
        Ok(self.owners.get(withdrawal_id).cloned())
    }
}

#[derive(Default)]
struct RecordingSink {
    shown: Mutex<Vec<String>>,
}

impl RecordingSink {
    async fn ids(&self) -> Vec<String> {
        self.shown.lock().await.clone()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn show(&self, notification: &Notification, _dismiss_after: Duration) -> Result<()> {
        self.shown.lock().await.push(notification.id.clone());
        Ok(())
    }
}

/// Build a service wired to mocks. The endpoint is left empty so the
/// managed websocket gives up immediately; frames are injected through
/// [`NotificationSyncService::transport_sender`] instead.
fn build_service(
    api: Arc<MockApi>,
    directory: MockDirectory,
    sink: Arc<RecordingSink>,
) -> NotificationSyncService {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let guard = Arc::new(TokenGuard::new(Arc::new(MockProvider)));
    NotificationSyncService::new(
        SyncConfig {
            user_id: "operator-1".to_string(),
            ..SyncConfig::default()
        },
        guard,
        api,
        Arc::new(directory),
        sink,
        None,
    )
}

fn history_row(id: &str, created_at: &str) -> Value {
    json!({
        "id": id,
        "title": format!("title {id}"),
        "message": format!("message {id}"),
        "createdAt": created_at,
    })
}

async fn push(service: &NotificationSyncService, payload: Value) {
    service
        .transport_sender()
        .send(TransportEvent::Frame(PushFrame {
            channel: "ReceiveNotification".to_string(),
            payload,
        }))
        .await
        .expect("transport channel closed");
}

async fn next_event(rx: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

/// Collect events until `id` is received, inclusive.
async fn events_until_received(
    rx: &mut broadcast::Receiver<SyncEvent>,
    id: &str,
) -> Vec<SyncEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = matches!(&event, SyncEvent::Received(n) if n.id == id);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

async fn wait_for_received(rx: &mut broadcast::Receiver<SyncEvent>, id: &str) -> Notification {
    loop {
        if let SyncEvent::Received(n) = next_event(rx).await
            && n.id == id
        {
            return n;
        }
    }
}

async fn wait_for_resolved(rx: &mut broadcast::Receiver<SyncEvent>, id: &str) -> String {
    loop {
        if let SyncEvent::MessageResolved { id: got, message } = next_event(rx).await
            && got == id
        {
            return message;
        }
    }
}

async fn wait_for_unread(rx: &mut broadcast::Receiver<SyncEvent>, expected: u64) {
    loop {
        if let SyncEvent::UnreadChanged(count) = next_event(rx).await
            && count == expected
        {
            return;
        }
    }
}

async fn wait_for_state(rx: &mut broadcast::Receiver<SyncEvent>, expected: ConnectionState) {
    loop {
        if let SyncEvent::ConnectionChanged(state) = next_event(rx).await
            && state == expected
        {
            return;
        }
    }
}

mod merge_tests {
    use super::*;

    #[tokio::test]
    async fn test_history_and_push_interleave_newest_first() {
        let api = Arc::new(MockApi::default().with_history(vec![
            history_row("t1", "2024-05-01T10:00:00Z"),
            history_row("t3", "2024-05-01T12:00:00Z"),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let service = build_service(api, MockDirectory::default(), sink);
        let mut rx = service.subscribe();

        service.start().await.expect("start failed");
        push(
            &service,
            json!({"id": "t2", "title": "t", "message": "m", "createdAt": "2024-05-01T11:00:00Z"}),
        )
        .await;
        push(
            &service,
            json!({"id": "t4", "title": "t", "message": "m", "createdAt": "2024-05-01T13:00:00Z"}),
        )
        .await;
        wait_for_received(&mut rx, "t4").await;

        let ids: Vec<String> = service
            .notifications()
            .iter()
            .map(|r| r.notification.id.clone())
            .collect();
        assert_eq!(ids, vec!["t4", "t3", "t2", "t1"]);

        let stats = service.stats();
        assert_eq!(stats.merged, 2);
        assert_eq!(stats.accepted, 2);

        service.shutdown().await;
    }
}

mod dedup_tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_delivery_yields_one_record_and_one_alert() {
        let api = Arc::new(MockApi::default());
        let sink = Arc::new(RecordingSink::default());
        let service = build_service(api, MockDirectory::default(), sink.clone());
        let mut rx = service.subscribe();

        service.start().await.expect("start failed");
        let payload = json!({"id": "n1", "title": "t", "message": "m"});
        push(&service, payload.clone()).await;
        push(&service, payload).await;
        push(&service, json!({"id": "n2", "title": "t", "message": "m"})).await;
        wait_for_received(&mut rx, "n2").await;

        assert_eq!(service.notifications().len(), 2);
        assert_eq!(sink.ids().await, vec!["n1", "n2"]);
        assert_eq!(service.stats().duplicates, 1);

        service.shutdown().await;
    }
}

mod unread_tests {
    use super::*;

    #[tokio::test]
    async fn test_rest_count_is_only_a_cold_start_fallback() {
        let api = Arc::new(MockApi::default().with_unread(7));
        let sink = Arc::new(RecordingSink::default());
        let service = build_service(api, MockDirectory::default(), sink);
        let mut rx = service.subscribe();

        service.start().await.expect("start failed");
        wait_for_unread(&mut rx, 7).await;
        assert_eq!(service.displayed_unread(), 7);

        push(&service, json!({"id": "n1", "title": "t", "message": "m"})).await;
        wait_for_unread(&mut rx, 1).await;
        assert_eq!(service.displayed_unread(), 1);

        // Read on arrival, never counted live.
        push(
            &service,
            json!({"id": "n2", "title": "t", "message": "m", "readAt": "2024-05-01T12:00:00Z"}),
        )
        .await;
        wait_for_received(&mut rx, "n2").await;
        assert_eq!(service.displayed_unread(), 1);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_mark_all_read_clears_both_counters() {
        let api = Arc::new(MockApi::default().with_unread(7));
        let sink = Arc::new(RecordingSink::default());
        let service = build_service(api, MockDirectory::default(), sink);
        let mut rx = service.subscribe();

        service.start().await.expect("start failed");
        push(&service, json!({"id": "n1", "title": "t", "message": "m"})).await;
        wait_for_received(&mut rx, "n1").await;

        assert!(service.mark_all_read().await.expect("mark all failed"));
        assert_eq!(service.displayed_unread(), 0);
        assert!(service.notification("n1").expect("n1 missing").is_read);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnect_refetches_the_unread_baseline() {
        let api = Arc::new(MockApi::default().with_unread(2));
        let sink = Arc::new(RecordingSink::default());
        let service = build_service(api.clone(), MockDirectory::default(), sink);
        let mut rx = service.subscribe();

        service.start().await.expect("start failed");
        wait_for_unread(&mut rx, 2).await;

        // Events may have been missed while offline; a fresh baseline is
        // pulled on every (re)connect.
        api.set_unread(9);
        service
            .transport_sender()
            .send(TransportEvent::State(ConnectionState::Connected))
            .await
            .expect("transport channel closed");
        wait_for_unread(&mut rx, 9).await;
        assert_eq!(service.displayed_unread(), 9);

        service.shutdown().await;
    }
}

mod alert_tests {
    use super::*;

    #[tokio::test]
    async fn test_history_rows_never_alert() {
        let api = Arc::new(MockApi::default().with_history(vec![
            history_row("h1", "2024-05-01T10:00:00Z"),
            history_row("h2", "2024-05-01T11:00:00Z"),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let service = build_service(api, MockDirectory::default(), sink.clone());
        let mut rx = service.subscribe();

        service.start().await.expect("start failed");
        assert!(sink.ids().await.is_empty());

        // The growth-triggered sweep now walks a collection holding two
        // unread history rows; only the live push may alert.
        push(&service, json!({"id": "n1", "title": "t", "message": "m"})).await;
        wait_for_received(&mut rx, "n1").await;
        assert_eq!(sink.ids().await, vec!["n1"]);

        service.shutdown().await;
    }
}

mod acknowledge_tests {
    use super::*;

    #[tokio::test]
    async fn test_mark_read_requires_backend_acknowledgement() {
        let api = Arc::new(MockApi {
            fail_mark_read: true,
            ..MockApi::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let service = build_service(api, MockDirectory::default(), sink);
        let mut rx = service.subscribe();

        service.start().await.expect("start failed");
        push(&service, json!({"id": "n1", "title": "t", "message": "m"})).await;
        wait_for_received(&mut rx, "n1").await;

        service.mark_read("n1").await.expect_err("should propagate");

        let n = service.notification("n1").expect("n1 missing");
        assert!(!n.is_read);
        assert_eq!(service.displayed_unread(), 1);

        service.shutdown().await;
    }
}

mod resolve_tests {
    use super::*;

    #[tokio::test]
    async fn test_embedded_user_id_resolves_to_display_name() {
        let directory = MockDirectory {
            names: HashMap::from([(USER_A.to_string(), "Nguyen Van A".to_string())]),
            ..MockDirectory::default()
        };
        let api = Arc::new(MockApi::default());
        let sink = Arc::new(RecordingSink::default());
        let service = build_service(api, directory, sink);
        let mut rx = service.subscribe();

        service.start().await.expect("start failed");
        push(
            &service,
            json!({
                "id": "n1",
                "type": "auction_request",
                "title": "New auction",
                "message": format!("New request from {USER_A}"),
            }),
        )
        .await;

        let original = wait_for_received(&mut rx, "n1").await;
        assert_eq!(original.message, format!("New request from {USER_A}"));

        let resolved = wait_for_resolved(&mut rx, "n1").await;
        assert_eq!(resolved, "New request from Nguyen Van A");
        assert_eq!(
            service.notification("n1").expect("n1 missing").message,
            "New request from Nguyen Van A"
        );

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_withdrawal_message_resolves_through_the_owner() {
        let directory = MockDirectory {
            names: HashMap::from([(USER_A.to_string(), "Tran Thi B".to_string())]),
            owners: HashMap::from([(WITHDRAWAL_1.to_string(), USER_A.to_string())]),
        };
        let api = Arc::new(MockApi::default());
        let sink = Arc::new(RecordingSink::default());
        let service = build_service(api, directory, sink);
        let mut rx = service.subscribe();

        service.start().await.expect("start failed");
        push(
            &service,
            json!({
                "id": "w1",
                "type": "withdraw_request",
                "title": "Withdrawal",
                "message": format!("Withdrawal requested by {WITHDRAWAL_1}"),
            }),
        )
        .await;

        let resolved = wait_for_resolved(&mut rx, "w1").await;
        assert_eq!(resolved, "Withdrawal requested by Tran Thi B");

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_lookup_leaves_message_unchanged() {
        let api = Arc::new(MockApi::default());
        let sink = Arc::new(RecordingSink::default());
        let service = build_service(api, MockDirectory::default(), sink);
        let mut rx = service.subscribe();

        service.start().await.expect("start failed");
        let message = format!("New request from {USER_A}");
        push(
            &service,
            json!({"id": "n1", "title": "t", "message": message.clone()}),
        )
        .await;
        push(&service, json!({"id": "marker", "title": "t", "message": "m"})).await;

        let seen = events_until_received(&mut rx, "marker").await;
        assert!(
            seen.iter()
                .all(|e| !matches!(e, SyncEvent::MessageResolved { .. })),
            "no resolution event expected"
        );
        assert_eq!(
            service.notification("n1").expect("n1 missing").message,
            message
        );

        service.shutdown().await;
    }
}

mod rejection_tests {
    use super::*;

    #[tokio::test]
    async fn test_payload_without_title_never_enters_the_view() {
        let api = Arc::new(MockApi::default());
        let sink = Arc::new(RecordingSink::default());
        let service = build_service(api, MockDirectory::default(), sink);
        let mut rx = service.subscribe();

        service.start().await.expect("start failed");
        push(&service, json!({"id": "bad", "message": "m"})).await;
        push(&service, json!({"id": "marker", "title": "t", "message": "m"})).await;

        let seen = events_until_received(&mut rx, "marker").await;
        assert!(
            seen.iter()
                .all(|e| !matches!(e, SyncEvent::Received(n) if n.id == "bad")),
            "rejected payload must not surface"
        );
        assert_eq!(service.notifications().len(), 1);
        assert_eq!(service.stats().rejected, 1);

        service.shutdown().await;
    }
}

mod connection_tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle_states_reach_subscribers() {
        let api = Arc::new(MockApi::default());
        let sink = Arc::new(RecordingSink::default());
        let service = build_service(api, MockDirectory::default(), sink);
        let mut rx = service.subscribe();

        // The empty endpoint fails URL parsing, so the connection task
        // stops right after announcing itself.
        service.start().await.expect("start failed");
        wait_for_state(&mut rx, ConnectionState::Connecting).await;
        wait_for_state(&mut rx, ConnectionState::Disconnected).await;
        assert_eq!(service.connection_state(), ConnectionState::Disconnected);

        service.shutdown().await;
    }
}
