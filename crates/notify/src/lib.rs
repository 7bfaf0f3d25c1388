//! Real-time notification synchronization for the Agromart operator console.
//!
//! This crate keeps a local notification collection in sync with the backend
//! over two paths: a push channel for live events and REST endpoints for
//! history and unread counts. Payload shape drift, duplicate deliveries, and
//! connection churn are absorbed here so the UI layer only sees one ordered,
//! deduplicated collection.
//!
//! ## Engine
//!
//! - [`NotificationSyncService`] - The facade owning the whole pipeline
//! - [`SyncConfig`] - Engine configuration
//! - [`SyncEvent`] - Broadcast stream of state changes for the UI layer
//! - [`SyncStats`] - Diagnostic counters
//!
//! ## Core Types
//!
//! - [`Notification`] - One normalized notification record
//! - [`NotificationKind`] / [`Severity`] - Domain classification
//! - [`ConnectionState`] - Push channel lifecycle state
//!
//! ## Transport
//!
//! - [`ConnectionManager`] - Managed websocket with reconnect schedule
//! - [`PushProtocol`] / [`HubProtocol`] - Wire protocol seam and default hub
//! - [`TokenGuard`] / [`CredentialProvider`] - Credential refresh gate
//!
//! ## Reconciliation
//!
//! - [`ReconciliationStore`] - Ordered, deduplicated collection
//! - [`DedupRegistry`] - Bounded first-wins id registry
//! - [`normalizer`] - Tolerant payload-to-record mapping
//!
//! ## Presentation
//!
//! - [`AlertFanout`] - At-most-once in-app and desktop alerts
//! - [`MessageTemplater`] - Uuid-to-display-name message resolution
//! - [`presentation`] - Per-kind icon, color, and route hints

pub mod alert;
pub mod api;
pub mod connection;
pub mod dedup;
pub mod error;
pub mod model;
pub mod normalizer;
pub mod presentation;
pub mod protocol;
pub mod service;
pub mod store;
pub mod template;
pub mod token;

pub use alert::{AlertFanout, AlertSink, DesktopNotifier, DesktopPermission};
pub use api::{
    HttpNotificationApi, HttpUserDirectory, NotificationApi, UserDirectory, UserProfile,
};
pub use connection::{ConnectionConfig, ConnectionManager, TransportEvent, reconnect_delay};
pub use dedup::{DEFAULT_DEDUP_CAPACITY, DedupRegistry};
pub use error::{NotifyError, Result};
pub use model::{ConnectionState, Notification, NotificationKind, Severity};
pub use protocol::{EVENT_CHANNELS, HubProtocol, PushFrame, PushProtocol};
pub use service::{NotificationSyncService, SyncConfig, SyncEvent, SyncStats};
pub use store::{ReconciliationStore, RecordSource, StoredNotification};
pub use template::MessageTemplater;
pub use token::{CredentialProvider, TokenGuard, is_expired};
