//! Alert fan-out.
//!
//! Turns freshly accepted notifications into operator-visible alerts: an
//! in-app toast and, when permitted, a desktop notification. A dedicated
//! shown-registry guarantees at most one visible alert per notification id
//! no matter how many delivery paths fire for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::dedup::DedupRegistry;
use crate::error::Result;
use crate::model::{Notification, NotificationKind};
use crate::store::StoredNotification;
use crate::template::MessageTemplater;

/// Desktop alerting permission as reported by the OS surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopPermission {
    Granted,
    Denied,
    Undecided,
}

/// In-app alert surface (transient toasts).
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Show a transient alert that auto-dismisses after `dismiss_after`.
    async fn show(&self, notification: &Notification, dismiss_after: Duration) -> Result<()>;
}

/// OS-level notification surface.
#[async_trait]
pub trait DesktopNotifier: Send + Sync {
    /// Current permission state.
    async fn permission(&self) -> DesktopPermission;

    /// Ask the user for permission. Resolves to the decided state.
    async fn request_permission(&self) -> DesktopPermission;

    /// Show a desktop notification. A `tag` equal to an earlier one
    /// replaces that notification instead of stacking a second copy.
    async fn show(&self, notification: &Notification, tag: &str) -> Result<()>;
}

/// Fan-out coordinator for in-app and desktop alerts.
pub struct AlertFanout {
    sink: Arc<dyn AlertSink>,
    desktop: Option<Arc<dyn DesktopNotifier>>,
    templater: Arc<MessageTemplater>,
    shown: DedupRegistry,
    permission_requested: AtomicBool,
    dismiss_after: Duration,
}

impl AlertFanout {
    pub fn new(
        sink: Arc<dyn AlertSink>,
        desktop: Option<Arc<dyn DesktopNotifier>>,
        templater: Arc<MessageTemplater>,
        shown_capacity: usize,
        dismiss_after: Duration,
    ) -> Self {
        Self {
            sink,
            desktop,
            templater,
            shown: DedupRegistry::new(shown_capacity),
            permission_requested: AtomicBool::new(false),
            dismiss_after,
        }
    }

    /// Mark ids as already shown so they never alert.
    ///
    /// Called with history ids on mount: only notifications accepted after
    /// the subscriber is live are eligible for alerts.
    pub fn seed<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            self.shown.accept(id);
        }
    }

    /// Number of ids marked as shown.
    pub fn shown_len(&self) -> usize {
        self.shown.len()
    }

    /// Show alerts for a notification unless its id was already shown.
    pub async fn maybe_alert(&self, notification: &Notification) {
        if !self.shown.accept(&notification.id) {
            return;
        }

        let mut rendered = notification.clone();
        rendered.message = match notification.kind {
            NotificationKind::WithdrawPending => {
                self.templater.resolve_withdrawal(&notification.message).await
            }
            _ => self.templater.resolve(&notification.message).await,
        };

        if let Err(e) = self.sink.show(&rendered, self.dismiss_after).await {
            warn!(id = %rendered.id, error = %e, "In-app alert failed");
        }

        self.desktop_alert(&rendered).await;
    }

    /// Re-scan the collection and alert any unread record not yet shown.
    ///
    /// Backup path for deliveries that bypassed the per-event callback; the
    /// shown-registry keeps this from double-alerting.
    pub async fn sweep(&self, view: &[StoredNotification]) {
        for record in view {
            if record.notification.is_read || self.shown.contains(&record.notification.id) {
                continue;
            }
            self.maybe_alert(&record.notification).await;
        }
    }

    /// Forget every shown id and the per-session permission request.
    pub fn clear(&self) {
        self.shown.clear();
        self.permission_requested.store(false, Ordering::SeqCst);
    }

    async fn desktop_alert(&self, notification: &Notification) {
        let Some(desktop) = self.desktop.as_ref() else {
            return;
        };

        let permission = match desktop.permission().await {
            DesktopPermission::Granted => DesktopPermission::Granted,
            DesktopPermission::Denied => return,
            DesktopPermission::Undecided => {
                if self.permission_requested.swap(true, Ordering::SeqCst) {
                    // Someone already asked this session and no grant has
                    // landed yet, this one stays in-app only.
                    return;
                }
                // Only useful if the decision arrives while the alert is
                // still relevant.
                match tokio::time::timeout(self.dismiss_after, desktop.request_permission()).await {
                    Ok(decided) => decided,
                    Err(_) => {
                        debug!("Desktop permission not decided in time");
                        return;
                    }
                }
            }
        };

        if permission != DesktopPermission::Granted {
            return;
        }

        // The id doubles as the tag so a re-shown notification replaces
        // itself instead of stacking.
        if let Err(e) = desktop.show(notification, &notification.id).await {
            warn!(id = %notification.id, error = %e, "Desktop alert failed");
        }
    }
}
