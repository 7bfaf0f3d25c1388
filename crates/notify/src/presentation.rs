//! Presentation mapping.
//!
//! Pure lookup from notification kind to the icon, accent color, and
//! navigation target the console renders. Routing prefers a narrower view
//! when the record identifies one.

use serde::Serialize;
use serde_json::Value;

use crate::model::{Notification, NotificationKind};

/// Render hints for one notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Presentation {
    pub icon: &'static str,
    pub color: &'static str,
    /// Kind-level navigation target. `None` for notifications that do not
    /// lead anywhere.
    pub target: Option<&'static str>,
}

/// Render hints for a notification kind.
pub fn presentation(kind: NotificationKind) -> Presentation {
    match kind {
        NotificationKind::AccountPending => Presentation {
            icon: "user-plus",
            color: "#3498db",
            target: Some("/accounts/pending"),
        },
        NotificationKind::CertificationPending => Presentation {
            icon: "award",
            color: "#9b59b6",
            target: Some("/certifications/pending"),
        },
        NotificationKind::AuctionPending => Presentation {
            icon: "gavel",
            color: "#f39c12",
            target: Some("/auctions/pending"),
        },
        NotificationKind::WithdrawPending => Presentation {
            icon: "banknote",
            color: "#16a085",
            target: Some("/withdrawals/pending"),
        },
        NotificationKind::DisputePending => Presentation {
            icon: "shield-alert",
            color: "#e74c3c",
            target: Some("/disputes"),
        },
        NotificationKind::WalletTransfer => Presentation {
            icon: "wallet",
            color: "#2ecc71",
            target: Some("/wallet/transfers"),
        },
        NotificationKind::System => Presentation {
            icon: "bell",
            color: "#95a5a6",
            target: None,
        },
    }
}

/// Navigation target for a specific notification.
///
/// A dispute report carrying a session id routes to the report list
/// filtered to that auction session; everything else falls back to the
/// kind-level target.
pub fn route(notification: &Notification) -> Option<String> {
    if notification.kind == NotificationKind::DisputePending
        && is_report(notification)
        && let Some(session_id) = report_session_id(notification)
    {
        return Some(format!("/disputes/reports?sessionId={session_id}"));
    }
    presentation(notification.kind).target.map(str::to_string)
}

fn is_report(notification: &Notification) -> bool {
    notification
        .related_entity_type
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("report"))
}

fn report_session_id(notification: &Notification) -> Option<String> {
    let data = notification.data.as_ref()?;
    ["sessionId", "SessionId", "auctionSessionId", "AuctionSessionId"]
        .iter()
        .find_map(|key| data.get(key))
        .and_then(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
