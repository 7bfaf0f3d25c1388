//! Notification model types.
//!
//! Canonical record shapes shared by the push channel, the REST history
//! endpoints, and the alert surfaces. Records are produced by the
//! normalizer and are immutable afterwards except for the read flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// New account awaiting approval
    AccountPending,
    /// Farmer certification submitted for review
    CertificationPending,
    /// Auction request awaiting moderation
    AuctionPending,
    /// Withdrawal request awaiting payout
    WithdrawPending,
    /// Dispute or report opened against an auction session
    DisputePending,
    /// Wallet-to-wallet transfer event
    WalletTransfer,
    /// Anything that does not match a known kind
    System,
}

impl Default for NotificationKind {
    fn default() -> Self {
        Self::System
    }
}

impl NotificationKind {
    /// Canonical snake_case name, used for routing and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountPending => "account_pending",
            Self::CertificationPending => "certification_pending",
            Self::AuctionPending => "auction_pending",
            Self::WithdrawPending => "withdraw_pending",
            Self::DisputePending => "dispute_pending",
            Self::WalletTransfer => "wallet_transfer",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visual severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Positive outcome
    Success,
    /// Neutral information
    Info,
    /// Needs attention soon
    Warning,
    /// Something went wrong
    Error,
}

impl Default for Severity {
    fn default() -> Self {
        Self::Info
    }
}

impl Severity {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single canonical notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Stable identifier, synthesized when the source omitted one
    pub id: String,
    /// Kind of notification
    pub kind: NotificationKind,
    /// Visual severity
    pub severity: Severity,
    /// Short headline
    pub title: String,
    /// Body text, may embed raw entity ids until templating resolves them
    pub message: String,
    /// Whether the operator has read this notification
    pub is_read: bool,
    /// When it was read, if ever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    /// Entity the notification points at, used for navigation only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_id: Option<String>,
    /// Type tag of the related entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_type: Option<String>,
    /// Extra payload carried through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Ordering key. Falls back to receipt time when the source omitted it.
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Create a new unread notification with receipt-time ordering.
    pub fn new(id: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NotificationKind::System,
            severity: Severity::Info,
            title: title.into(),
            message: message.into(),
            is_read: false,
            read_at: None,
            related_entity_id: None,
            related_entity_type: None,
            data: None,
            created_at: Utc::now(),
        }
    }

    /// Set the kind.
    pub fn with_kind(mut self, kind: NotificationKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Mark as already read at the given time.
    pub fn with_read_at(mut self, read_at: DateTime<Utc>) -> Self {
        self.is_read = true;
        self.read_at = Some(read_at);
        self
    }

    /// Attach the related entity reference.
    pub fn with_related(
        mut self,
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        self.related_entity_id = Some(entity_id.into());
        self.related_entity_type = Some(entity_type.into());
        self
    }

    /// Attach extra payload data.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Lifecycle state of the push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and none in progress
    Disconnected,
    /// First connection attempt in flight
    Connecting,
    /// Live and receiving events
    Connected,
    /// Connection lost, automatic retries running
    Reconnecting,
}

impl ConnectionState {
    /// Whether a connection exists or is being established.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}
