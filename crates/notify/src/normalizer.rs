//! Payload normalization.
//!
//! The backend emits notification payloads in several shapes: PascalCase or
//! camelCase field names, numeric or string-coded enums, ids present or
//! missing. [`normalize`] turns any of them into a canonical
//! [`Notification`] or rejects the payload outright. Rejection is the only
//! quality gate in the engine, nothing downstream re-validates.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

use crate::model::{Notification, NotificationKind, Severity};

/// Field name candidates, probed in declaration order. First non-null wins.
const ID_FIELDS: &[&str] = &["id", "Id", "ID", "notificationId", "NotificationId"];
const TITLE_FIELDS: &[&str] = &["title", "Title"];
const MESSAGE_FIELDS: &[&str] = &["message", "Message", "content", "Content", "body", "Body"];
const KIND_FIELDS: &[&str] = &[
    "type",
    "Type",
    "notificationType",
    "NotificationType",
    "kind",
    "Kind",
];
const SEVERITY_FIELDS: &[&str] = &["severity", "Severity", "level", "Level"];
const IS_READ_FIELDS: &[&str] = &["isRead", "IsRead", "read", "Read"];
const READ_AT_FIELDS: &[&str] = &["readAt", "ReadAt"];
const CREATED_AT_FIELDS: &[&str] = &[
    "createdAt",
    "CreatedAt",
    "createdDate",
    "CreatedDate",
    "timestamp",
    "Timestamp",
];
const RELATED_ID_FIELDS: &[&str] = &["relatedEntityId", "RelatedEntityId", "relatedId", "RelatedId"];
const RELATED_TYPE_FIELDS: &[&str] = &["relatedEntityType", "RelatedEntityType"];
const DATA_FIELDS: &[&str] = &["data", "Data", "payload", "Payload"];

/// Numeric `type` codes in backend enum order. Codes past the end fall back
/// to [`NotificationKind::System`].
const KIND_CODES: &[NotificationKind] = &[
    NotificationKind::AccountPending,
    NotificationKind::CertificationPending,
    NotificationKind::AuctionPending,
    NotificationKind::WithdrawPending,
    NotificationKind::DisputePending,
    NotificationKind::WalletTransfer,
    NotificationKind::System,
];

/// Keyword fragments matched case-insensitively against string-coded `type`
/// values, probed in declaration order.
const KIND_KEYWORDS: &[(&str, NotificationKind)] = &[
    ("account", NotificationKind::AccountPending),
    ("signup", NotificationKind::AccountPending),
    ("register", NotificationKind::AccountPending),
    ("certif", NotificationKind::CertificationPending),
    ("auction", NotificationKind::AuctionPending),
    ("withdraw", NotificationKind::WithdrawPending),
    ("dispute", NotificationKind::DisputePending),
    ("report", NotificationKind::DisputePending),
    ("wallet", NotificationKind::WalletTransfer),
    ("transfer", NotificationKind::WalletTransfer),
];

/// Numeric `severity` codes in backend enum order.
const SEVERITY_CODES: &[Severity] = &[
    Severity::Success,
    Severity::Info,
    Severity::Warning,
    Severity::Error,
];

const SEVERITY_KEYWORDS: &[(&str, Severity)] = &[
    ("success", Severity::Success),
    ("info", Severity::Info),
    ("warn", Severity::Warning),
    ("error", Severity::Error),
    ("fail", Severity::Error),
    ("danger", Severity::Error),
];

/// Normalize one raw payload into a canonical notification.
///
/// Returns `None` when no non-empty title or message can be found; such
/// payloads never enter the store. Every other defect degrades gracefully:
/// missing ids are synthesized, unknown kinds become
/// [`NotificationKind::System`], unknown severities become
/// [`Severity::Info`], and a missing timestamp falls back to receipt time.
pub fn normalize(raw: &Value) -> Option<Notification> {
    let title = string_field(raw, TITLE_FIELDS).unwrap_or_default();
    let message = string_field(raw, MESSAGE_FIELDS).unwrap_or_default();
    if title.is_empty() || message.is_empty() {
        warn!("Dropping notification payload without title or message");
        return None;
    }

    let id = string_field(raw, ID_FIELDS)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(synthesize_id);
    let kind = field(raw, KIND_FIELDS)
        .map(kind_from_value)
        .unwrap_or(NotificationKind::System);
    let severity = field(raw, SEVERITY_FIELDS)
        .map(severity_from_value)
        .unwrap_or(Severity::Info);
    let read_at = timestamp_field(raw, READ_AT_FIELDS);
    let is_read = bool_field(raw, IS_READ_FIELDS).unwrap_or(false) || read_at.is_some();
    let created_at = timestamp_field(raw, CREATED_AT_FIELDS).unwrap_or_else(Utc::now);

    Some(Notification {
        id,
        kind,
        severity,
        title,
        message,
        is_read,
        read_at,
        related_entity_id: string_field(raw, RELATED_ID_FIELDS).filter(|s| !s.is_empty()),
        related_entity_type: string_field(raw, RELATED_TYPE_FIELDS).filter(|s| !s.is_empty()),
        data: field(raw, DATA_FIELDS).cloned(),
        created_at,
    })
}

/// Map a raw `type` value to a kind. Unknown values become `System`.
pub fn kind_from_value(value: &Value) -> NotificationKind {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|code| KIND_CODES.get(code as usize))
            .copied()
            .unwrap_or(NotificationKind::System),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(code) = trimmed.parse::<usize>() {
                return KIND_CODES.get(code).copied().unwrap_or(NotificationKind::System);
            }
            kind_from_keywords(trimmed)
        }
        _ => NotificationKind::System,
    }
}

/// Map a raw `severity` value. Unknown values become `Info`.
pub fn severity_from_value(value: &Value) -> Severity {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|code| SEVERITY_CODES.get(code as usize))
            .copied()
            .unwrap_or(Severity::Info),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(code) = trimmed.parse::<usize>() {
                return SEVERITY_CODES.get(code).copied().unwrap_or(Severity::Info);
            }
            severity_from_keywords(trimmed)
        }
        _ => Severity::Info,
    }
}

/// Synthesize a stable-enough id for payloads that arrived without one.
pub fn synthesize_id() -> String {
    format!(
        "local-{}-{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

fn kind_from_keywords(input: &str) -> NotificationKind {
    let lower = input.to_ascii_lowercase();
    for (needle, kind) in KIND_KEYWORDS {
        if lower.contains(needle) {
            return *kind;
        }
    }
    NotificationKind::System
}

fn severity_from_keywords(input: &str) -> Severity {
    let lower = input.to_ascii_lowercase();
    for (needle, severity) in SEVERITY_KEYWORDS {
        if lower.contains(needle) {
            return *severity;
        }
    }
    Severity::Info
}

fn field<'a>(raw: &'a Value, candidates: &[&str]) -> Option<&'a Value> {
    candidates
        .iter()
        .filter_map(|name| raw.get(name))
        .find(|value| !value.is_null())
}

fn string_field(raw: &Value, candidates: &[&str]) -> Option<String> {
    field(raw, candidates).and_then(|value| match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn bool_field(raw: &Value, candidates: &[&str]) -> Option<bool> {
    field(raw, candidates).and_then(|value| match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn timestamp_field(raw: &Value, candidates: &[&str]) -> Option<DateTime<Utc>> {
    field(raw, candidates).and_then(parse_timestamp)
}

/// Parse a timestamp value in any of the shapes the backend is known to
/// emit: RFC 3339, a naive datetime without offset, or an epoch number in
/// seconds or milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
                return Some(dt.with_timezone(&Utc));
            }
            // Naive datetimes are produced by backends serializing without
            // an offset; they are documented to be UTC.
            chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        }
        Value::Number(n) => {
            let epoch = n.as_i64()?;
            if epoch > 20_000_000_000 {
                Utc.timestamp_millis_opt(epoch).single()
            } else {
                Utc.timestamp_opt(epoch, 0).single()
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_camel_case_payload() {
        let raw = json!({
            "id": "n-1",
            "title": "New account",
            "message": "A buyer account is awaiting approval",
            "type": 0,
            "severity": 1,
            "isRead": false,
            "createdAt": "2024-05-01T10:00:00Z",
        });

        let n = normalize(&raw).unwrap();
        assert_eq!(n.id, "n-1");
        assert_eq!(n.kind, NotificationKind::AccountPending);
        assert_eq!(n.severity, Severity::Info);
        assert!(!n.is_read);
        assert_eq!(n.created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_pascal_case_payload() {
        let raw = json!({
            "Id": "n-2",
            "Title": "Withdrawal requested",
            "Content": "Payout of 1500 requested",
            "NotificationType": "WithdrawRequestCreated",
            "Severity": "warning",
            "IsRead": true,
            "CreatedDate": "2024-05-01T10:00:00",
        });

        let n = normalize(&raw).unwrap();
        assert_eq!(n.id, "n-2");
        assert_eq!(n.kind, NotificationKind::WithdrawPending);
        assert_eq!(n.severity, Severity::Warning);
        assert!(n.is_read);
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(kind_from_value(&json!(2)), NotificationKind::AuctionPending);
        assert_eq!(kind_from_value(&json!("2")), NotificationKind::AuctionPending);
        assert_eq!(
            kind_from_value(&json!("AuctionCreated")),
            NotificationKind::AuctionPending
        );
        assert_eq!(
            kind_from_value(&json!("ReportOpened")),
            NotificationKind::DisputePending
        );
        assert_eq!(kind_from_value(&json!(99)), NotificationKind::System);
        assert_eq!(kind_from_value(&json!("whatever")), NotificationKind::System);
        assert_eq!(kind_from_value(&json!(null)), NotificationKind::System);
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(severity_from_value(&json!(0)), Severity::Success);
        assert_eq!(severity_from_value(&json!("Error")), Severity::Error);
        assert_eq!(severity_from_value(&json!("paymentFailed")), Severity::Error);
        assert_eq!(severity_from_value(&json!("unknown")), Severity::Info);
    }

    #[test]
    fn test_missing_id_is_synthesized() {
        let raw = json!({
            "title": "Ping",
            "message": "No id on this one",
        });

        let a = normalize(&raw).unwrap();
        let b = normalize(&raw).unwrap();
        assert!(a.id.starts_with("local-"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_empty_title_is_rejected() {
        let raw = json!({
            "id": "n-3",
            "title": "",
            "message": "Body without a headline",
        });
        assert!(normalize(&raw).is_none());
    }

    #[test]
    fn test_missing_message_is_rejected() {
        let raw = json!({
            "id": "n-4",
            "title": "Headline without a body",
        });
        assert!(normalize(&raw).is_none());

        let raw = json!({
            "id": "n-5",
            "title": "Headline",
            "message": "   ",
        });
        assert!(normalize(&raw).is_none());
    }

    #[test]
    fn test_non_object_payload_is_rejected() {
        assert!(normalize(&json!("plain string")).is_none());
        assert!(normalize(&json!(42)).is_none());
        assert!(normalize(&json!(null)).is_none());
    }

    #[test]
    fn test_missing_created_at_falls_back_to_now() {
        let before = Utc::now();
        let n = normalize(&json!({"title": "t", "message": "m"})).unwrap();
        let after = Utc::now();

        assert!(n.created_at >= before && n.created_at <= after);
    }

    #[test]
    fn test_epoch_timestamps() {
        let n = normalize(&json!({
            "title": "t",
            "message": "m",
            "createdAt": 1714557600,
        }))
        .unwrap();
        assert_eq!(n.created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");

        let n = normalize(&json!({
            "title": "t",
            "message": "m",
            "createdAt": 1714557600000i64,
        }))
        .unwrap();
        assert_eq!(n.created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_read_at_implies_read() {
        let n = normalize(&json!({
            "title": "t",
            "message": "m",
            "readAt": "2024-05-01T10:00:00Z",
        }))
        .unwrap();
        assert!(n.is_read);
        assert!(n.read_at.is_some());
    }

    #[test]
    fn test_related_entity_and_data_carried_through() {
        let n = normalize(&json!({
            "title": "Report opened",
            "message": "A report was opened",
            "relatedEntityId": "r-1",
            "relatedEntityType": "report",
            "data": {"sessionId": "s-9"},
        }))
        .unwrap();
        assert_eq!(n.related_entity_id.as_deref(), Some("r-1"));
        assert_eq!(n.related_entity_type.as_deref(), Some("report"));
        assert_eq!(n.data.unwrap()["sessionId"], "s-9");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            #[test]
            fn normalize_never_panics_on_arbitrary_strings(
                title in ".*",
                message in ".*",
                kind in ".*",
            ) {
                let raw = json!({"title": title, "message": message, "type": kind});
                let _ = normalize(&raw);
            }

            #[test]
            fn normalized_records_always_have_title_and_message(
                title in "[a-zA-Z0-9 ]{0,30}",
                message in "[a-zA-Z0-9 ]{0,30}",
            ) {
                let raw = json!({"title": title, "message": message});
                if let Some(n) = normalize(&raw) {
                    prop_assert!(!n.title.is_empty());
                    prop_assert!(!n.message.is_empty());
                }
            }

            #[test]
            fn unknown_kind_codes_map_to_system(code in 7u64..10_000) {
                prop_assert_eq!(kind_from_value(&json!(code)), NotificationKind::System);
            }
        }
    }
}
