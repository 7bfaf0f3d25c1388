//! Reconciliation store.
//!
//! Single owner of the merged notification collection. Push-delivered
//! records and REST history rows land here through the shared dedup
//! registry, so an id is only ever admitted once no matter which path
//! carried it. Views are always ordered newest first.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::dedup::DedupRegistry;
use crate::model::Notification;

/// Where a stored record arrived from. Push is assumed fresher and wins
/// ordering ties against history rows with the same timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordSource {
    Push,
    Rest,
}

/// A notification plus its arrival bookkeeping.
#[derive(Debug, Clone)]
pub struct StoredNotification {
    pub notification: Notification,
    pub source: RecordSource,
    seq: u64,
}

struct StoreInner {
    records: Vec<StoredNotification>,
    /// Message overlays from async templating, keyed by notification id.
    /// The canonical record keeps the original text.
    resolved: FxHashMap<String, String>,
    next_seq: u64,
    /// Unread from push events accepted this session.
    live_unread: u64,
    /// Unread as last reported by the REST endpoint. Stale by design once
    /// live activity starts.
    rest_unread: u64,
}

/// Merged store for push and history notifications.
pub struct ReconciliationStore {
    dedup: DedupRegistry,
    inner: RwLock<StoreInner>,
}

impl ReconciliationStore {
    /// Create a store whose dedup registry remembers `dedup_capacity` ids.
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            dedup: DedupRegistry::new(dedup_capacity),
            inner: RwLock::new(StoreInner {
                records: Vec::new(),
                resolved: FxHashMap::default(),
                next_seq: 0,
                live_unread: 0,
                rest_unread: 0,
            }),
        }
    }

    /// Insert a push-delivered notification.
    ///
    /// Returns `false` when the id was already accepted; duplicates leave
    /// the collection and the unread counter untouched.
    pub fn ingest(&self, notification: Notification) -> bool {
        if !self.dedup.accept(&notification.id) {
            debug!(id = %notification.id, "Duplicate notification ignored");
            return false;
        }

        let mut inner = self.inner.write();
        if !notification.is_read {
            inner.live_unread += 1;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.records.push(StoredNotification {
            notification,
            source: RecordSource::Push,
            seq,
        });
        sort_records(&mut inner.records);
        true
    }

    /// Union history rows into the collection.
    ///
    /// Rows whose id was seen before are skipped, so history never
    /// overwrites a push-delivered record. Returns how many rows were new.
    pub fn merge_history(&self, items: Vec<Notification>) -> usize {
        let mut inner = self.inner.write();
        let mut added = 0;
        for notification in items {
            if !self.dedup.accept(&notification.id) {
                continue;
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.records.push(StoredNotification {
                notification,
                source: RecordSource::Rest,
                seq,
            });
            added += 1;
        }
        if added > 0 {
            sort_records(&mut inner.records);
        }
        added
    }

    /// Snapshot of the collection, newest first, with resolved message
    /// overlays applied.
    pub fn ordered_view(&self) -> Vec<StoredNotification> {
        let inner = self.inner.read();
        inner
            .records
            .iter()
            .map(|record| {
                let mut record = record.clone();
                if let Some(resolved) = inner.resolved.get(&record.notification.id) {
                    record.notification.message = resolved.clone();
                }
                record
            })
            .collect()
    }

    /// Look up one notification with its overlay applied.
    pub fn get(&self, id: &str) -> Option<Notification> {
        let inner = self.inner.read();
        inner
            .records
            .iter()
            .find(|record| record.notification.id == id)
            .map(|record| {
                let mut notification = record.notification.clone();
                if let Some(resolved) = inner.resolved.get(id) {
                    notification.message = resolved.clone();
                }
                notification
            })
    }

    /// Record the resolved message text for an id.
    ///
    /// Returns `false` when the id is not in the collection.
    pub fn set_resolved_message(&self, id: &str, message: impl Into<String>) -> bool {
        let mut inner = self.inner.write();
        if !inner.records.iter().any(|r| r.notification.id == id) {
            return false;
        }
        inner.resolved.insert(id.to_string(), message.into());
        true
    }

    /// Unread total shown to the operator.
    ///
    /// Live counter first, REST count as the cold-start fallback. A live
    /// counter that drained back to zero falls back to the possibly stale
    /// REST value; kept as observed in production.
    pub fn displayed_unread(&self) -> u64 {
        let inner = self.inner.read();
        if inner.live_unread > 0 {
            inner.live_unread
        } else {
            inner.rest_unread
        }
    }

    /// Live unread accepted this session.
    pub fn live_unread(&self) -> u64 {
        self.inner.read().live_unread
    }

    /// Unread as last reported by the REST endpoint.
    pub fn rest_unread(&self) -> u64 {
        self.inner.read().rest_unread
    }

    /// Overwrite the REST unread count.
    pub fn set_rest_unread(&self, count: u64) {
        self.inner.write().rest_unread = count;
    }

    /// Flip one record to read. Call only after the backend acknowledged
    /// the mark-read request. Returns `false` for unknown ids.
    pub fn mark_read(&self, id: &str, read_at: DateTime<Utc>) -> bool {
        let mut inner = self.inner.write();
        let Some(record) = inner
            .records
            .iter_mut()
            .find(|r| r.notification.id == id)
        else {
            return false;
        };
        if record.notification.is_read {
            return true;
        }
        record.notification.is_read = true;
        record.notification.read_at = Some(read_at);
        inner.live_unread = inner.live_unread.saturating_sub(1);
        true
    }

    /// Flip every record to read and zero both unread counters.
    ///
    /// Returns how many records were flipped.
    pub fn mark_all_read(&self, read_at: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write();
        let mut flipped = 0;
        for record in &mut inner.records {
            if !record.notification.is_read {
                record.notification.is_read = true;
                record.notification.read_at = Some(read_at);
                flipped += 1;
            }
        }
        inner.live_unread = 0;
        inner.rest_unread = 0;
        flipped
    }

    /// Number of stored notifications.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record, counter and remembered id.
    pub fn clear(&self) {
        self.dedup.clear();
        let mut inner = self.inner.write();
        inner.records.clear();
        inner.resolved.clear();
        inner.live_unread = 0;
        inner.rest_unread = 0;
    }
}

/// Newest first; push beats history on equal timestamps; arrival order
/// breaks the remaining ties.
fn sort_records(records: &mut [StoredNotification]) {
    records.sort_by(|a, b| {
        b.notification
            .created_at
            .cmp(&a.notification.created_at)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.seq.cmp(&b.seq))
    });
}
