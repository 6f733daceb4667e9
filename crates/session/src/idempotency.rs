use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use {tokio_util::sync::CancellationToken, tracing::debug};

/// How long a record shields against duplicate sends.
pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 3600);
/// Sweeper cadence.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

struct Record {
    message_id: String,
    created: Instant,
}

/// At-most-once admission for send requests, keyed by a caller-supplied token.
///
/// In-memory by design: the protection targets client retry storms within a
/// short window, and the process-restart gap is accepted. The send handler
/// stores an empty placeholder before sending and upgrades it with the real
/// message id afterwards; first writer wins for the key itself.
pub struct IdempotencyStore {
    records: RwLock<HashMap<String, Record>>,
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl IdempotencyStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns `(existing_message_id, is_duplicate)`.
    ///
    /// An empty key bypasses the store entirely. The check and the insert are
    /// one critical section, so of N racing callers exactly one gets
    /// `is_duplicate = false`.
    pub fn check_and_store(&self, key: &str, message_id: &str) -> (String, bool) {
        if key.is_empty() {
            return (String::new(), false);
        }

        let mut records = self.records.write().unwrap();
        if let Some(record) = records.get(key) {
            debug!(idempotency_key = key, original_message_id = record.message_id, "duplicate send request");
            return (record.message_id.clone(), true);
        }
        records.insert(key.to_string(), Record {
            message_id: message_id.to_string(),
            created: Instant::now(),
        });
        (String::new(), false)
    }

    /// Upgrade the placeholder for `key` with the id assigned by the
    /// upstream. Keeps the original creation time; no-op for unknown keys.
    pub fn record(&self, key: &str, message_id: &str) {
        if key.is_empty() {
            return;
        }
        if let Some(record) = self.records.write().unwrap().get_mut(key) {
            record.message_id = message_id.to_string();
        }
    }

    /// Drop the record for `key`, re-admitting future sends. Used when the
    /// guarded operation failed and never produced a message id.
    pub fn forget(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        self.records.write().unwrap().remove(key);
    }

    /// The stored message id, if any.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.records
            .read()
            .unwrap()
            .get(key)
            .map(|r| r.message_id.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Drop records older than the TTL as seen from `now`. Returns the
    /// number removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut records = self.records.write().unwrap();
        let before = records.len();
        records.retain(|_, r| now.saturating_duration_since(r.created) < IDEMPOTENCY_TTL);
        let removed = before - records.len();
        if removed > 0 {
            debug!(removed, remaining = records.len(), "idempotency sweep completed");
        }
        removed
    }

    /// Run the hourly sweeper until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        store.sweep_at(Instant::now());
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_bypasses() {
        let store = IdempotencyStore::new();
        let (id, duplicate) = store.check_and_store("", "3EB0AAA");
        assert_eq!(id, "");
        assert!(!duplicate);
        assert!(store.is_empty());
    }

    #[test]
    fn first_write_wins_then_duplicates_detected() {
        let store = IdempotencyStore::new();

        let (id, duplicate) = store.check_and_store("K-1", "");
        assert_eq!(id, "");
        assert!(!duplicate);

        store.record("K-1", "3EB0AAA");

        let (id, duplicate) = store.check_and_store("K-1", "");
        assert_eq!(id, "3EB0AAA");
        assert!(duplicate);
    }

    #[test]
    fn forget_readmits_the_key() {
        let store = IdempotencyStore::new();
        store.check_and_store("K-1", "");
        store.forget("K-1");

        let (_, duplicate) = store.check_and_store("K-1", "");
        assert!(!duplicate);
    }

    #[test]
    fn record_ignores_unknown_keys() {
        let store = IdempotencyStore::new();
        store.record("never-stored", "3EB0AAA");
        assert!(store.lookup("never-stored").is_none());
    }

    #[test]
    fn concurrent_callers_get_exactly_one_admission() {
        let store = IdempotencyStore::new();
        let admitted: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let store = &store;
                    scope.spawn(move || !store.check_and_store("K-race", "").1)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(admitted.iter().filter(|a| **a).count(), 1);
    }

    #[test]
    fn sweep_removes_expired_records_only() {
        let store = IdempotencyStore::new();
        store.check_and_store("K-1", "3EB0AAA");

        let now = Instant::now();
        assert_eq!(store.sweep_at(now + IDEMPOTENCY_TTL - Duration::from_secs(60)), 0);
        assert_eq!(store.lookup("K-1").unwrap(), "3EB0AAA");

        assert_eq!(store.sweep_at(now + IDEMPOTENCY_TTL + Duration::from_secs(60)), 1);
        assert!(store.lookup("K-1").is_none());
    }

    #[test]
    fn record_preserves_creation_time() {
        let store = IdempotencyStore::new();
        store.check_and_store("K-1", "");
        let created = Instant::now();

        // Upgrading the placeholder must not extend the TTL.
        store.record("K-1", "3EB0AAA");
        assert_eq!(store.sweep_at(created + IDEMPOTENCY_TTL + Duration::from_secs(60)), 1);
    }
}
