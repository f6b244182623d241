//! In-memory correlation between conversations and ticket outcomes.
//!
//! Holds the thread and message outcome tables (both expiring after a fixed
//! TTL) together with the queued-message dedup set. Nothing here is durable:
//! after a restart the tables start empty and the recovery scan rebuilds the
//! queue from channel history.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::base::{
    config::Config,
    types::{MessageOutcome, Res, ThreadOutcome, TicketContext},
};

use super::dedup::DedupSet;

/// Anything stored in a TTL table.
trait Expiring {
    fn created_at(&self) -> DateTime<Utc>;
}

impl Expiring for ThreadOutcome {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Expiring for MessageOutcome {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A key-value table whose entries expire `ttl` after their creation.
#[derive(Debug)]
struct TtlTable<V> {
    entries: HashMap<String, V>,
}

impl<V: Expiring + Clone> TtlTable<V> {
    fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    fn is_expired(value: &V, ttl: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(value.created_at()) > ttl
    }

    fn get(&mut self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Option<V> {
        let value = self.entries.get(key)?;

        if Self::is_expired(value, ttl, now) {
            self.entries.remove(key);
            return None;
        }

        Some(value.clone())
    }

    fn get_mut(&mut self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Option<&mut V> {
        if self.entries.get(key).is_some_and(|v| Self::is_expired(v, ttl, now)) {
            self.entries.remove(key);
        }

        self.entries.get_mut(key)
    }

    fn sweep(&mut self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, v| !Self::is_expired(v, ttl, now));
        before - self.entries.len()
    }
}

/// The owned state behind a [`CorrelationStore`].
#[derive(Debug)]
struct CorrelationTables {
    threads: TtlTable<ThreadOutcome>,
    messages: TtlTable<MessageOutcome>,
    queued: DedupSet,
}

/// Correlation store for the intake pipeline.
///
/// It is designed to be trivially cloneable; every clone refers to the same
/// tables. Locks are only held for the duration of a single operation and
/// never across an `.await`.
#[derive(Debug, Clone)]
pub struct CorrelationStore {
    inner: Arc<Mutex<CorrelationTables>>,
    ttl: Duration,
}

impl CorrelationStore {
    pub fn new(ttl: Duration, dedup_capacity: usize, dedup_evict_count: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CorrelationTables {
                threads: TtlTable::new(),
                messages: TtlTable::new(),
                queued: DedupSet::new(dedup_capacity, dedup_evict_count),
            })),
            ttl,
        }
    }

    /// Creates a store sized from the configuration.
    pub fn from_config(config: &Config) -> Res<Self> {
        let ttl = i64::try_from(config.correlation_ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| anyhow::anyhow!("Correlation TTL of {} seconds is out of range.", config.correlation_ttl_secs))?;

        Ok(Self::new(ttl, config.dedup_capacity, config.dedup_evict_count))
    }

    fn lock(&self) -> MutexGuard<'_, CorrelationTables> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Threads.

    pub fn thread(&self, thread_ts: &str) -> Option<ThreadOutcome> {
        self.thread_at(thread_ts, Utc::now())
    }

    pub fn thread_at(&self, thread_ts: &str, now: DateTime<Utc>) -> Option<ThreadOutcome> {
        self.lock().threads.get(thread_ts, self.ttl, now)
    }

    pub fn set_thread(&self, thread_ts: &str, outcome: ThreadOutcome) {
        self.set_thread_at(thread_ts, outcome, Utc::now());
    }

    pub fn set_thread_at(&self, thread_ts: &str, outcome: ThreadOutcome, now: DateTime<Utc>) {
        let mut tables = self.lock();
        tables.threads.entries.insert(thread_ts.to_string(), outcome);
        Self::sweep_tables(&mut tables, self.ttl, now);
    }

    pub fn delete_thread(&self, thread_ts: &str) -> Option<ThreadOutcome> {
        self.lock().threads.entries.remove(thread_ts)
    }

    /// Upgrades a deferred thread in place once it has produced a ticket.
    ///
    /// Returns `false` when there is no live deferred entry for the thread.
    pub fn upgrade_deferred(&self, thread_ts: &str, ticket: &TicketContext) -> bool {
        self.upgrade_deferred_at(thread_ts, ticket, Utc::now())
    }

    pub fn upgrade_deferred_at(&self, thread_ts: &str, ticket: &TicketContext, now: DateTime<Utc>) -> bool {
        let ttl = self.ttl;
        let mut tables = self.lock();

        let Some(outcome) = tables.threads.get_mut(thread_ts, ttl, now) else {
            return false;
        };

        if !outcome.is_deferred {
            return false;
        }

        outcome.ticket_id = ticket.id.clone();
        outcome.ticket_identifier = Some(ticket.identifier.clone());
        outcome.is_deferred = false;

        true
    }

    // Messages.

    pub fn message(&self, ts: &str) -> Option<MessageOutcome> {
        self.message_at(ts, Utc::now())
    }

    pub fn message_at(&self, ts: &str, now: DateTime<Utc>) -> Option<MessageOutcome> {
        self.lock().messages.get(ts, self.ttl, now)
    }

    pub fn set_message(&self, ts: &str, outcome: MessageOutcome) {
        self.set_message_at(ts, outcome, Utc::now());
    }

    pub fn set_message_at(&self, ts: &str, outcome: MessageOutcome, now: DateTime<Utc>) {
        let mut tables = self.lock();
        tables.messages.entries.insert(ts.to_string(), outcome);
        Self::sweep_tables(&mut tables, self.ttl, now);
    }

    pub fn delete_message(&self, ts: &str) -> Option<MessageOutcome> {
        self.lock().messages.entries.remove(ts)
    }

    // Dedup.

    /// Marks a top-level message as queued; returns `false` if it already was.
    pub fn mark_queued(&self, ts: &str) -> bool {
        self.lock().queued.insert(ts)
    }

    pub fn is_queued(&self, ts: &str) -> bool {
        self.lock().queued.contains(ts)
    }

    // Housekeeping.

    /// Removes every expired outcome; returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        Self::sweep_tables(&mut self.lock(), self.ttl, now)
    }

    fn sweep_tables(tables: &mut CorrelationTables, ttl: Duration, now: DateTime<Utc>) -> usize {
        let removed = tables.threads.sweep(ttl, now) + tables.messages.sweep(ttl, now);

        if removed > 0 {
            debug!("Swept {} expired correlation entries.", removed);
        }

        removed
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use crate::base::types::TriageAction;

    use super::*;

    fn store() -> CorrelationStore {
        CorrelationStore::new(Duration::hours(24), 1000, 500)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn ticket(identifier: &str) -> TicketContext {
        TicketContext {
            id: Some(format!("id-{identifier}")),
            identifier: identifier.to_string(),
            url: None,
        }
    }

    #[test]
    fn thread_outcome_expires_after_ttl() {
        let store = store();
        let outcome = ThreadOutcome::ticketed(&ticket("ENG-1"), false, Some("U1".into()), t0());
        store.set_thread_at("100.0", outcome, t0());

        let almost = t0() + Duration::hours(23) + Duration::minutes(59);
        let past = t0() + Duration::hours(24) + Duration::minutes(1);

        assert!(store.thread_at("100.0", almost).is_some());
        assert!(store.thread_at("100.0", past).is_none());
    }

    #[test]
    fn message_outcome_expires_after_ttl() {
        let store = store();
        store.set_message_at("100.0", MessageOutcome::new(TriageAction::Created, Some(&ticket("ENG-2")), t0()), t0());

        assert!(store.message_at("100.0", t0() + Duration::minutes(23 * 60 + 59)).is_some());
        assert!(store.message_at("100.0", t0() + Duration::minutes(24 * 60 + 1)).is_none());
    }

    #[test]
    fn writes_sweep_expired_entries() {
        let store = store();
        store.set_message_at("1.0", MessageOutcome::new(TriageAction::Skipped, None, t0()), t0());
        store.set_thread_at("1.0", ThreadOutcome::deferred("ctx".into(), None, t0()), t0());

        let later = t0() + Duration::hours(25);
        store.set_message_at("2.0", MessageOutcome::new(TriageAction::Skipped, None, later), later);

        let tables = store.lock();
        assert!(!tables.messages.entries.contains_key("1.0"));
        assert!(!tables.threads.entries.contains_key("1.0"));
        assert!(tables.messages.entries.contains_key("2.0"));
    }

    #[test]
    fn deferred_thread_is_upgraded_in_place() {
        let store = store();
        store.set_thread_at("5.0", ThreadOutcome::deferred("Checkout is slow".into(), Some("U9".into()), t0()), t0());

        assert!(store.upgrade_deferred_at("5.0", &ticket("ENG-7"), t0() + Duration::hours(1)));

        let outcome = store.thread_at("5.0", t0() + Duration::hours(1)).unwrap();
        assert!(!outcome.is_deferred);
        assert_eq!(outcome.ticket_identifier.as_deref(), Some("ENG-7"));
        assert_eq!(outcome.ticket_id.as_deref(), Some("id-ENG-7"));
        assert_eq!(outcome.original_context.as_deref(), Some("Checkout is slow"));
        assert_eq!(outcome.original_reporter_id.as_deref(), Some("U9"));
        assert_eq!(outcome.created_at, t0());
    }

    #[test]
    fn upgrade_ignores_ticketed_and_missing_threads() {
        let store = store();
        store.set_thread_at("6.0", ThreadOutcome::ticketed(&ticket("ENG-8"), false, None, t0()), t0());

        assert!(!store.upgrade_deferred_at("6.0", &ticket("ENG-9"), t0()));
        assert!(!store.upgrade_deferred_at("7.0", &ticket("ENG-9"), t0()));
        assert_eq!(store.thread_at("6.0", t0()).unwrap().ticket_identifier.as_deref(), Some("ENG-8"));
    }

    #[test]
    fn clones_share_state() {
        let store = store();
        let other = store.clone();

        assert!(store.mark_queued("9.0"));
        assert!(!other.mark_queued("9.0"));
        assert!(other.is_queued("9.0"));

        other.set_message("9.0", MessageOutcome::new(TriageAction::Created, Some(&ticket("ENG-3")), Utc::now()));
        assert!(store.delete_message("9.0").is_some());
        assert!(other.message("9.0").is_none());
    }

    #[test]
    fn longest_configured_ttl_keeps_entries() {
        let config = Config::from_toml(
            r#"
            slack_app_token = "xapp-test"
            slack_bot_token = "xoxb-test"
            channel_id = "C1"
            triager_endpoint = "http://localhost:8080"
            tracker_api_key = "lin_api_test"
            correlation_ttl_secs = 31536000
            "#,
        )
        .unwrap();
        let store = CorrelationStore::from_config(&config).unwrap();

        store.set_message_at("1.0", MessageOutcome::new(TriageAction::Skipped, None, t0()), t0());

        assert!(store.message_at("1.0", t0() + Duration::days(364)).is_some());
        assert!(store.message_at("1.0", t0() + Duration::days(366)).is_none());
    }
}
