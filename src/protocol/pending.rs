//! Table of requests awaiting an answer.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use super::callback::ResponseCallback;

/// One outstanding request.
pub struct PendingCall {
    /// Callback to run on answer or timeout
    pub callback: Box<dyn ResponseCallback>,
    /// Message code of the request
    pub msg_code: String,
    /// When the request was registered
    pub created: Instant,
    /// How long to wait for the answer
    pub timeout: Duration,
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("msg_code", &self.msg_code)
            .field("created", &self.created)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PendingCall {
    /// Register a call created now
    pub fn new(callback: Box<dyn ResponseCallback>, msg_code: String, timeout: Duration) -> Self {
        Self {
            callback,
            msg_code,
            created: Instant::now(),
            timeout,
        }
    }

    /// Time since registration
    pub fn elapsed(&self) -> Duration {
        self.created.elapsed()
    }

    /// `now > created + timeout`
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created) > self.timeout
    }
}

/// Concurrent map of pending calls keyed by correlation id.
///
/// Entries are removed before their callback runs; no shard lock is held
/// while a callback executes.
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: DashMap<String, PendingCall>,
}

impl PendingCalls {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call; returns the entry it displaced, if any.
    pub fn insert(&self, msg_id: String, call: PendingCall) -> Option<PendingCall> {
        self.calls.insert(msg_id, call)
    }

    /// Remove the call for an answer.
    pub fn take(&self, msg_id: &str) -> Option<PendingCall> {
        self.calls.remove(msg_id).map(|(_, call)| call)
    }

    /// Remove every call whose timeout has passed.
    pub fn take_expired(&self, now: Instant) -> Vec<(String, PendingCall)> {
        let expired: Vec<String> = self
            .calls
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.calls.remove_if(&id, |_, call| call.is_expired(now)))
            .collect()
    }

    /// Remove every call.
    pub fn drain(&self) -> Vec<(String, PendingCall)> {
        let ids: Vec<String> = self.calls.iter().map(|entry| entry.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.calls.remove(&id))
            .collect()
    }

    /// Whether a call is registered for `msg_id`
    pub fn contains(&self, msg_id: &str) -> bool {
        self.calls.contains_key(msg_id)
    }

    /// Number of pending calls
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no call is pending
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NoActionCallback;

    fn call(timeout_ms: u64) -> PendingCall {
        PendingCall::new(
            Box::new(NoActionCallback),
            "code".into(),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_expired() {
        let table = PendingCalls::new();
        table.insert("short".into(), call(100));
        table.insert("long".into(), call(10_000));

        tokio::time::advance(Duration::from_millis(101)).await;
        let expired = table.take_expired(Instant::now());

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "short");
        assert!(table.contains("long"));
        assert!(!table.contains("short"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_expired_at_exact_deadline() {
        let table = PendingCalls::new();
        table.insert("a".into(), call(100));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(table.take_expired(Instant::now()).is_empty());
    }

    #[test]
    fn test_insert_take_drain() {
        let table = PendingCalls::new();
        assert!(table.insert("a".into(), call(1)).is_none());
        assert!(table.insert("a".into(), call(1)).is_some());
        table.insert("b".into(), call(1));
        assert_eq!(table.len(), 2);

        assert!(table.take("a").is_some());
        assert!(table.take("a").is_none());

        assert_eq!(table.drain().len(), 1);
        assert!(table.is_empty());
    }
}
