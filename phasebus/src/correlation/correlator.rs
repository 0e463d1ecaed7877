//! The pending call table.

use super::CorrelationKey;
use crate::context::Message;
use crate::errors::{CorrelationError, Fault, FaultKind};
use crate::events::{names, EventSink, NoOpEventSink};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What happens when a key is registered while a call already holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKeyPolicy {
    /// The earlier call fails with `DuplicateCorrelationKey`; the new one is kept.
    #[default]
    ReplaceEarlier,
    /// The new registration is refused.
    RejectNew,
}

type Outcome = Result<Message, Fault>;

/// The resolving half of a pending call.
#[derive(Debug)]
pub struct CallerHandle {
    tx: oneshot::Sender<Outcome>,
}

impl CallerHandle {
    /// Creates a handle and the waiter it resolves.
    #[must_use]
    pub fn pair() -> (Self, ResponseWaiter) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, ResponseWaiter { rx })
    }

    fn resolve(self, outcome: Outcome) -> bool {
        self.tx.send(outcome).is_ok()
    }
}

/// The waiting half of a pending call.
#[derive(Debug)]
pub struct ResponseWaiter {
    rx: oneshot::Receiver<Outcome>,
}

impl ResponseWaiter {
    /// Waits for the call to be resolved.
    ///
    /// # Errors
    ///
    /// Returns the fault the call resolved with, or `Cancelled` if it was
    /// dropped from the table without being resolved.
    pub async fn wait(self) -> Result<Message, Fault> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(Fault::cancelled("Pending call was discarded")))
    }

    /// Returns the outcome if the call has already been resolved.
    pub fn try_take(&mut self) -> Option<Result<Message, Fault>> {
        self.rx.try_recv().ok()
    }
}

struct PendingCall {
    handle: CallerHandle,
    deadline: Instant,
    registered_at: DateTime<Utc>,
}

/// Diagnostic view of a pending call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCallInfo {
    /// The call's key.
    pub key: CorrelationKey,
    /// When the call times out.
    pub deadline: Instant,
    /// When the call was registered.
    pub registered_at: DateTime<Utc>,
}

/// Thread-safe table of calls waiting for a decoupled response.
///
/// Every registered call is resolved exactly once: by [`deliver`], by
/// [`expire`] once its deadline has passed, by [`cancel`], or by a newer
/// registration under the same key. Callers are resolved outside the table lock.
///
/// [`deliver`]: Correlator::deliver
/// [`expire`]: Correlator::expire
/// [`cancel`]: Correlator::cancel
pub struct Correlator {
    pending: Mutex<HashMap<CorrelationKey, PendingCall>>,
    policy: DuplicateKeyPolicy,
    events: Arc<dyn EventSink>,
    misses: AtomicU64,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(DuplicateKeyPolicy::default())
    }
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.len())
            .field("policy", &self.policy)
            .field("misses", &self.misses())
            .finish()
    }
}

impl Correlator {
    /// Creates an empty table.
    #[must_use]
    pub fn new(policy: DuplicateKeyPolicy) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            policy,
            events: Arc::new(NoOpEventSink),
            misses: AtomicU64::new(0),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the duplicate key policy.
    #[must_use]
    pub fn policy(&self) -> DuplicateKeyPolicy {
        self.policy
    }

    /// Registers a call that resolves with `Timeout` unless delivered before `deadline`.
    ///
    /// Expired calls are swept first, so a stale entry never blocks a new one.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` when the key is taken and the policy is `RejectNew`.
    /// The refused handle is dropped, which resolves its waiter as cancelled.
    pub fn register(
        &self,
        key: CorrelationKey,
        handle: CallerHandle,
        deadline: Instant,
    ) -> Result<(), CorrelationError> {
        self.expire(Instant::now());

        let replaced = {
            let mut pending = self.pending.lock();
            if pending.contains_key(&key) && self.policy == DuplicateKeyPolicy::RejectNew {
                warn!(key = %key, "Refusing pending call with a key already in use");
                return Err(CorrelationError::DuplicateKey {
                    key: key.to_string(),
                });
            }
            let replaced = pending.insert(
                key.clone(),
                PendingCall {
                    handle,
                    deadline,
                    registered_at: Utc::now(),
                },
            );
            debug!(key = %key, pending = pending.len(), "Registered pending call");
            replaced
        };

        if let Some(earlier) = replaced {
            warn!(key = %key, "Replacing pending call with the same key");
            earlier.handle.resolve(Err(Fault::new(
                FaultKind::DuplicateCorrelationKey,
                format!("Pending call for '{key}' was replaced by a newer call"),
            )));
            self.events
                .try_emit(names::CALL_REPLACED, Some(json!({ "key": key })));
        }
        self.events
            .try_emit(names::CALL_REGISTERED, Some(json!({ "key": key })));
        Ok(())
    }

    /// Hands a response to the call registered under `key`.
    ///
    /// Returns false if no live call holds the key. Such a response is dropped
    /// and counted as a miss. A call whose deadline has passed resolves with
    /// `Timeout` instead.
    pub fn deliver(&self, key: &CorrelationKey, message: Message) -> bool {
        let entry = self.pending.lock().remove(key);
        let Some(call) = entry else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, "Dropping response with no pending call");
            self.events
                .try_emit(names::CORRELATION_MISS, Some(json!({ "key": key })));
            return false;
        };

        if Instant::now() >= call.deadline {
            debug!(key = %key, "Response arrived after the deadline");
            call.handle.resolve(Err(Fault::timeout(key)));
            self.events
                .try_emit(names::CALL_EXPIRED, Some(json!({ "key": key })));
            return false;
        }

        if call.handle.resolve(Ok(message)) {
            debug!(key = %key, "Delivered response to pending call");
            self.events
                .try_emit(names::CALL_DELIVERED, Some(json!({ "key": key })));
            true
        } else {
            warn!(key = %key, "Caller stopped waiting before the response arrived");
            false
        }
    }

    /// Resolves every call whose deadline is at or before `now` with `Timeout`.
    ///
    /// Returns the expired keys, sorted.
    pub fn expire(&self, now: Instant) -> Vec<CorrelationKey> {
        let expired: Vec<(CorrelationKey, PendingCall)> = {
            let mut pending = self.pending.lock();
            let keys: Vec<CorrelationKey> = pending
                .iter()
                .filter(|(_, call)| call.deadline <= now)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| pending.remove(&key).map(|call| (key, call)))
                .collect()
        };

        let mut keys = Vec::with_capacity(expired.len());
        for (key, call) in expired {
            debug!(key = %key, "Pending call timed out");
            call.handle.resolve(Err(Fault::timeout(&key)));
            self.events
                .try_emit(names::CALL_EXPIRED, Some(json!({ "key": key })));
            keys.push(key);
        }
        keys.sort();
        keys
    }

    /// Removes a call, resolving it with `Cancelled`.
    ///
    /// Returns false if no call held the key.
    pub fn cancel(&self, key: &CorrelationKey) -> bool {
        let entry = self.pending.lock().remove(key);
        match entry {
            Some(call) => {
                call.handle
                    .resolve(Err(Fault::cancelled(format!("Call '{key}' was cancelled"))));
                true
            }
            None => false,
        }
    }

    /// Returns true if a call holds the key.
    #[must_use]
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.pending.lock().contains_key(key)
    }

    /// Returns the number of pending calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Returns how many responses were dropped for lack of a pending call.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of pending calls, oldest deadline first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingCallInfo> {
        let mut calls: Vec<PendingCallInfo> = self
            .pending
            .lock()
            .iter()
            .map(|(key, call)| PendingCallInfo {
                key: key.clone(),
                deadline: call.deadline,
                registered_at: call.registered_at,
            })
            .collect();
        calls.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.key.cmp(&b.key)));
        calls
    }

    /// Spawns a task that calls [`expire`](Self::expire) every `interval`.
    ///
    /// The task stops once the correlator is dropped.
    #[must_use]
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(correlator) = weak.upgrade() else {
                    break;
                };
                let expired = correlator.expire(Instant::now());
                if !expired.is_empty() {
                    debug!(count = expired.len(), "Reaper expired pending calls");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use pretty_assertions::assert_eq;

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn key(k: &str) -> CorrelationKey {
        CorrelationKey::new(k)
    }

    #[tokio::test]
    async fn test_deliver_resolves_waiter() {
        let correlator = Correlator::default();
        let (handle, waiter) = CallerHandle::pair();
        correlator.register(key("k1"), handle, later()).unwrap();

        assert!(correlator.deliver(&key("k1"), Message::new("resp")));
        assert_eq!(waiter.wait().await.unwrap().text(), "resp");
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn test_deliver_twice_second_is_miss() {
        let events = Arc::new(CollectingEventSink::new());
        let correlator = Correlator::default().with_event_sink(events.clone());
        let (handle, _waiter) = CallerHandle::pair();
        correlator.register(key("k1"), handle, later()).unwrap();

        assert!(correlator.deliver(&key("k1"), Message::new("a")));
        assert!(!correlator.deliver(&key("k1"), Message::new("b")));
        assert_eq!(correlator.misses(), 1);
        assert_eq!(events.count(names::CORRELATION_MISS), 1);
    }

    #[tokio::test]
    async fn test_expire_times_out_due_calls_only() {
        let correlator = Correlator::default();
        let now = Instant::now();
        let (h1, w1) = CallerHandle::pair();
        let (h2, mut w2) = CallerHandle::pair();
        correlator.register(key("due"), h1, now + Duration::from_millis(10)).unwrap();
        correlator.register(key("later"), h2, later()).unwrap();

        let expired = correlator.expire(now + Duration::from_millis(20));
        assert_eq!(expired, vec![key("due")]);
        assert!(w1.wait().await.unwrap_err().is_timeout());
        assert!(w2.try_take().is_none());
        assert_eq!(correlator.len(), 1);
    }

    #[tokio::test]
    async fn test_late_delivery_after_deadline_is_timeout() {
        let correlator = Correlator::default();
        let (handle, waiter) = CallerHandle::pair();
        correlator
            .register(key("k"), handle, Instant::now() + Duration::from_millis(1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert!(!correlator.deliver(&key("k"), Message::new("late")));
        assert!(waiter.wait().await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_replace_earlier_policy() {
        let correlator = Correlator::new(DuplicateKeyPolicy::ReplaceEarlier);
        let (h1, w1) = CallerHandle::pair();
        let (h2, w2) = CallerHandle::pair();
        correlator.register(key("k"), h1, later()).unwrap();
        correlator.register(key("k"), h2, later()).unwrap();

        let first = w1.wait().await.unwrap_err();
        assert_eq!(first.kind, FaultKind::DuplicateCorrelationKey);

        assert!(correlator.deliver(&key("k"), Message::new("second")));
        assert_eq!(w2.wait().await.unwrap().text(), "second");
    }

    #[tokio::test]
    async fn test_reject_new_policy() {
        let correlator = Correlator::new(DuplicateKeyPolicy::RejectNew);
        let (h1, mut w1) = CallerHandle::pair();
        let (h2, w2) = CallerHandle::pair();
        correlator.register(key("k"), h1, later()).unwrap();

        let err = correlator.register(key("k"), h2, later()).unwrap_err();
        assert_eq!(err, CorrelationError::DuplicateKey { key: "k".to_string() });
        assert_eq!(w2.wait().await.unwrap_err().kind, FaultKind::Cancelled);
        assert!(w1.try_take().is_none());
    }

    #[tokio::test]
    async fn test_register_sweeps_stale_entry_with_same_key() {
        let correlator = Correlator::new(DuplicateKeyPolicy::RejectNew);
        let (h1, w1) = CallerHandle::pair();
        correlator
            .register(key("k"), h1, Instant::now() - Duration::from_millis(1))
            .unwrap();
        let (h2, _w2) = CallerHandle::pair();
        assert!(correlator.register(key("k"), h2, later()).is_ok());
        assert!(w1.wait().await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_cancel() {
        let correlator = Correlator::default();
        let (handle, waiter) = CallerHandle::pair();
        correlator.register(key("k"), handle, later()).unwrap();
        assert!(correlator.cancel(&key("k")));
        assert!(!correlator.cancel(&key("k")));
        assert_eq!(waiter.wait().await.unwrap_err().kind, FaultKind::Cancelled);
        assert!(!correlator.deliver(&key("k"), Message::empty()));
    }

    #[tokio::test]
    async fn test_pending_snapshot_sorted_by_deadline() {
        let correlator = Correlator::default();
        let now = Instant::now();
        let (h1, _w1) = CallerHandle::pair();
        let (h2, _w2) = CallerHandle::pair();
        correlator.register(key("b"), h1, now + Duration::from_secs(20)).unwrap();
        correlator.register(key("a"), h2, now + Duration::from_secs(30)).unwrap();

        let keys: Vec<_> = correlator.pending().into_iter().map(|p| p.key).collect();
        assert_eq!(keys, vec![key("b"), key("a")]);
    }

    #[tokio::test]
    async fn test_concurrent_deliver_resolves_once() {
        let correlator = Arc::new(Correlator::default());
        let (handle, waiter) = CallerHandle::pair();
        correlator.register(key("k"), handle, later()).unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let correlator = correlator.clone();
            tasks.push(tokio::spawn(async move {
                correlator.deliver(&key("k"), Message::new(format!("r{i}")))
            }));
        }
        let delivered = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        assert_eq!(delivered, 1);
        assert!(waiter.wait().await.is_ok());
        assert_eq!(correlator.misses(), 15);
    }

    #[tokio::test]
    async fn test_reaper_expires_calls() {
        let correlator = Arc::new(Correlator::default());
        let (handle, waiter) = CallerHandle::pair();
        correlator
            .register(key("k"), handle, Instant::now() + Duration::from_millis(5))
            .unwrap();

        let reaper = correlator.spawn_reaper(Duration::from_millis(10));
        let outcome = tokio::time::timeout(Duration::from_secs(2), waiter.wait())
            .await
            .unwrap();
        assert!(outcome.unwrap_err().is_timeout());
        assert!(correlator.is_empty());
        reaper.abort();
    }

    #[tokio::test]
    async fn test_reaper_stops_when_correlator_dropped() {
        let correlator = Arc::new(Correlator::default());
        let reaper = correlator.spawn_reaper(Duration::from_millis(1));
        drop(correlator);
        tokio::time::timeout(Duration::from_secs(2), reaper)
            .await
            .unwrap()
            .unwrap();
    }
}
