//! Subscription registry
//!
//! Many logical listeners share one physical subscription per key. The table
//! below is the single source of truth and is guarded by one lock, never held
//! across a network await.
//!
//! Lifecycle of an entry:
//! - created by the first `subscribe` for its key, physical subscribe issued
//!   if the connection is up (otherwise on the next connect)
//! - acknowledged: physical id recorded, buffered notifications replayed
//! - on connection loss the physical id is cleared; `resubscribe_all` re-issues
//! - removed when its last listener unsubscribes, or by idle cleanup once no
//!   listener handle is alive
//!
//! Every physical subscribe carries a sequence number. An acknowledgement whose
//! sequence no longer matches the entry (entry removed, connection dropped,
//! subscribe re-issued) is stale and is undone with a physical unsubscribe.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::SubscriptionConfig;
use crate::core::events::current_timestamp_ms;
use crate::rpc::connection::{ConnectionManager, ConnectionObserver};
use crate::rpc::dispatcher::{EventDispatcher, ListenerCallback, RegistrationId};
use crate::rpc::errors::{RpcError, RpcResult};
use crate::rpc::types::{JsonRpcNotification, SubscriptionEvent, SubscriptionKey, SubscriptionKind};

/// Notifications kept while waiting for their subscription's acknowledgement
const ORPHAN_BUFFER_CAPACITY: usize = 256;
const ORPHAN_MAX_AGE: Duration = Duration::from_secs(5);

/// Handle for one registered listener
///
/// Keep it alive for as long as the listener should count as active. A
/// dropped handle does not unsubscribe; it makes the listener eligible for
/// idle cleanup.
#[derive(Debug)]
pub struct Registration {
    id: RegistrationId,
    key: SubscriptionKey,
    _liveness: Arc<()>,
}

impl Registration {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }
}

/// Point-in-time registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Entries, confirmed or pending; bounded by the cap
    pub physical_subscriptions: usize,
    pub confirmed: usize,
    pub listeners: usize,
    pub buffered_notifications: usize,
}

struct ListenerSlot {
    id: RegistrationId,
    liveness: Weak<()>,
}

impl ListenerSlot {
    fn is_active(&self) -> bool {
        self.liveness.strong_count() > 0
    }
}

struct SubscriptionEntry {
    physical_id: Option<u64>,
    listeners: Vec<ListenerSlot>,
    last_used: Instant,
    seq: u64,
    in_flight: bool,
    confirmed: watch::Sender<Option<u64>>,
}

impl SubscriptionEntry {
    fn new() -> Self {
        let (confirmed, _) = watch::channel(None);
        Self {
            physical_id: None,
            listeners: Vec::new(),
            last_used: Instant::now(),
            seq: 0,
            in_flight: false,
            confirmed,
        }
    }
}

struct OrphanNotification {
    physical_id: u64,
    method: String,
    payload: Value,
    received_at: Instant,
    received_at_ms: u64,
}

#[derive(Default)]
struct RegistryTable {
    entries: HashMap<SubscriptionKey, SubscriptionEntry>,
    by_physical: HashMap<u64, SubscriptionKey>,
    registrations: HashMap<RegistrationId, SubscriptionKey>,
    orphans: VecDeque<OrphanNotification>,
}

/// Deduplicates physical subscriptions across logical listeners
pub struct SubscriptionRegistry {
    me: Weak<SubscriptionRegistry>,
    manager: Arc<ConnectionManager>,
    dispatcher: Arc<EventDispatcher>,
    config: SubscriptionConfig,
    table: Mutex<RegistryTable>,
    next_registration: AtomicU64,
    next_seq: AtomicU64,
}

impl SubscriptionRegistry {
    /// Create the registry and attach it to `manager` as an observer
    pub fn new(manager: Arc<ConnectionManager>, config: SubscriptionConfig) -> Arc<Self> {
        let registry = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            dispatcher: manager.dispatcher(),
            manager,
            config,
            table: Mutex::new(RegistryTable::default()),
            next_registration: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
        });

        let weak = Arc::downgrade(&registry);
        let observer: Weak<dyn ConnectionObserver> = weak;
        registry.manager.add_observer(observer);
        registry
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `callback` for `key`
    ///
    /// Returns immediately; the physical subscribe (if one is needed) completes
    /// in the background. Fails with `CapacityExceeded` when `key` is new and
    /// the cap is reached; callers should fall back to polling.
    pub async fn subscribe(
        &self,
        key: SubscriptionKey,
        callback: ListenerCallback,
    ) -> RpcResult<Registration> {
        let id = self.next_registration.fetch_add(1, Ordering::Relaxed);
        let liveness = Arc::new(());

        let issue = {
            let mut guard = self.table.lock().await;
            let table = &mut *guard;

            if !table.entries.contains_key(&key)
                && table.entries.len() >= self.config.max_subscriptions
            {
                tracing::warn!(
                    key = %key,
                    limit = self.config.max_subscriptions,
                    "Subscription capacity exceeded"
                );
                return Err(RpcError::CapacityExceeded {
                    limit: self.config.max_subscriptions,
                });
            }

            let entry = table
                .entries
                .entry(key.clone())
                .or_insert_with(SubscriptionEntry::new);
            entry.listeners.push(ListenerSlot {
                id,
                liveness: Arc::downgrade(&liveness),
            });
            entry.last_used = Instant::now();

            let issue = if entry.physical_id.is_none()
                && !entry.in_flight
                && self.manager.is_connected()
            {
                let seq = self.next_seq();
                entry.seq = seq;
                entry.in_flight = true;
                Some(seq)
            } else {
                None
            };
            let listeners = entry.listeners.len();

            table.registrations.insert(id, key.clone());
            // Registered under the table lock so no notification slips between
            self.dispatcher.register(id, key.clone(), callback);

            tracing::debug!(key = %key, registration_id = id, listeners, "Listener registered");
            issue
        };

        if let Some(seq) = issue {
            if let Some(this) = self.me.upgrade() {
                let key = key.clone();
                tokio::spawn(async move { this.establish(key, seq).await });
            }
        }

        Ok(Registration {
            id,
            key,
            _liveness: liveness,
        })
    }

    /// `subscribe` with a plain closure
    pub async fn subscribe_fn<F>(&self, key: SubscriptionKey, callback: F) -> RpcResult<Registration>
    where
        F: Fn(&SubscriptionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(key, Arc::new(callback)).await
    }

    /// Wait (bounded) until the registration's subscription is acknowledged
    pub async fn wait_confirmed(
        &self,
        registration: &Registration,
        timeout: Duration,
    ) -> RpcResult<u64> {
        let key = registration.key();
        let mut confirmed_rx = {
            let table = self.table.lock().await;
            table
                .entries
                .get(key)
                .map(|entry| entry.confirmed.subscribe())
                .ok_or_else(|| RpcError::SubscriptionFailed {
                    key: key.to_string(),
                    reason: "not registered".to_string(),
                })?
        };

        let waited = tokio::time::timeout(timeout, confirmed_rx.wait_for(|id| id.is_some()))
            .await
            .map(|acked| acked.map(|id| *id));

        match waited {
            Ok(Ok(physical_id)) => physical_id.ok_or_else(|| RpcError::SubscriptionFailed {
                key: key.to_string(),
                reason: "acknowledgement withdrawn".to_string(),
            }),
            Ok(Err(_)) => Err(RpcError::SubscriptionFailed {
                key: key.to_string(),
                reason: "subscription removed".to_string(),
            }),
            Err(_) => Err(RpcError::ConfirmationTimeout {
                key: key.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn establish(self: Arc<Self>, key: SubscriptionKey, seq: u64) {
        let params = key
            .kind
            .subscribe_params(&key.subject, &self.manager.config().commitment);
        let result = self
            .manager
            .send(key.kind.subscribe_method(), params)
            .await
            .and_then(parse_physical_id);

        match result {
            Ok(physical_id) => self.record_ack(&key, seq, physical_id).await,
            Err(e) => {
                let mut table = self.table.lock().await;
                if let Some(entry) = table.entries.get_mut(&key) {
                    if entry.seq == seq {
                        entry.in_flight = false;
                    }
                }
                tracing::warn!(key = %key, error = %e, "Physical subscribe failed; retried on next connect");
            }
        }
    }

    async fn record_ack(&self, key: &SubscriptionKey, seq: u64, physical_id: u64) {
        let mut guard = self.table.lock().await;
        let table = &mut *guard;

        let live = matches!(
            table.entries.get(key),
            Some(entry) if entry.seq == seq && entry.physical_id.is_none()
        );
        if !live {
            drop(guard);
            tracing::debug!(key = %key, physical_id, "Undoing stale subscription acknowledgement");
            self.send_unsubscribe(key.kind, physical_id).await;
            return;
        }
        let Some(entry) = table.entries.get_mut(key) else {
            return;
        };

        entry.physical_id = Some(physical_id);
        entry.in_flight = false;
        entry.confirmed.send_replace(Some(physical_id));
        table.by_physical.insert(physical_id, key.clone());

        let (matched, rest): (VecDeque<_>, VecDeque<_>) = table
            .orphans
            .drain(..)
            .partition(|o| o.physical_id == physical_id);
        table.orphans = rest
            .into_iter()
            .filter(|o| o.received_at.elapsed() <= ORPHAN_MAX_AGE)
            .collect();

        let mut replayed = 0;
        for orphan in matched {
            if orphan.received_at.elapsed() > ORPHAN_MAX_AGE
                || orphan.method != key.kind.notification_method()
            {
                continue;
            }
            let event = SubscriptionEvent {
                key: key.clone(),
                physical_id,
                payload: orphan.payload,
                received_at_ms: orphan.received_at_ms,
            };
            self.dispatcher.dispatch(&event);
            replayed += 1;
        }

        tracing::info!(key = %key, physical_id, replayed, "Subscription confirmed");
    }

    /// Remove one listener; the last listener for a key also drops the
    /// physical subscription. Returns false for an unknown registration.
    pub async fn unsubscribe(&self, registration_id: RegistrationId) -> bool {
        let removed = {
            let mut guard = self.table.lock().await;
            let table = &mut *guard;

            let Some(key) = table.registrations.remove(&registration_id) else {
                return false;
            };
            self.dispatcher.remove(registration_id, &key);

            let now_empty = match table.entries.get_mut(&key) {
                Some(entry) => {
                    entry.listeners.retain(|l| l.id != registration_id);
                    entry.last_used = Instant::now();
                    entry.listeners.is_empty()
                }
                None => false,
            };

            if now_empty {
                let physical_id = table.entries.remove(&key).and_then(|e| e.physical_id);
                if let Some(physical_id) = physical_id {
                    table.by_physical.remove(&physical_id);
                }
                Some((key, physical_id))
            } else {
                tracing::debug!(key = %key, registration_id, "Listener removed");
                None
            }
        };

        if let Some((key, physical_id)) = removed {
            tracing::info!(key = %key, physical_id = ?physical_id, "Last listener gone, subscription removed");
            if let Some(physical_id) = physical_id {
                self.send_unsubscribe(key.kind, physical_id).await;
            }
        }
        true
    }

    async fn send_unsubscribe(&self, kind: SubscriptionKind, physical_id: u64) {
        if !self.manager.is_connected() {
            return;
        }
        match self
            .manager
            .send(kind.unsubscribe_method(), json!([physical_id]))
            .await
        {
            Ok(_) => tracing::debug!(physical_id, "Physical unsubscribe sent"),
            Err(e) => {
                tracing::warn!(physical_id, error = %e, "Physical unsubscribe failed")
            }
        }
    }

    /// Re-issue the physical subscribe for every entry without one
    ///
    /// Returns the keys that were re-issued.
    pub async fn resubscribe_all(&self) -> Vec<SubscriptionKey> {
        let Some(this) = self.me.upgrade() else {
            return Vec::new();
        };
        if !self.manager.is_connected() {
            return Vec::new();
        }

        let pending: Vec<(SubscriptionKey, u64)> = {
            let mut table = self.table.lock().await;
            table
                .entries
                .iter_mut()
                .filter(|(_, e)| e.physical_id.is_none() && !e.in_flight && !e.listeners.is_empty())
                .map(|(key, entry)| {
                    let seq = self.next_seq();
                    entry.seq = seq;
                    entry.in_flight = true;
                    (key.clone(), seq)
                })
                .collect()
        };

        if pending.is_empty() {
            return Vec::new();
        }

        tracing::info!(count = pending.len(), "Resubscribing");
        let keys: Vec<SubscriptionKey> = pending.iter().map(|(k, _)| k.clone()).collect();
        join_all(
            pending
                .into_iter()
                .map(|(key, seq)| this.clone().establish(key, seq)),
        )
        .await;
        keys
    }

    /// Remove entries idle past the TTL whose listener handles are all dropped
    ///
    /// Returns the removed keys.
    pub async fn cleanup_idle(&self) -> Vec<SubscriptionKey> {
        let ttl = self.config.idle_ttl();
        let removed: Vec<(SubscriptionKey, Option<u64>)> = {
            let mut guard = self.table.lock().await;
            let table = &mut *guard;

            let stale: Vec<SubscriptionKey> = table
                .entries
                .iter()
                .filter(|(_, e)| {
                    e.last_used.elapsed() > ttl && !e.listeners.iter().any(ListenerSlot::is_active)
                })
                .map(|(key, _)| key.clone())
                .collect();

            let mut removed = Vec::with_capacity(stale.len());
            for key in stale {
                if let Some(entry) = table.entries.remove(&key) {
                    if let Some(physical_id) = entry.physical_id {
                        table.by_physical.remove(&physical_id);
                    }
                    for listener in &entry.listeners {
                        table.registrations.remove(&listener.id);
                    }
                    self.dispatcher.remove_key(&key);
                    removed.push((key, entry.physical_id));
                }
            }
            removed
        };

        for (key, physical_id) in &removed {
            tracing::warn!(key = %key, "Removing idle subscription with no active listener");
            if let Some(physical_id) = physical_id {
                self.send_unsubscribe(key.kind, *physical_id).await;
            }
        }
        removed.into_iter().map(|(key, _)| key).collect()
    }

    /// Start periodic idle cleanup on the configured interval
    pub fn spawn_idle_cleanup(self: &Arc<Self>, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(idle_cleanup_task(
            self.clone(),
            self.config.cleanup_interval(),
            shutdown_rx,
        ))
    }

    pub async fn stats(&self) -> RegistryStats {
        let table = self.table.lock().await;
        RegistryStats {
            physical_subscriptions: table.entries.len(),
            confirmed: table.entries.values().filter(|e| e.physical_id.is_some()).count(),
            listeners: table.entries.values().map(|e| e.listeners.len()).sum(),
            buffered_notifications: table.orphans.len(),
        }
    }

    /// Live logical keys
    pub async fn keys(&self) -> Vec<SubscriptionKey> {
        self.table.lock().await.entries.keys().cloned().collect()
    }

    /// Current physical id of `key`, if acknowledged
    pub async fn physical_id(&self, key: &SubscriptionKey) -> Option<u64> {
        self.table
            .lock()
            .await
            .entries
            .get(key)
            .and_then(|e| e.physical_id)
    }
}

fn parse_physical_id(value: Value) -> RpcResult<u64> {
    value
        .as_u64()
        .ok_or_else(|| RpcError::InvalidResponse(format!("subscription id is not an integer: {}", value)))
}

#[async_trait]
impl ConnectionObserver for SubscriptionRegistry {
    async fn on_connected(&self, generation: u64) {
        if generation != self.manager.generation() {
            return;
        }
        self.resubscribe_all().await;
    }

    async fn on_connection_lost(&self) {
        let mut guard = self.table.lock().await;
        let table = &mut *guard;
        table.by_physical.clear();
        table.orphans.clear();
        for entry in table.entries.values_mut() {
            entry.physical_id = None;
            entry.in_flight = false;
            // Invalidates acknowledgements still in flight on the dead socket
            entry.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            entry.confirmed.send_replace(None);
        }
        tracing::info!(
            subscriptions = table.entries.len(),
            "Physical subscriptions invalidated"
        );
    }

    async fn on_notification(&self, notification: JsonRpcNotification) {
        let mut guard = self.table.lock().await;
        let table = &mut *guard;
        let physical_id = notification.params.subscription;

        let Some(key) = table.by_physical.get(&physical_id).cloned() else {
            let now = Instant::now();
            while table
                .orphans
                .front()
                .is_some_and(|o| now.duration_since(o.received_at) > ORPHAN_MAX_AGE)
            {
                table.orphans.pop_front();
            }
            if table.orphans.len() >= ORPHAN_BUFFER_CAPACITY {
                table.orphans.pop_front();
                tracing::warn!("Orphan notification buffer full, dropping oldest");
            }
            tracing::debug!(physical_id, method = %notification.method, "Buffering notification for unacknowledged subscription");
            table.orphans.push_back(OrphanNotification {
                physical_id,
                method: notification.method,
                payload: notification.params.result,
                received_at: now,
                received_at_ms: current_timestamp_ms(),
            });
            return;
        };

        if notification.method != key.kind.notification_method() {
            tracing::warn!(
                key = %key,
                method = %notification.method,
                "Notification method does not match subscription kind"
            );
            return;
        }

        let event = SubscriptionEvent {
            key,
            physical_id,
            payload: notification.params.result,
            received_at_ms: current_timestamp_ms(),
        };
        self.dispatcher.dispatch(&event);
    }
}

/// Run `cleanup_idle` every `interval` until shutdown
pub async fn idle_cleanup_task(
    registry: Arc<SubscriptionRegistry>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Idle cleanup shutting down");
                break;
            }
            _ = ticker.tick() => {
                let removed = registry.cleanup_idle().await;
                if !removed.is_empty() {
                    tracing::info!(removed = removed.len(), "Idle cleanup pass complete");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::test_utils::{test_rpc_config, wait_until, MockNode, FIRST_SUBSCRIPTION_ID};
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    const WAIT: Duration = Duration::from_secs(3);

    fn test_subscription_config() -> SubscriptionConfig {
        SubscriptionConfig {
            max_subscriptions: 200,
            idle_ttl_secs: 1_800,
            cleanup_interval_secs: 900,
            confirm_timeout_ms: 1_000,
        }
    }

    async fn setup(config: SubscriptionConfig) -> (Arc<MockNode>, Arc<ConnectionManager>, Arc<SubscriptionRegistry>) {
        let node = MockNode::new();
        let manager = ConnectionManager::new(test_rpc_config(), node.clone());
        let registry = SubscriptionRegistry::new(manager.clone(), config);
        manager.connect().await.unwrap();
        (node, manager, registry)
    }

    fn recorder() -> (ListenerCallback, Arc<StdMutex<Vec<Value>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        let cb: ListenerCallback = Arc::new(move |e: &SubscriptionEvent| {
            s.lock().unwrap().push(e.payload.clone());
            Ok(())
        });
        (cb, seen)
    }

    fn noop() -> ListenerCallback {
        Arc::new(|_| Ok(()))
    }

    #[tokio::test]
    async fn test_listeners_share_one_physical_subscription() {
        let (node, _manager, registry) = setup(test_subscription_config()).await;
        let key = SubscriptionKey::balance("W1");
        let (cb1, seen1) = recorder();
        let (cb2, seen2) = recorder();

        let r1 = registry.subscribe(key.clone(), cb1).await.unwrap();
        let r2 = registry.subscribe(key.clone(), cb2).await.unwrap();
        let pid = registry.wait_confirmed(&r1, WAIT).await.unwrap();
        assert_eq!(registry.wait_confirmed(&r2, WAIT).await.unwrap(), pid);

        assert_eq!(node.count("accountSubscribe"), 1);

        node.push_notification("accountNotification", pid, json!({ "lamports": 10 }));
        assert!(wait_until(|| seen1.lock().unwrap().len() == 1 && seen2.lock().unwrap().len() == 1, WAIT).await);

        let stats = registry.stats().await;
        assert_eq!(stats.physical_subscriptions, 1);
        assert_eq!(stats.confirmed, 1);
        assert_eq!(stats.listeners, 2);
    }

    #[tokio::test]
    async fn test_last_listener_removal_sends_physical_unsubscribe() {
        let (node, _manager, registry) = setup(test_subscription_config()).await;
        let key = SubscriptionKey::balance("W1");

        let l1 = registry.subscribe(key.clone(), noop()).await.unwrap();
        let l2 = registry.subscribe(key.clone(), noop()).await.unwrap();
        let pid = registry.wait_confirmed(&l1, WAIT).await.unwrap();

        assert!(registry.unsubscribe(l1.id()).await);
        assert_eq!(node.count("accountUnsubscribe"), 0);
        assert_eq!(registry.physical_id(&key).await, Some(pid));

        assert!(registry.unsubscribe(l2.id()).await);
        let unsubscribes = node.requests_for("accountUnsubscribe");
        assert_eq!(unsubscribes.len(), 1);
        assert_eq!(unsubscribes[0]["params"][0], pid);
        assert!(registry.keys().await.is_empty());
        assert_eq!(registry.stats().await, RegistryStats::default());
    }

    #[tokio::test]
    async fn test_many_listeners_one_subscribe_one_unsubscribe() {
        let (node, _manager, registry) = setup(test_subscription_config()).await;
        let key = SubscriptionKey::logs("Prog1");

        let mut regs = Vec::new();
        for _ in 0..10 {
            regs.push(registry.subscribe(key.clone(), noop()).await.unwrap());
        }
        registry.wait_confirmed(&regs[0], WAIT).await.unwrap();

        // Interleave removals and re-adds; the key never runs empty here
        let first_half: Vec<Registration> = regs.drain(..5).collect();
        for reg in first_half {
            assert!(registry.unsubscribe(reg.id()).await);
            regs.push(registry.subscribe(key.clone(), noop()).await.unwrap());
        }
        assert_eq!(node.count("logsSubscribe"), 1);
        assert_eq!(node.count("logsUnsubscribe"), 0);

        for reg in regs.drain(..) {
            assert!(registry.unsubscribe(reg.id()).await);
        }
        assert_eq!(node.count("logsSubscribe"), 1);
        assert_eq!(node.count("logsUnsubscribe"), 1);
    }

    #[tokio::test]
    async fn test_unknown_registration_unsubscribe_is_noop() {
        let (_node, _manager, registry) = setup(test_subscription_config()).await;
        assert!(!registry.unsubscribe(9999).await);
    }

    #[tokio::test]
    async fn test_resubscribe_after_reconnect_restores_exact_key_set() {
        let (node, manager, registry) = setup(test_subscription_config()).await;

        let w1 = registry.subscribe(SubscriptionKey::balance("W1"), noop()).await.unwrap();
        let w2 = registry.subscribe(SubscriptionKey::balance("W2"), noop()).await.unwrap();
        let logs = registry.subscribe(SubscriptionKey::logs("Prog1"), noop()).await.unwrap();
        let gone = registry.subscribe(SubscriptionKey::balance("W3"), noop()).await.unwrap();
        for reg in [&w1, &w2, &logs, &gone] {
            registry.wait_confirmed(reg, WAIT).await.unwrap();
        }
        registry.unsubscribe(gone.id()).await;

        let before: HashSet<SubscriptionKey> = registry.keys().await.into_iter().collect();
        let requests_before = node.requests().len();

        node.drop_connection();
        assert!(wait_until(|| manager.generation() == 2 && manager.is_connected(), WAIT).await);
        assert!(wait_until(|| node.count("accountSubscribe") == 3 + 2, WAIT).await);
        for reg in [&w1, &w2, &logs] {
            registry.wait_confirmed(reg, WAIT).await.unwrap();
        }

        let resubscribed: HashSet<String> = node.requests()[requests_before..]
            .iter()
            .filter(|r| r["method"].as_str().unwrap().ends_with("Subscribe"))
            .map(|r| {
                let p = &r["params"][0];
                p.as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| p["mentions"][0].as_str().unwrap().to_string())
            })
            .collect();
        let expected: HashSet<String> = ["W1", "W2", "Prog1"].iter().map(|s| s.to_string()).collect();
        assert_eq!(resubscribed, expected);

        let after: HashSet<SubscriptionKey> = registry.keys().await.into_iter().collect();
        assert_eq!(before, after);

        // Exactly one re-subscribe per key
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(node.count("accountSubscribe"), 5);
        assert_eq!(node.count("logsSubscribe"), 2);
    }

    #[tokio::test]
    async fn test_notifications_follow_new_physical_id_after_reconnect() {
        let (node, manager, registry) = setup(test_subscription_config()).await;
        let (cb, seen) = recorder();
        let reg = registry.subscribe(SubscriptionKey::balance("W1"), cb).await.unwrap();
        let old_pid = registry.wait_confirmed(&reg, WAIT).await.unwrap();

        node.drop_connection();
        assert!(wait_until(|| manager.generation() == 2, WAIT).await);
        assert!(wait_until(|| node.subscription_id("W1") != Some(old_pid), WAIT).await);
        let new_pid = registry.wait_confirmed(&reg, WAIT).await.unwrap();
        assert_ne!(new_pid, old_pid);

        node.push_notification("accountNotification", new_pid, json!({ "n": 1 }));
        assert!(wait_until(|| seen.lock().unwrap().len() == 1, WAIT).await);
    }

    #[tokio::test]
    async fn test_capacity_exceeded_for_new_keys_only() {
        let mut config = test_subscription_config();
        config.max_subscriptions = 2;
        let (_node, _manager, registry) = setup(config).await;

        registry.subscribe(SubscriptionKey::balance("A"), noop()).await.unwrap();
        registry.subscribe(SubscriptionKey::balance("B"), noop()).await.unwrap();

        let result = registry.subscribe(SubscriptionKey::balance("C"), noop()).await;
        assert!(matches!(result, Err(RpcError::CapacityExceeded { limit: 2 })));

        // Existing key still accepts listeners
        assert!(registry.subscribe(SubscriptionKey::balance("A"), noop()).await.is_ok());
    }

    #[tokio::test]
    async fn test_notification_before_ack_is_replayed() {
        let (node, _manager, registry) = setup(test_subscription_config()).await;
        node.set_silent("accountSubscribe");
        let (cb, seen) = recorder();

        let reg = registry.subscribe(SubscriptionKey::balance("W1"), cb).await.unwrap();
        assert!(wait_until(|| node.count("accountSubscribe") == 1, WAIT).await);
        let request_id = node.requests_for("accountSubscribe")[0]["id"].as_u64().unwrap();

        node.push_notification("accountNotification", 555, json!({ "early": true }));
        let mut buffered = 0;
        for _ in 0..100 {
            buffered = registry.stats().await.buffered_notifications;
            if buffered == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(buffered, 1);
        assert!(seen.lock().unwrap().is_empty());

        node.respond(request_id, json!(555));
        assert_eq!(registry.wait_confirmed(&reg, WAIT).await.unwrap(), 555);
        assert!(wait_until(|| seen.lock().unwrap().len() == 1, WAIT).await);
        assert_eq!(seen.lock().unwrap()[0]["early"], true);
        assert_eq!(registry.stats().await.buffered_notifications, 0);
    }

    #[tokio::test]
    async fn test_late_ack_after_unsubscribe_is_undone() {
        let (node, _manager, registry) = setup(test_subscription_config()).await;
        node.set_silent("signatureSubscribe");

        let reg = registry
            .subscribe(SubscriptionKey::signature("5igSig"), noop())
            .await
            .unwrap();
        assert!(wait_until(|| node.count("signatureSubscribe") == 1, WAIT).await);
        let request_id = node.requests_for("signatureSubscribe")[0]["id"].as_u64().unwrap();

        registry.unsubscribe(reg.id()).await;
        assert_eq!(node.count("signatureUnsubscribe"), 0);

        node.respond(request_id, json!(777));
        assert!(wait_until(|| node.count("signatureUnsubscribe") == 1, WAIT).await);
        assert_eq!(node.requests_for("signatureUnsubscribe")[0]["params"][0], 777);
        assert!(registry.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_while_disconnected_is_issued_on_connect() {
        let node = MockNode::new();
        let manager = ConnectionManager::new(test_rpc_config(), node.clone());
        let registry = SubscriptionRegistry::new(manager.clone(), test_subscription_config());

        let reg = registry.subscribe(SubscriptionKey::slot(), noop()).await.unwrap();
        assert_eq!(node.count("slotSubscribe"), 0);

        manager.connect().await.unwrap();
        let pid = registry.wait_confirmed(&reg, WAIT).await.unwrap();
        assert_eq!(pid, FIRST_SUBSCRIPTION_ID);
        assert_eq!(node.count("slotSubscribe"), 1);
    }

    #[tokio::test]
    async fn test_wait_confirmed_times_out() {
        let (node, _manager, registry) = setup(test_subscription_config()).await;
        node.set_silent("accountSubscribe");
        let reg = registry.subscribe(SubscriptionKey::balance("W9"), noop()).await.unwrap();

        let result = registry.wait_confirmed(&reg, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(RpcError::ConfirmationTimeout { timeout_ms: 50, .. })));
    }

    #[tokio::test]
    async fn test_idle_cleanup_removes_only_abandoned_entries() {
        let mut config = test_subscription_config();
        config.idle_ttl_secs = 0;
        let (node, _manager, registry) = setup(config).await;

        let kept = registry.subscribe(SubscriptionKey::balance("Kept"), noop()).await.unwrap();
        let abandoned = registry
            .subscribe(SubscriptionKey::balance("Abandoned"), noop())
            .await
            .unwrap();
        registry.wait_confirmed(&kept, WAIT).await.unwrap();
        registry.wait_confirmed(&abandoned, WAIT).await.unwrap();
        let abandoned_id = abandoned.id();
        drop(abandoned);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let removed = registry.cleanup_idle().await;

        assert_eq!(removed, vec![SubscriptionKey::balance("Abandoned")]);
        assert_eq!(registry.keys().await, vec![SubscriptionKey::balance("Kept")]);
        assert_eq!(node.count("accountUnsubscribe"), 1);
        // Registration was cleaned up with the entry
        assert!(!registry.unsubscribe(abandoned_id).await);
    }

    #[tokio::test]
    async fn test_idle_cleanup_task_runs_until_shutdown() {
        let mut config = test_subscription_config();
        config.idle_ttl_secs = 0;
        let (_node, _manager, registry) = setup(config).await;

        let reg = registry.subscribe(SubscriptionKey::balance("Tmp"), noop()).await.unwrap();
        registry.wait_confirmed(&reg, WAIT).await.unwrap();
        drop(reg);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(idle_cleanup_task(
            registry.clone(),
            Duration::from_millis(10),
            shutdown_rx,
        ));

        let mut emptied = false;
        for _ in 0..100 {
            if registry.keys().await.is_empty() {
                emptied = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(emptied);

        let _ = shutdown_tx.send(());
        task.await.unwrap();
    }
}
