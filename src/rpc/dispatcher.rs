//! Typed notification fan-out
//!
//! Listeners are registered per subscription key. `dispatch` is called from
//! the connection reader in arrival order, so events for one key reach each
//! listener in the order they were received. A listener that errors or panics
//! is logged and skipped; delivery to the remaining listeners continues.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::rpc::types::{SubscriptionEvent, SubscriptionKey};

/// Identifier handed out per listener registration
pub type RegistrationId = u64;

/// Listener callback; must return quickly (runs on the connection reader)
pub type ListenerCallback = Arc<dyn Fn(&SubscriptionEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
struct ListenerEntry {
    id: RegistrationId,
    callback: ListenerCallback,
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Routes events to the listeners registered for their key
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<HashMap<SubscriptionKey, Vec<ListenerEntry>>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("keys", &self.read().len())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SubscriptionKey, Vec<ListenerEntry>>> {
        self.listeners.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SubscriptionKey, Vec<ListenerEntry>>> {
        self.listeners.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, id: RegistrationId, key: SubscriptionKey, callback: ListenerCallback) {
        self.write()
            .entry(key)
            .or_default()
            .push(ListenerEntry { id, callback });
    }

    /// Remove one listener; returns whether it was present
    pub fn remove(&self, id: RegistrationId, key: &SubscriptionKey) -> bool {
        let mut table = self.write();
        let Some(entries) = table.get_mut(key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            table.remove(key);
        }
        removed
    }

    /// Remove every listener for `key`; returns how many were removed
    pub fn remove_key(&self, key: &SubscriptionKey) -> usize {
        self.write().remove(key).map(|e| e.len()).unwrap_or(0)
    }

    pub fn listener_count(&self, key: &SubscriptionKey) -> usize {
        self.read().get(key).map(|e| e.len()).unwrap_or(0)
    }

    /// Deliver `event` to every listener for its key
    pub fn dispatch(&self, event: &SubscriptionEvent) -> DispatchReport {
        // Snapshot so callbacks run without the table lock held
        let entries: Vec<ListenerEntry> = match self.read().get(&event.key) {
            Some(entries) => entries.clone(),
            None => return DispatchReport::default(),
        };

        let mut report = DispatchReport::default();
        for entry in entries {
            match catch_unwind(AssertUnwindSafe(|| (entry.callback)(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(
                        registration_id = entry.id,
                        key = %event.key,
                        error = %e,
                        "Listener returned an error"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::error!(
                        registration_id = entry.id,
                        key = %event.key,
                        "Listener panicked"
                    );
                }
            }
        }
        report
    }
}
