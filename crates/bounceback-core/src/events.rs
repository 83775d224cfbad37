//! Observability hooks
//!
//! Subscribe/unsubscribe callback registry; the store and sync engine emit
//! events through it, nothing polls. Callbacks run on the emitting thread
//! and should return quickly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::models::RecordKind;
use crate::sync::{Conflict, SyncReport};

/// Events surfaced to the application layer
#[derive(Debug, Clone)]
pub enum DataEvent {
    /// A sync cycle began
    SyncStarted,
    /// A sync cycle finished; the report carries per-kind counts
    SyncCompleted(SyncReport),
    /// A sync cycle failed before completing
    SyncError(String),
    /// Reconciliation found a divergence needing attention
    ConflictDetected(Conflict),
    /// Estimated store size crossed the soft limit (projected bytes)
    StorageWarning(u64),
    /// A queue entry exhausted its retries
    EntryAbandoned {
        kind: RecordKind,
        record_id: String,
        error: String,
    },
}

type Callback = Arc<dyn Fn(&DataEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]; pass back to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Fan-out registry for [`DataEvent`]s
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

#[derive(Default)]
struct EventBusInner {
    subscribers: Mutex<HashMap<u64, Callback>>,
    next_id: AtomicU64,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every subsequent event
    pub fn subscribe(&self, callback: impl Fn(&DataEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.insert(id, Arc::new(callback));
        }
        SubscriptionId(id)
    }

    /// Remove a previously registered callback
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.remove(&id.0);
        }
    }

    /// Deliver an event to every subscriber.
    ///
    /// The subscriber list is snapshotted first so a callback may
    /// subscribe/unsubscribe without deadlocking.
    pub fn emit(&self, event: &DataEvent) {
        let callbacks: Vec<Callback> = match self.inner.subscribers.lock() {
            Ok(subscribers) => subscribers.values().cloned().collect(),
            Err(_) => return,
        };
        for callback in callbacks {
            callback(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}
