// Snapshot Publisher for Market Pulse
// Subscriber-list-plus-synchronous-invocation: every publish hands each
// callback its own independent EngineState copy

use crate::core::types::EngineState;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

type SnapshotCallback = Arc<dyn Fn(EngineState) + Send + Sync>;

/// Snapshot of publisher statistics
#[derive(Debug, Clone, Default)]
pub struct SnapshotBusStats {
    pub total_published: u64,
    pub total_delivered: u64,
    pub subscriber_count: usize,
}

/// Publishes immutable engine snapshots to registered subscribers.
///
/// Callbacks run synchronously on the publishing task; they must not block
/// and must not assume any particular thread. Each callback receives a fresh
/// clone, so holders of older snapshots never observe later mutation.
pub struct SnapshotBus {
    subscribers: RwLock<Vec<(Uuid, SnapshotCallback)>>,
    stats: RwLock<SnapshotBusStats>,
}

impl SnapshotBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            stats: RwLock::new(SnapshotBusStats::default()),
        }
    }

    /// Register a callback invoked on every successful recompute.
    /// Returns an id usable with `unsubscribe`.
    pub fn subscribe<F>(&self, callback: F) -> Uuid
    where
        F: Fn(EngineState) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.subscribers.write().push((id, Arc::new(callback)));
        tracing::debug!(subscriber = %id, "Snapshot subscriber registered");
        id
    }

    /// Remove a previously registered callback. Returns false if unknown.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let mut subs = self.subscribers.write();
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        before != subs.len()
    }

    /// Deliver `state` to all subscribers, one independent copy each
    pub fn publish(&self, state: &EngineState) {
        let subscribers = self.subscribers.read();

        let mut stats = self.stats.write();
        stats.total_published += 1;
        for (_, callback) in subscribers.iter() {
            callback(state.clone());
            stats.total_delivered += 1;
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn get_stats(&self) -> SnapshotBusStats {
        let mut stats = self.stats.read().clone();
        stats.subscriber_count = self.subscriber_count();
        stats
    }
}

impl Default for SnapshotBus {
    fn default() -> Self {
        Self::new()
    }
}
