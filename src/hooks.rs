//! Lifecycle event publication (ambient enrichment: spec §1 places telemetry
//! sinks out of scope as an external collaborator, but something inside the
//! core has to be the seam that host observability hooks into).
//!
//! Grounded on the teacher's `HookManager`, trimmed from its general-purpose
//! named-hook-plus-middleware bus (`ipc.rs`/"framework event" territory
//! outside this spec's module capability set) down to the fixed set of
//! lifecycle events the supervisor actually emits: `loaded`, `started`,
//! `stopped`, `unloaded`, `failed`. Keeps the `DashMap`-backed registry
//! style for the same lock-free-read reason as `registry.rs`.

use dashmap::DashMap;
use std::sync::Arc;

use crate::registry::PluginStatus;

/// One lifecycle transition the supervisor publishes.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub plugin_id: String,
    pub status: PluginStatus,
    pub detail: Option<String>,
}

type Listener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Publishes `LifecycleEvent`s to any number of registered listeners.
/// Listener callbacks are synchronous and must not block; a listener that
/// wants to do async work should hand the event off to its own channel.
#[derive(Default)]
pub struct HookManager {
    listeners: DashMap<u64, Listener>,
    next_id: std::sync::atomic::AtomicU64,
}

/// A handle that unregisters its listener when dropped.
pub struct ListenerHandle {
    id: u64,
    manager: Arc<HookManager>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.manager.listeners.remove(&self.id);
    }
}

impl HookManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&LifecycleEvent) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.listeners.insert(id, Arc::new(listener));
        ListenerHandle {
            id,
            manager: self.clone(),
        }
    }

    pub fn publish(&self, event: LifecycleEvent) {
        tracing::info!(
            plugin_id = %event.plugin_id,
            status = %event.status,
            detail = ?event.detail,
            "lifecycle event"
        );
        for listener in self.listeners.iter() {
            (listener.value())(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn publishes_to_every_subscriber() {
        let manager = HookManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let _handle = manager.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        manager.publish(LifecycleEvent {
            plugin_id: "a".to_string(),
            status: PluginStatus::Running,
            detail: None,
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_handle_stops_delivery() {
        let manager = HookManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handle = manager.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        drop(handle);

        manager.publish(LifecycleEvent {
            plugin_id: "a".to_string(),
            status: PluginStatus::Running,
            detail: None,
        });

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
