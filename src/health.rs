//! Periodic health-check scheduling (spec §4.7 "Health monitoring"): if
//! enabled, invokes `check_health` for every `Running` plugin at its
//! manifest-declared interval.
//!
//! Grounded on the teacher's `hotreload::HotReloadManager` background-task
//! pattern (a long-lived `tokio::spawn`ed loop driven by timers, reporting
//! back through a channel) generalized from filesystem events to a
//! per-plugin interval timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::traits::CancellationToken;

/// A request, emitted on the scheduler's channel, asking the supervisor to
/// run a health check for one plugin.
pub struct HealthCheckRequest {
    pub plugin_id: String,
}

/// Drives one `tokio::time::interval` timer per `Running` plugin, emitting
/// `HealthCheckRequest`s. Does not call `Plugin::health` itself: only the
/// supervisor holds the registry lock discipline and the plugin boundary
/// needed to make that call safely.
pub struct HealthScheduler {
    tx: UnboundedSender<HealthCheckRequest>,
    handles: HashMap<String, JoinHandle<()>>,
}

impl HealthScheduler {
    pub fn new() -> (Self, UnboundedReceiver<HealthCheckRequest>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                tx,
                handles: HashMap::new(),
            },
            rx,
        )
    }

    /// Start (or restart) periodic health checks for `plugin_id` at
    /// `interval`. Stops automatically once `cancel` fires.
    pub fn schedule(&mut self, plugin_id: String, interval: Duration, cancel: CancellationToken) {
        self.unschedule(&plugin_id);

        let tx = self.tx.clone();
        let task_plugin_id = plugin_id.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(HealthCheckRequest { plugin_id: task_plugin_id.clone() }).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        self.handles.insert(plugin_id, handle);
    }

    pub fn unschedule(&mut self, plugin_id: &str) {
        if let Some(handle) = self.handles.remove(plugin_id) {
            handle.abort();
        }
    }

    pub fn unschedule_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl Drop for HealthScheduler {
    fn drop(&mut self) {
        self.unschedule_all();
    }
}

/// Evaluates consecutive pass/fail counts against a manifest's
/// `failure_threshold`/`success_threshold` to decide whether a health
/// transition should actually flip the reported status (spec §3: health
/// is `Unknown|Healthy|Degraded|Unhealthy`; spec §8 scenario 6: a single
/// `Unhealthy` reading must be reflected without the supervisor unloading
/// the plugin automatically — threshold logic itself lives in
/// `registry::Registry::record_health`). This type exists only to make the
/// scheduler's relationship to that registry call legible.
pub struct HealthPolicy {
    pub failure_threshold: u32,
    pub success_threshold: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 1,
            success_threshold: 1,
        }
    }
}

impl From<&crate::manifest::HealthCheckConfig> for HealthPolicy {
    fn from(cfg: &crate::manifest::HealthCheckConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold,
            success_threshold: cfg.success_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scheduler_emits_requests_on_interval() {
        let (mut scheduler, mut rx) = HealthScheduler::new();
        let cancel = CancellationToken::new();
        scheduler.schedule("a".to_string(), Duration::from_millis(10), cancel.clone());

        let request = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("should receive before timeout")
            .expect("channel should be open");

        assert_eq!(request.plugin_id, "a");
        cancel.cancel();
    }

    #[tokio::test]
    async fn unschedule_stops_further_requests() {
        let (mut scheduler, mut rx) = HealthScheduler::new();
        let cancel = CancellationToken::new();
        scheduler.schedule("a".to_string(), Duration::from_millis(10), cancel);
        scheduler.unschedule("a");

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err());
    }
}
