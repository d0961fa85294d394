//! Hot-reload file watching (ambient enrichment grounded on spec §4.7's
//! reload semantics plus the manifest's `supports_hot_reload` capability
//! flag — spec.md leaves the trigger source for `reload_one` unspecified,
//! so filesystem change notification is the concrete form of it).
//!
//! Grounded on the teacher's `HotReloadManager`, trimmed from its direct
//! ownership of a `LifecycleManager` + `DynamicLoader` pair down to a
//! decoupled producer: the watcher only emits plugin ids whose artifact
//! changed onto a channel, and the supervisor (C7, the only component
//! allowed to mutate the registry) decides whether and how to act on it.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::{PluginError, PluginResult};

/// Watches each hot-reload-capable plugin's artifact path and emits its id
/// on the returned receiver whenever the artifact changes, debounced so a
/// burst of filesystem events collapses into a single reload trigger.
pub struct HotReloadWatcher {
    watcher: RecommendedWatcher,
    watched: HashMap<String, PathBuf>,
    debounce: Duration,
    last_fired: HashMap<String, Instant>,
}

impl HotReloadWatcher {
    /// Build a watcher and its event receiver. The receiver yields plugin
    /// ids, already debounced; callers read it in a loop and call
    /// `Supervisor::reload_one` for each id received.
    pub fn new(debounce: Duration) -> PluginResult<(Self, UnboundedReceiver<Event>)> {
        let (tx, rx) = unbounded_channel();
        let watcher = Self::build_watcher(tx)?;
        Ok((
            Self {
                watcher,
                watched: HashMap::new(),
                debounce,
                last_fired: HashMap::new(),
            },
            rx,
        ))
    }

    fn build_watcher(tx: UnboundedSender<Event>) -> PluginResult<RecommendedWatcher> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })?;
        Ok(watcher)
    }

    pub fn watch(&mut self, plugin_id: &str, artifact_path: &PathBuf) -> PluginResult<()> {
        self.watcher
            .watch(artifact_path, RecursiveMode::NonRecursive)
            .map_err(|e| PluginError::HotReloadError {
                id: plugin_id.to_string(),
                reason: e.to_string(),
            })?;
        self.watched
            .insert(plugin_id.to_string(), artifact_path.clone());
        Ok(())
    }

    pub fn unwatch(&mut self, plugin_id: &str) -> PluginResult<()> {
        if let Some(path) = self.watched.remove(plugin_id) {
            self.watcher
                .unwatch(&path)
                .map_err(|e| PluginError::HotReloadError {
                    id: plugin_id.to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Translate a raw filesystem event into a debounced plugin id, if the
    /// changed path belongs to a watched plugin and the debounce window has
    /// elapsed since the last trigger for that plugin.
    pub fn resolve_event(&mut self, event: &Event) -> Option<String> {
        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            return None;
        }

        let plugin_id = event.paths.iter().find_map(|changed| {
            self.watched
                .iter()
                .find(|(_, watched_path)| *watched_path == changed)
                .map(|(id, _)| id.clone())
        })?;

        let now = Instant::now();
        if let Some(last) = self.last_fired.get(&plugin_id) {
            if now.duration_since(*last) < self.debounce {
                return None;
            }
        }
        self.last_fired.insert(plugin_id.clone(), now);
        Some(plugin_id)
    }
}
