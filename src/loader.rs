//! The isolated loader (spec §4.4, C4): loads one plugin's artifact into its
//! own isolation boundary, sharing only a host-declared "published surface"
//! and resolving every other type from the plugin's own artifact.
//!
//! Grounded on the teacher's `loader::DynamicLoader` (per-library
//! `libloading::Library` ownership, `_plugin_create` entry symbol) and
//! `SafePluginLoader` (path allow-list before load); the isolation boundary
//! here is each loaded `Library` plus the `Plugin` trait object it produced,
//! instead of the teacher's shared `Vec<Arc<Library>>` pool, so one
//! plugin's boundary can be dropped (and its library unloaded) independently
//! of every other plugin.

use libloading::{Library, Symbol};
use std::any::TypeId;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PluginError, PluginResult};
use crate::manifest::Manifest;
use crate::traits::Plugin;

/// Factory function signature every plugin artifact must export under the
/// manifest's declared `entry_point` symbol name.
pub type PluginCreate = unsafe extern "C" fn() -> *mut dyn Plugin;

/// The set of host types a plugin is permitted to see, fixed at host
/// construction time (spec §9 DESIGN NOTES, Open Question 1: published
/// surface is host-constructed and build-time-fixed, not runtime-negotiated).
#[derive(Clone, Default)]
pub struct PublishedSurface {
    allowed: HashSet<TypeId>,
}

impl PublishedSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish<T: 'static>(mut self) -> Self {
        self.allowed.insert(TypeId::of::<T>());
        self
    }

    pub fn is_published<T: 'static>(&self) -> bool {
        self.allowed.contains(&TypeId::of::<T>())
    }
}

/// The exclusive isolation boundary for one loaded plugin: the native
/// library (kept alive for the plugin instance's whole lifetime) and the
/// `Plugin` trait object it produced. Dropping this unloads the library.
pub struct LoadedBoundary {
    plugin: tokio::sync::Mutex<Box<dyn Plugin>>,
    _library: Library,
}

impl std::fmt::Debug for LoadedBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedBoundary").finish_non_exhaustive()
    }
}

impl LoadedBoundary {
    /// An async mutex: the guard is held across the module call's `.await`
    /// in every lifecycle stage, and a non-async guard there would make
    /// those futures `!Send`, breaking
    /// `tokio::spawn(supervisor.run_health_consumer(..))`.
    pub async fn plugin(&self) -> tokio::sync::MutexGuard<'_, Box<dyn Plugin>> {
        self.plugin.lock().await
    }
}

/// Loads plugin artifacts into per-plugin isolation boundaries, checking the
/// artifact against allowed search paths and the published surface before
/// resolving the entry point.
pub struct IsolatedLoader {
    surface: PublishedSurface,
    allowed_paths: Vec<PathBuf>,
}

impl IsolatedLoader {
    pub fn new(surface: PublishedSurface) -> Self {
        Self {
            surface,
            allowed_paths: Vec::new(),
        }
    }

    pub fn allow_path(&mut self, path: PathBuf) {
        self.allowed_paths.push(path);
    }

    pub fn published_surface(&self) -> &PublishedSurface {
        &self.surface
    }

    /// Load `manifest`'s artifact into a fresh isolation boundary. Any
    /// failure is reported as a structured `LoadFailed`, never a process
    /// abort (spec §4.4: "load-time `LoadFailed` on mismatch, never UB").
    pub fn load(&self, manifest: &Manifest, artifact_path: &Path) -> PluginResult<LoadedBoundary> {
        if !self.allowed_paths.is_empty()
            && !self
                .allowed_paths
                .iter()
                .any(|allowed| artifact_path.starts_with(allowed))
        {
            return Err(PluginError::LoadFailed {
                id: manifest.id.clone(),
                path: artifact_path.to_path_buf(),
                reason: "artifact path is outside the allowed search paths".to_string(),
            });
        }

        if !artifact_path.exists() {
            return Err(PluginError::LoadFailed {
                id: manifest.id.clone(),
                path: artifact_path.to_path_buf(),
                reason: "artifact file does not exist".to_string(),
            });
        }

        tracing::info!(plugin_id = %manifest.id, path = %artifact_path.display(), "loading plugin artifact");

        let library = unsafe {
            Library::new(artifact_path).map_err(|e| PluginError::LibraryLoadError {
                path: artifact_path.to_path_buf(),
                source: e,
            })?
        };

        let entry_symbol = manifest.entry_point.as_bytes();
        let create: Symbol<PluginCreate> = unsafe {
            library
                .get(entry_symbol)
                .map_err(|e| PluginError::LoadFailed {
                    id: manifest.id.clone(),
                    path: artifact_path.to_path_buf(),
                    reason: format!(
                        "entry point '{}' not resolvable: {e}",
                        manifest.entry_point
                    ),
                })?
        };

        let plugin_ptr = unsafe { create() };
        if plugin_ptr.is_null() {
            return Err(PluginError::LoadFailed {
                id: manifest.id.clone(),
                path: artifact_path.to_path_buf(),
                reason: "entry point returned a null plugin pointer".to_string(),
            });
        }
        let plugin: Box<dyn Plugin> = unsafe { Box::from_raw(plugin_ptr) };

        tracing::info!(plugin_id = %manifest.id, "plugin artifact loaded");

        Ok(LoadedBoundary {
            plugin: tokio::sync::Mutex::new(plugin),
            _library: library,
        })
    }
}
