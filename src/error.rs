//! Error taxonomy for the plugin lifecycle core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type returned by every public operation in this crate.
pub type PluginResult<T> = Result<T, PluginError>;

/// The full error taxonomy described by the plugin lifecycle specification.
///
/// Recoverable conditions are always returned as a value here; a process-fatal
/// condition (registry corruption) is the one case the core panics on, since
/// it indicates an invariant was already broken before the caller could see it.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A manifest failed structural, compatibility, or dependency validation.
    #[error("manifest for plugin '{id}' is invalid: {reason}")]
    ManifestInvalid { id: String, reason: String },

    /// A plugin failed one or more validator checks and was never loaded.
    #[error("validation failed for plugin '{id}': {reason}")]
    ValidationFailed { id: String, reason: String },

    /// Loading the plugin's artifact into its isolation boundary failed.
    #[error("failed to load plugin '{id}' from {path}: {reason}")]
    LoadFailed {
        id: String,
        path: PathBuf,
        reason: String,
    },

    /// A lifecycle stage failed during initialization or uninitialization.
    #[error("lifecycle stage failed for plugin '{id}' at stage {phase}: {reason}")]
    InitializationFailed {
        id: String,
        phase: crate::lifecycle::LifecycleStage,
        reason: String,
    },

    /// A stage's configured deadline elapsed before it completed.
    #[error("operation timed out for plugin '{id}'")]
    Timeout { id: String },

    /// A DI resolution was denied by the isolation policy.
    #[error("access denied for plugin '{plugin_id}' to service '{service_type}': {reason}")]
    AccessDenied {
        plugin_id: String,
        service_type: String,
        reason: String,
    },

    /// The registry already holds a record for this plugin id.
    #[error("plugin '{0}' is already registered")]
    AlreadyExists(String),

    /// Dependency resolution found a cycle among declared dependencies.
    #[error("circular dependency detected: {0}")]
    CircularDependency(String),

    /// A hot operation targeted a plugin id not present in the registry.
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    /// A disposal step failed; collected, never aborts a teardown.
    #[error("disposal warning for plugin '{id}': {reason}")]
    DisposalWarning { id: String, reason: String },

    /// The requested registry transition's source state didn't match.
    #[error("invalid state transition for plugin '{id}': from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// Dependency declaration referenced a plugin or version that can't be satisfied.
    #[error("dependency error for plugin '{id}': {reason}")]
    DependencyError { id: String, reason: String },

    /// Failed to load a native library.
    #[error("failed to load library from {path}: {source}")]
    LibraryLoadError {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// Configuration error (schema mismatch, missing field, write failure).
    #[error("configuration error for plugin '{id}': {reason}")]
    ConfigError { id: String, reason: String },

    /// Hot-reload machinery failed.
    #[error("hot-reload failed for plugin '{id}': {reason}")]
    HotReloadError { id: String, reason: String },

    /// I/O failure (discovery sweep, manifest read, artifact read, config persist).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A version or version-range string did not parse.
    #[error("version parse error: {0}")]
    VersionParse(String),

    /// Registry invariant broken beyond recovery. Never returned to callers
    /// under normal operation; reserved for the one process-fatal condition
    /// the specification calls out.
    #[error("registry corruption detected: {0}")]
    RegistryCorruption(String),

    /// Catch-all for conditions that don't fit a more specific variant.
    #[error("plugin error: {0}")]
    Generic(String),
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        PluginError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PluginError {
    fn from(err: toml::de::Error) -> Self {
        PluginError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for PluginError {
    fn from(err: toml::ser::Error) -> Self {
        PluginError::Serialization(err.to_string())
    }
}

impl From<semver::Error> for PluginError {
    fn from(err: semver::Error) -> Self {
        PluginError::VersionParse(err.to_string())
    }
}

impl From<notify::Error> for PluginError {
    fn from(err: notify::Error) -> Self {
        PluginError::HotReloadError {
            id: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}
