//! Permission-based capability checking for loaded plugins.
//!
//! Grounded on the teacher's `isolation::Sandbox`/`Capability` (per-plugin
//! capability set plus filesystem allow/deny lists); the teacher's
//! `ResourceMonitor` (memory/CPU/thread/network quota tracking) is dropped
//! — the specification's Non-goals explicitly exclude network quotas and
//! name no other resource-quota enforcement, so carrying that machinery
//! would add an unrequested feature. What remains maps `Manifest.permissions`
//! (a field the data model names but never otherwise enforces) onto actual
//! access decisions for plugin code running inside its isolation boundary.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{PluginError, PluginResult};

/// A capability a plugin may be granted, derived from its manifest's
/// `permissions` strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    FileSystemRead,
    FileSystemWrite,
    Network,
    ProcessSpawn,
    Custom(String),
}

impl Capability {
    /// Parse a manifest permission string (e.g. `"fs:read"`, `"network"`)
    /// into a `Capability`. Unknown strings become `Custom` rather than a
    /// parse error, since the permission vocabulary is host-extensible.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "fs:read" => Capability::FileSystemRead,
            "fs:write" => Capability::FileSystemWrite,
            "network" => Capability::Network,
            "process:spawn" => Capability::ProcessSpawn,
            other => Capability::Custom(other.to_string()),
        }
    }
}

/// Filesystem path allow/deny rules applied within a sandbox.
#[derive(Debug, Clone, Default)]
pub struct FileSystemRestrictions {
    pub allowed_paths: Vec<String>,
    pub denied_paths: Vec<String>,
}

impl FileSystemRestrictions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_path(mut self, path: impl Into<String>) -> Self {
        self.allowed_paths.push(path.into());
        self
    }

    pub fn deny_path(mut self, path: impl Into<String>) -> Self {
        self.denied_paths.push(path.into());
        self
    }
}

/// The capability set and filesystem rules one plugin runs under, derived
/// from its manifest's `permissions` at validate/load time.
pub struct Sandbox {
    plugin_id: String,
    capabilities: HashSet<Capability>,
    fs_restrictions: FileSystemRestrictions,
}

impl Sandbox {
    pub fn from_permissions(plugin_id: impl Into<String>, permissions: &[String]) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            capabilities: permissions.iter().map(|p| Capability::parse(p)).collect(),
            fs_restrictions: FileSystemRestrictions::default(),
        }
    }

    pub fn set_fs_restrictions(&mut self, restrictions: FileSystemRestrictions) {
        self.fs_restrictions = restrictions;
    }

    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Require a capability; raises `AccessDenied` rather than returning a
    /// boolean, matching the `require`-raises / `get`-returns-nothing
    /// convention standardized for service resolution (spec §9).
    pub fn require_capability(&self, capability: &Capability) -> PluginResult<()> {
        if self.has_capability(capability) {
            Ok(())
        } else {
            Err(PluginError::AccessDenied {
                plugin_id: self.plugin_id.clone(),
                service_type: format!("{:?}", capability),
                reason: "capability not declared in manifest permissions".to_string(),
            })
        }
    }

    pub fn check_fs_access(&self, path: &Path) -> PluginResult<()> {
        let path_str = path.to_string_lossy();

        for denied in &self.fs_restrictions.denied_paths {
            if path_str.starts_with(denied.as_str()) {
                return Err(PluginError::AccessDenied {
                    plugin_id: self.plugin_id.clone(),
                    service_type: "filesystem".to_string(),
                    reason: format!("path '{}' is on the deny list", path_str),
                });
            }
        }

        if self.fs_restrictions.allowed_paths.is_empty() {
            return Ok(());
        }

        if self
            .fs_restrictions
            .allowed_paths
            .iter()
            .any(|allowed| path_str.starts_with(allowed.as_str()))
        {
            Ok(())
        } else {
            Err(PluginError::AccessDenied {
                plugin_id: self.plugin_id.clone(),
                service_type: "filesystem".to_string(),
                reason: format!("path '{}' is not in the allow list", path_str),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_declared_capability() {
        let sandbox = Sandbox::from_permissions("p", &["network".to_string()]);
        assert!(sandbox.require_capability(&Capability::Network).is_ok());
    }

    #[test]
    fn denies_undeclared_capability() {
        let sandbox = Sandbox::from_permissions("p", &[]);
        let err = sandbox.require_capability(&Capability::Network).unwrap_err();
        assert!(matches!(err, PluginError::AccessDenied { .. }));
    }

    #[test]
    fn fs_allow_list_denies_paths_outside_it() {
        let mut sandbox = Sandbox::from_permissions("p", &["fs:read".to_string()]);
        sandbox.set_fs_restrictions(FileSystemRestrictions::new().allow_path("/plugins/p"));
        assert!(sandbox.check_fs_access(Path::new("/plugins/p/data.db")).is_ok());
        assert!(sandbox.check_fs_access(Path::new("/etc/passwd")).is_err());
    }
}
