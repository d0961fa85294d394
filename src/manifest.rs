//! Plugin manifest data model (spec §3, §6).
//!
//! A manifest is the declarative metadata shipped alongside a plugin
//! artifact. It is parsed permissively: comments and trailing commas are
//! stripped before the remainder is handed to `serde_json`, since the
//! manifest file format is case-insensitive JSON-with-comments rather than
//! strict JSON.

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{PluginError, PluginResult};

/// Declarative metadata shipped with each plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Unique, non-empty plugin identifier.
    pub id: String,

    /// Human-readable plugin name.
    pub name: String,

    /// Plugin version (parseable three-part semantic version).
    pub version: Version,

    /// Path to the main artifact, relative to the manifest's directory.
    pub main_artifact: PathBuf,

    /// Symbol name of the entry point within the artifact.
    pub entry_point: String,

    /// Minimum host version this plugin supports.
    pub min_host_version: Version,

    /// Maximum host version this plugin supports (absent = unbounded).
    #[serde(default)]
    pub max_host_version: Option<Version>,

    /// Platforms this plugin supports; empty means all platforms.
    #[serde(default)]
    pub supported_platforms: Vec<String>,

    /// Declared dependencies on other plugins.
    #[serde(default)]
    pub dependencies: Vec<ManifestDependency>,

    /// Opaque references to external packages (no protocol implemented; see DESIGN.md).
    #[serde(default)]
    pub runtime_dependencies: Vec<String>,

    /// Declared capability flags.
    #[serde(default)]
    pub capabilities: Capabilities,

    /// Health-check configuration.
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Declared permissions the plugin requests.
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Free-form tags/categories.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Opaque JSON schema describing the plugin's own configuration shape.
    #[serde(default)]
    pub configuration_schema: Option<serde_json::Value>,
}

/// A single dependency on another plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDependency {
    /// The depended-upon plugin's id.
    pub id: String,

    /// Minimum acceptable version of the dependency, if constrained.
    #[serde(default)]
    pub min_version: Option<Version>,

    /// Maximum acceptable version of the dependency, if constrained.
    #[serde(default)]
    pub max_version: Option<Version>,

    /// Whether the host may proceed without this dependency present.
    #[serde(default)]
    pub optional: bool,
}

impl ManifestDependency {
    /// Build a `VersionReq` from the dependency's min/max bounds. A
    /// dependency with no bounds accepts any version.
    pub fn version_req(&self) -> PluginResult<VersionReq> {
        let expr = match (&self.min_version, &self.max_version) {
            (Some(min), Some(max)) => format!(">={}, <={}", min, max),
            (Some(min), None) => format!(">={}", min),
            (None, Some(max)) => format!("<={}", max),
            (None, None) => "*".to_string(),
        };
        VersionReq::parse(&expr).map_err(|e| PluginError::DependencyError {
            id: self.id.clone(),
            reason: format!("unparsable version range: {e}"),
        })
    }

    /// Whether `candidate` satisfies this dependency's version bounds.
    pub fn is_satisfied_by(&self, candidate: &Version) -> bool {
        if let Some(min) = &self.min_version {
            if candidate < min {
                return false;
            }
        }
        if let Some(max) = &self.max_version {
            if candidate > max {
                return false;
            }
        }
        true
    }
}

/// Declared plugin capability flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub supports_hot_reload: bool,
    #[serde(default)]
    pub supports_config_reload: bool,
    #[serde(default)]
    pub provides_web_endpoints: bool,
    #[serde(default)]
    pub provides_background_work: bool,
    #[serde(default)]
    pub requires_elevated_permissions: bool,
}

/// Health-check scheduling configuration for a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_threshold")]
    pub success_threshold: u32,
}

fn default_true() -> bool {
    true
}
fn default_health_interval_secs() -> u64 {
    30
}
fn default_health_timeout_secs() -> u64 {
    5
}
fn default_threshold() -> u32 {
    1
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_health_interval_secs(),
            timeout_secs: default_health_timeout_secs(),
            failure_threshold: default_threshold(),
            success_threshold: default_threshold(),
        }
    }
}

/// Where a `DiscoveredPlugin` was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoverySource {
    Manifest,
    Artifact,
    Package,
    Config,
}

/// A manifest plus its resolved artifact location, as produced by discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPlugin {
    pub manifest: Manifest,
    pub artifact_path: PathBuf,
    pub source: DiscoverySource,
}

/// Strip `//` line comments, `/* */` block comments, and trailing commas
/// from a JSON-ish document so it can be parsed with `serde_json`.
///
/// This is deliberately simple: it does not understand comment markers
/// inside string literals that themselves contain `"` escapes beyond the
/// ordinary backslash-escape rule, which is sufficient for manifest files.
pub fn strip_json_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            _ => out.push(c),
        }
    }

    strip_trailing_commas(&out)
}

fn strip_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == ',' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_whitespace() {
                j += 1;
            }
            if j < bytes.len() && (bytes[j] == '}' || bytes[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Parse a manifest from a permissive-JSON document, matching case
/// insensitively on the required keys the specification names
/// (`id`, `name`, `version`, `mainAssembly`, `entryPoint`).
pub fn parse_manifest(raw: &str) -> PluginResult<Manifest> {
    let cleaned = strip_json_comments(raw);
    let mut value: serde_json::Value = serde_json::from_str(&cleaned)?;
    lowercase_known_keys(&mut value);
    serde_json::from_value(value).map_err(PluginError::from)
}

/// The manifest format's keys are documented as case-insensitive and use a
/// different external spelling (`mainAssembly`) than our internal field
/// name (`main_artifact`). Lowercase every incoming key and look it up
/// against the canonical lowercase name, rather than matching a fixed list
/// of casing variants (which misses e.g. `MainAssembly`/`MAINASSEMBLY`).
fn lowercase_known_keys(value: &mut serde_json::Value) {
    const CANONICAL: &[(&str, &str)] = &[
        ("mainassembly", "main_artifact"),
        ("main_artifact", "main_artifact"),
        ("entrypoint", "entry_point"),
        ("entry_point", "entry_point"),
        ("minhostversion", "min_host_version"),
        ("min_host_version", "min_host_version"),
        ("maxhostversion", "max_host_version"),
        ("max_host_version", "max_host_version"),
        ("supportedplatforms", "supported_platforms"),
        ("supported_platforms", "supported_platforms"),
        ("runtimedependencies", "runtime_dependencies"),
        ("runtime_dependencies", "runtime_dependencies"),
        ("healthcheck", "health_check"),
        ("health_check", "health_check"),
        ("configurationschema", "configuration_schema"),
        ("configuration_schema", "configuration_schema"),
    ];

    if let serde_json::Value::Object(map) = value {
        let lookup: HashMap<&str, &str> = CANONICAL.iter().copied().collect();
        let entries: Vec<(String, serde_json::Value)> = std::mem::take(map).into_iter().collect();
        for (key, val) in entries {
            let canonical = lookup
                .get(key.to_lowercase().as_str())
                .copied()
                .unwrap_or(key.as_str())
                .to_string();
            map.insert(canonical, val);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_comments_and_trailing_commas() {
        let raw = r#"{
            // a comment
            "id": "demo", /* inline */
            "name": "Demo",
            "version": "1.0.0",
            "mainAssembly": "demo.so",
            "entryPoint": "DemoPlugin",
            "minHostVersion": "0.1.0",
            "tags": ["a", "b",],
        }"#;
        let manifest = parse_manifest(raw).unwrap();
        assert_eq!(manifest.id, "demo");
        assert_eq!(manifest.tags, vec!["a", "b"]);
        assert_eq!(manifest.version, Version::new(1, 0, 0));
    }

    #[test]
    fn dependency_version_bounds() {
        let dep = ManifestDependency {
            id: "a".into(),
            min_version: Some(Version::new(1, 0, 0)),
            max_version: Some(Version::new(2, 0, 0)),
            optional: false,
        };
        assert!(dep.is_satisfied_by(&Version::new(1, 5, 0)));
        assert!(!dep.is_satisfied_by(&Version::new(0, 9, 0)));
        assert!(!dep.is_satisfied_by(&Version::new(2, 0, 1)));
    }

    #[test]
    fn matches_key_casing_not_in_the_fixed_list() {
        let raw = r#"{
            "id": "demo",
            "name": "Demo",
            "version": "1.0.0",
            "MAINASSEMBLY": "demo.so",
            "EntryPoint": "DemoPlugin",
            "MinHostVersion": "0.1.0"
        }"#;
        let manifest = parse_manifest(raw).unwrap();
        assert_eq!(manifest.main_artifact, PathBuf::from("demo.so"));
        assert_eq!(manifest.entry_point, "DemoPlugin");
    }

    #[test]
    fn missing_required_field_fails() {
        let raw = r#"{ "name": "no id" }"#;
        assert!(parse_manifest(raw).is_err());
    }
}
