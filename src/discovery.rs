//! The discovery pipeline (spec §4.2, C2): recursively scans a set of root
//! directories for plugin manifests, parses them permissively, and
//! deduplicates by id keeping the highest version.
//!
//! Grounded on the teacher's `loader::PluginDiscovery` (search-path-based
//! directory scan), generalized from a flat single-directory, extension-match
//! scan to a recursive manifest-file walk with per-file error accumulation,
//! matching the retrieval pack's `gini::PluginLoader::scan_for_manifests`
//! integration-test behavior (manifest file walk, restartable sweep,
//! dedup-by-id-keep-highest-version).
//!
//! Spec §4.2 steps 2-3 also require an artifact-only fallback: a directory
//! with no manifest is scanned for shared-library artifacts instead, probed
//! for a recognized entry point and synthesized into a minimal manifest.
//! The artifact scan (extension match per platform) is grounded on the
//! teacher's own `PluginDiscovery::is_plugin_library`/`discover`; the entry
//! point probe reuses `libloading` (already a C4 dependency) the same way
//! `validator::check_exported_symbols` does, rather than adding a
//! binary-parsing crate nothing else in the corpus uses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use semver::Version;

use crate::loader::PluginCreate;
use crate::manifest::{parse_manifest, DiscoveredPlugin, DiscoverySource, Manifest};

/// The manifest filename the discovery sweep looks for in every directory.
pub const MANIFEST_FILENAME: &str = "plugin.json";

/// Name prefixes (case-insensitive, after stripping a Unix `lib` prefix)
/// that mark a shared library as host/system-owned rather than a plugin
/// artifact, per spec §4.2 step 2.
const SYSTEM_LIBRARY_PREFIXES: &[&str] = &["system.", "microsoft."];

/// Conventional entry-point symbol names probed against an artifact that
/// has no manifest. `create_plugin` is this crate's own fixture convention
/// (see `demos/fixtures/minimal-plugin`); `_plugin_create` is the teacher's.
const ENTRY_POINT_CANDIDATES: &[&str] = &["create_plugin", "_plugin_create"];

/// One non-fatal failure encountered while scanning a single candidate
/// manifest file. Discovery never aborts the whole sweep on a bad file.
#[derive(Debug, Clone)]
pub struct DiscoveryError {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of one discovery sweep: the deduplicated plugin set plus any
/// per-file errors encountered along the way.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub plugins: Vec<DiscoveredPlugin>,
    pub errors: Vec<DiscoveryError>,
}

/// Recursively scans `roots` for manifest files.
pub struct Discovery {
    roots: Vec<PathBuf>,
}

impl Discovery {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Run a full sweep. Idempotent and restartable: scanning the same
    /// roots twice in a row without any filesystem change produces an
    /// identical report both times, and nothing about the scan depends on
    /// state left over from a previous run.
    pub fn scan(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for root in &self.roots {
            self.scan_dir(root, &mut report);
        }

        self.dedup_keep_highest_version(&mut report.plugins);
        report
    }

    fn scan_dir(&self, dir: &Path, report: &mut DiscoveryReport) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                report.errors.push(DiscoveryError {
                    path: dir.to_path_buf(),
                    reason: format!("could not read directory: {e}"),
                });
                return;
            }
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.scan_dir(&path, report);
                continue;
            }
            files.push(path);
        }

        let mut found_manifest = false;
        for path in &files {
            if path.file_name().and_then(|n| n.to_str()) == Some(MANIFEST_FILENAME) {
                found_manifest = true;
                self.scan_manifest_file(path, report);
            }
        }

        // Manifest-based records prefer the manifest; only fall back to
        // artifact scanning when this directory yielded none (spec §4.2).
        if !found_manifest {
            self.scan_artifacts_fallback(&files, report);
        }
    }

    fn scan_artifacts_fallback(&self, files: &[PathBuf], report: &mut DiscoveryReport) {
        for path in files {
            if !Self::is_plugin_artifact(path) {
                continue;
            }

            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if is_system_library_name(stem) {
                continue;
            }

            let Some(entry_point) = Self::probe_entry_point(path) else {
                // No recognized entry point: either an unrelated shared
                // library or a plugin artifact this discovery sweep can't
                // identify. Neither is an error; it's simply not a plugin.
                continue;
            };

            let manifest = synthesize_manifest(stem, path, &entry_point);
            tracing::debug!(plugin_id = %manifest.id, artifact = %path.display(), "discovered plugin artifact without manifest");
            report.plugins.push(DiscoveredPlugin {
                manifest,
                artifact_path: path.clone(),
                source: DiscoverySource::Artifact,
            });
        }
    }

    /// Extension-based plugin-artifact check, per platform, mirroring the
    /// teacher's `PluginDiscovery::is_plugin_library`.
    fn is_plugin_artifact(path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_lowercase();

        #[cfg(target_os = "windows")]
        {
            ext == "dll"
        }
        #[cfg(target_os = "macos")]
        {
            ext == "dylib"
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            ext == "so"
        }
    }

    /// Try each conventional entry-point symbol in turn; the first one that
    /// resolves in the artifact is the probe result.
    fn probe_entry_point(path: &Path) -> Option<String> {
        let lib = unsafe { libloading::Library::new(path).ok()? };
        for candidate in ENTRY_POINT_CANDIDATES {
            let resolved = unsafe { lib.get::<PluginCreate>(candidate.as_bytes()) };
            if resolved.is_ok() {
                return Some((*candidate).to_string());
            }
        }
        None
    }

    fn scan_manifest_file(&self, manifest_path: &Path, report: &mut DiscoveryReport) {
        let raw = match std::fs::read_to_string(manifest_path) {
            Ok(raw) => raw,
            Err(e) => {
                report.errors.push(DiscoveryError {
                    path: manifest_path.to_path_buf(),
                    reason: format!("could not read manifest: {e}"),
                });
                return;
            }
        };

        let manifest = match parse_manifest(&raw) {
            Ok(m) => m,
            Err(e) => {
                report.errors.push(DiscoveryError {
                    path: manifest_path.to_path_buf(),
                    reason: format!("manifest parse failed: {e}"),
                });
                return;
            }
        };

        let artifact_path = manifest_path
            .parent()
            .map(|dir| dir.join(&manifest.main_artifact))
            .unwrap_or_else(|| manifest.main_artifact.clone());

        tracing::debug!(plugin_id = %manifest.id, manifest = %manifest_path.display(), "discovered plugin manifest");

        report.plugins.push(DiscoveredPlugin {
            manifest,
            artifact_path,
            source: DiscoverySource::Manifest,
        });
    }

    /// When the same plugin id is discovered more than once (e.g. an old
    /// and a new copy under different roots), keep only the highest version.
    fn dedup_keep_highest_version(&self, plugins: &mut Vec<DiscoveredPlugin>) {
        let mut best: HashMap<String, usize> = HashMap::new();

        for (idx, plugin) in plugins.iter().enumerate() {
            match best.get(&plugin.manifest.id) {
                Some(&existing_idx) => {
                    if plugin.manifest.version > plugins[existing_idx].manifest.version {
                        best.insert(plugin.manifest.id.clone(), idx);
                    }
                }
                None => {
                    best.insert(plugin.manifest.id.clone(), idx);
                }
            }
        }

        let mut kept_indices: Vec<usize> = best.values().copied().collect();
        kept_indices.sort_unstable();

        let mut kept = Vec::with_capacity(kept_indices.len());
        for idx in kept_indices {
            kept.push(plugins[idx].clone());
        }
        *plugins = kept;
    }
}

/// Whether `stem` (a candidate artifact's filename without extension)
/// matches a system-library prefix, after stripping a Unix `lib` prefix so
/// `libSystem.Core.so` matches the same way `System.Core.dll` does.
fn is_system_library_name(stem: &str) -> bool {
    let normalized = stem.strip_prefix("lib").unwrap_or(stem).to_lowercase();
    SYSTEM_LIBRARY_PREFIXES
        .iter()
        .any(|prefix| normalized.starts_with(prefix))
}

/// Build a minimal manifest for an artifact discovered without one: the
/// artifact's own filename stem stands in for id/name, and the probed
/// symbol becomes the entry point. Host-compatibility bounds are left
/// maximally permissive since there is no declared `min_host_version` to
/// trust.
fn synthesize_manifest(id: &str, artifact_path: &Path, entry_point: &str) -> Manifest {
    Manifest {
        id: id.to_string(),
        name: id.to_string(),
        version: Version::new(0, 0, 0),
        main_artifact: artifact_path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| artifact_path.to_path_buf()),
        entry_point: entry_point.to_string(),
        min_host_version: Version::new(0, 0, 0),
        max_host_version: None,
        supported_platforms: vec![],
        dependencies: vec![],
        runtime_dependencies: vec![],
        capabilities: Default::default(),
        health_check: Default::default(),
        permissions: vec![],
        tags: vec![],
        configuration_schema: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_manifest(dir: &Path, id: &str, version: &str) {
        let content = format!(
            r#"{{
                "id": "{id}",
                "name": "{id}",
                "version": "{version}",
                "main_artifact": "plugin.so",
                "entry_point": "create_plugin",
                "min_host_version": "0.1.0"
            }}"#
        );
        fs::write(dir.join(MANIFEST_FILENAME), content).unwrap();
        fs::write(dir.join("plugin.so"), b"stub").unwrap();
    }

    #[test]
    fn discovers_manifests_recursively() {
        let root = tempdir().unwrap();
        let sub = root.path().join("nested").join("plugin-a");
        fs::create_dir_all(&sub).unwrap();
        write_manifest(&sub, "plugin-a", "1.0.0");

        let discovery = Discovery::new(vec![root.path().to_path_buf()]);
        let report = discovery.scan();

        assert_eq!(report.plugins.len(), 1);
        assert_eq!(report.plugins[0].manifest.id, "plugin-a");
        assert!(report.errors.is_empty());
    }

    #[test]
    fn dedups_keeping_highest_version() {
        let root = tempdir().unwrap();
        let old = root.path().join("old");
        let new = root.path().join("new");
        fs::create_dir_all(&old).unwrap();
        fs::create_dir_all(&new).unwrap();
        write_manifest(&old, "plugin-a", "1.0.0");
        write_manifest(&new, "plugin-a", "2.0.0");

        let discovery = Discovery::new(vec![root.path().to_path_buf()]);
        let report = discovery.scan();

        assert_eq!(report.plugins.len(), 1);
        assert_eq!(report.plugins[0].manifest.version, semver::Version::new(2, 0, 0));
    }

    #[test]
    fn bad_manifest_is_reported_but_does_not_abort_sweep() {
        let root = tempdir().unwrap();
        let bad = root.path().join("bad");
        let good = root.path().join("good");
        fs::create_dir_all(&bad).unwrap();
        fs::create_dir_all(&good).unwrap();
        fs::write(bad.join(MANIFEST_FILENAME), "{ not json").unwrap();
        write_manifest(&good, "plugin-a", "1.0.0");

        let discovery = Discovery::new(vec![root.path().to_path_buf()]);
        let report = discovery.scan();

        assert_eq!(report.plugins.len(), 1);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn scan_is_idempotent() {
        let root = tempdir().unwrap();
        write_manifest(root.path(), "plugin-a", "1.0.0");

        let discovery = Discovery::new(vec![root.path().to_path_buf()]);
        let first = discovery.scan();
        let second = discovery.scan();

        assert_eq!(first.plugins.len(), second.plugins.len());
        assert_eq!(first.plugins[0].manifest.id, second.plugins[0].manifest.id);
    }

    #[test]
    fn system_library_names_are_skipped_with_or_without_lib_prefix() {
        assert!(is_system_library_name("System.Core"));
        assert!(is_system_library_name("Microsoft.Extensions.Logging"));
        assert!(is_system_library_name("libSystem.Core"));
        assert!(!is_system_library_name("my_plugin"));
    }

    #[test]
    fn artifact_without_resolvable_entry_point_is_silently_skipped() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("unrelated.so"), b"not a real shared library").unwrap();

        let discovery = Discovery::new(vec![root.path().to_path_buf()]);
        let report = discovery.scan();

        assert!(report.plugins.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn manifest_present_suppresses_artifact_fallback_in_same_directory() {
        let root = tempdir().unwrap();
        write_manifest(root.path(), "plugin-a", "1.0.0");
        fs::write(root.path().join("leftover.so"), b"not a real shared library").unwrap();

        let discovery = Discovery::new(vec![root.path().to_path_buf()]);
        let report = discovery.scan();

        assert_eq!(report.plugins.len(), 1);
        assert_eq!(report.plugins[0].manifest.id, "plugin-a");
        assert_eq!(report.plugins[0].source, DiscoverySource::Manifest);
    }
}
