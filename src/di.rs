//! Hierarchical dependency injection and the per-plugin isolation policy
//! (spec §4.5, C5).
//!
//! Each plugin is given a child `ServiceProvider` layered over the host's
//! root provider. Resolution tries the child's own declared set first, then
//! asks the parent — but only after the `IsolationPolicy` has authorized
//! `(plugin_id, service_type)`. Grounded on the teacher's
//! `isolation::Sandbox`/`Capability` access-check shape, generalized from
//! filesystem capabilities to arbitrary service types, and on
//! `hooks::HookManager`'s `DashMap`-backed registry for the O(1) decision
//! cache.

use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{PluginError, PluginResult};

/// Access level the isolation policy assigns to a `(plugin, service type)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    /// Always denied.
    Prohibited,
    /// Visible only to the declaring plugin.
    ModuleOnly,
    /// Any plugin may access.
    CrossModule,
    /// Always allowed, regardless of owner.
    Global,
}

#[derive(Default)]
struct AuditCounters {
    denied: AtomicU64,
    allowed: AtomicU64,
}

/// Per-plugin audit log of access decisions, with running counters.
#[derive(Default)]
pub struct AuditLog {
    counters: DashMap<String, Arc<AuditCounters>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, plugin_id: &str, allowed: bool) {
        let counters = self
            .counters
            .entry(plugin_id.to_string())
            .or_insert_with(|| Arc::new(AuditCounters::default()))
            .clone();
        if allowed {
            counters.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `(allowed, denied)` counts observed for a plugin so far.
    pub fn counts(&self, plugin_id: &str) -> (u64, u64) {
        self.counters
            .get(plugin_id)
            .map(|c| {
                (
                    c.allowed.load(Ordering::Relaxed),
                    c.denied.load(Ordering::Relaxed),
                )
            })
            .unwrap_or((0, 0))
    }
}

/// Declares who may resolve what. Owned by the host, shared (not a global
/// singleton — spec §9 DESIGN NOTES) across every per-plugin provider.
pub struct IsolationPolicy {
    /// Explicit per-plugin allow-lists: plugin id -> allowed service types.
    allow_lists: DashMap<String, HashSet<TypeId>>,
    /// Explicit per-type access level overrides.
    levels: DashMap<TypeId, AccessLevel>,
    /// Types that are always accessible regardless of owner (framework services).
    global_types: DashMap<TypeId, ()>,
    /// Plugins that bypass all restrictions.
    trusted_plugins: DashMap<String, ()>,
    /// Decision cache: (plugin_id, type) -> allowed. Invalidated on any mutation.
    cache: DashMap<(String, TypeId), bool>,
    /// Mutation counter; bumping it is how `clear_cache` is made cheap to call often.
    generation: AtomicU64,
    audit: AuditLog,
}

impl IsolationPolicy {
    pub fn new() -> Self {
        Self {
            allow_lists: DashMap::new(),
            levels: DashMap::new(),
            global_types: DashMap::new(),
            trusted_plugins: DashMap::new(),
            cache: DashMap::new(),
            generation: AtomicU64::new(0),
            audit: AuditLog::new(),
        }
    }

    /// Mark a type as globally accessible (framework services default to this).
    pub fn mark_global<T: Any>(&self) {
        self.global_types.insert(TypeId::of::<T>(), ());
        self.clear_cache();
    }

    /// Set the access level for a type, independent of any specific plugin.
    pub fn set_level<T: Any>(&self, level: AccessLevel) {
        self.levels.insert(TypeId::of::<T>(), level);
        self.clear_cache();
    }

    /// Grant a plugin explicit access to a type (ModuleOnly/CrossModule targets).
    pub fn allow<T: Any>(&self, plugin_id: &str) {
        self.allow_lists
            .entry(plugin_id.to_string())
            .or_default()
            .insert(TypeId::of::<T>());
        self.clear_cache();
    }

    /// Mark a plugin as trusted: it bypasses every restriction.
    pub fn trust(&self, plugin_id: &str) {
        self.trusted_plugins.insert(plugin_id.to_string(), ());
        self.clear_cache();
    }

    /// Invalidate the decision cache. Called automatically by every mutator.
    pub fn clear_cache(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.clear();
    }

    /// Authorize `(plugin_id, T)`. Memoized: repeating the same query without
    /// an intervening mutation returns the identical decision in O(1).
    pub fn check<T: Any>(&self, plugin_id: &str, declaring_plugin: Option<&str>) -> bool {
        let type_id = TypeId::of::<T>();
        let key = (plugin_id.to_string(), type_id);

        if let Some(decision) = self.cache.get(&key) {
            return *decision;
        }

        let allowed = self.decide(plugin_id, type_id, declaring_plugin);
        self.cache.insert(key, allowed);
        self.audit.record(plugin_id, allowed);
        allowed
    }

    fn decide(&self, plugin_id: &str, type_id: TypeId, declaring_plugin: Option<&str>) -> bool {
        if self.trusted_plugins.contains_key(plugin_id) {
            return true;
        }
        if self.global_types.contains_key(&type_id) {
            return true;
        }

        let level = self
            .levels
            .get(&type_id)
            .map(|l| *l)
            .unwrap_or(AccessLevel::CrossModule);

        match level {
            AccessLevel::Prohibited => false,
            AccessLevel::Global => true,
            AccessLevel::CrossModule => true,
            AccessLevel::ModuleOnly => {
                if declaring_plugin == Some(plugin_id) {
                    return true;
                }
                self.allow_lists
                    .get(plugin_id)
                    .map(|set| set.contains(&type_id))
                    .unwrap_or(false)
            }
        }
    }

    /// Audit counters for a plugin: `(allowed, denied)`.
    pub fn audit_counts(&self, plugin_id: &str) -> (u64, u64) {
        self.audit.counts(plugin_id)
    }
}

impl Default for IsolationPolicy {
    fn default() -> Self {
        Self::new()
    }
}

type Instance = Arc<dyn Any + Send + Sync>;

/// A flat, type-keyed service container. The root provider has no parent;
/// every per-plugin provider has the root (or another provider) as parent.
pub struct ServiceProvider {
    plugin_id: Option<String>,
    declaring_plugin: Option<String>,
    own: HashMap<TypeId, Vec<Instance>>,
    parent: Option<Arc<ServiceProvider>>,
    policy: Option<Arc<IsolationPolicy>>,
}

impl ServiceProvider {
    /// Build the host's root provider (no parent, no policy gate).
    pub fn root() -> Self {
        Self {
            plugin_id: None,
            declaring_plugin: None,
            own: HashMap::new(),
            parent: None,
            policy: None,
        }
    }

    /// Build a child provider scoped to `plugin_id`, layered over `parent`
    /// and gated by `policy`.
    pub fn child(
        plugin_id: impl Into<String>,
        parent: Arc<ServiceProvider>,
        policy: Arc<IsolationPolicy>,
        declared: Vec<(TypeId, Instance)>,
    ) -> Self {
        let mut own: HashMap<TypeId, Vec<Instance>> = HashMap::new();
        for (type_id, instance) in declared {
            own.entry(type_id).or_default().push(instance);
        }
        let plugin_id = plugin_id.into();
        Self {
            declaring_plugin: Some(plugin_id.clone()),
            plugin_id: Some(plugin_id),
            own,
            parent: Some(parent),
            policy: Some(policy),
        }
    }

    /// Register an instance directly (used by the root provider for
    /// framework services and by tests).
    pub fn register<T: Any + Send + Sync>(&mut self, instance: Arc<T>) {
        self.own
            .entry(TypeId::of::<T>())
            .or_default()
            .push(instance);
    }

    /// Try to resolve `T`: child first, then parent if the policy allows it.
    /// Returns `None` on a miss or a policy denial (spec: `get` never raises).
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.get_all::<T>().into_iter().next()
    }

    /// Resolve `T` or raise `AccessDenied`/a not-found error (spec:
    /// `require` always raises instead of returning nothing).
    pub fn require<T: Any + Send + Sync>(&self) -> PluginResult<Arc<T>> {
        if let Some(plugin_id) = &self.plugin_id {
            if let Some(policy) = &self.policy {
                if !policy.check::<T>(plugin_id, self.declaring_plugin.as_deref())
                    && !self.own.contains_key(&TypeId::of::<T>())
                {
                    return Err(PluginError::AccessDenied {
                        plugin_id: plugin_id.clone(),
                        service_type: std::any::type_name::<T>().to_string(),
                        reason: "denied by isolation policy".to_string(),
                    });
                }
            }
        }

        self.get::<T>().ok_or_else(|| PluginError::Generic(format!(
            "service '{}' not found",
            std::any::type_name::<T>()
        )))
    }

    /// Union of child and parent resolutions, child first, deduplicated by
    /// pointer identity.
    pub fn get_all<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        let type_id = TypeId::of::<T>();

        // The access check only gates the *escape to the parent*; a plugin's
        // own declared services are always visible to itself.
        let own_hit = self.own.contains_key(&type_id);

        let allowed_to_parent = match (&self.plugin_id, &self.policy) {
            (Some(plugin_id), Some(policy)) => {
                policy.check::<T>(plugin_id, self.declaring_plugin.as_deref())
            }
            _ => true,
        };

        let mut seen = HashSet::new();
        let mut out = Vec::new();

        if let Some(list) = self.own.get(&type_id) {
            for inst in list {
                if let Ok(typed) = inst.clone().downcast::<T>() {
                    let ptr = Arc::as_ptr(&typed) as *const () as usize;
                    if seen.insert(ptr) {
                        out.push(typed);
                    }
                }
            }
        }

        if !own_hit || allowed_to_parent {
            if allowed_to_parent {
                if let Some(parent) = &self.parent {
                    for typed in parent.get_all::<T>() {
                        let ptr = Arc::as_ptr(&typed) as *const () as usize;
                        if seen.insert(ptr) {
                            out.push(typed);
                        }
                    }
                }
            }
        }

        out
    }

    pub fn plugin_id(&self) -> Option<&str> {
        self.plugin_id.as_deref()
    }
}

/// A disposal handle tracked by the `LifetimeManager` via a weak reference,
/// so tracking participation in scoped disposal never extends an instance's
/// lifetime.
pub struct DisposalHandle {
    pub type_name: &'static str,
    pub is_async: bool,
    weak: std::sync::Weak<dyn Any + Send + Sync>,
}

/// A scope owning a set of disposal handles; releasing the scope runs every
/// disposer still alive, in reverse acquisition order, collecting failures
/// into a single composite warning instead of aborting (spec §9 DESIGN NOTES).
#[derive(Default)]
pub struct DisposalScope {
    handles: Vec<DisposalHandle>,
}

impl DisposalScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track<T: Any + Send + Sync>(&mut self, instance: &Arc<T>, is_async: bool) {
        let weak: std::sync::Weak<dyn Any + Send + Sync> = Arc::downgrade(instance) as _;
        self.handles.push(DisposalHandle {
            type_name: std::any::type_name::<T>(),
            is_async,
            weak,
        });
    }

    /// Release all handles; returns the names of instances that were still
    /// alive at close time (informational, not an error).
    pub fn close(&mut self) -> Vec<&'static str> {
        let mut still_alive = Vec::new();
        for handle in self.handles.drain(..).rev() {
            if handle.weak.upgrade().is_some() {
                still_alive.push(handle.type_name);
            }
        }
        still_alive
    }
}

/// A hazard the lifetime manager can detect while validating a service graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifetimeHazard {
    /// A long-lived service depends on a per-scope service.
    LongLivedDependsOnScoped { service: String, dependency: String },
    /// A long-lived service depends on a per-resolution service (effectively pinned).
    LongLivedDependsOnTransient { service: String, dependency: String },
    /// Circular constructor-parameter dependency.
    CircularDependency { path: Vec<String> },
    /// A disposable instance held for the process lifetime.
    DisposableHeldForProcessLifetime { service: String },
}

impl LifetimeHazard {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            LifetimeHazard::LongLivedDependsOnScoped { .. }
                | LifetimeHazard::CircularDependency { .. }
        )
    }
}

/// A node in the declared service dependency graph used for hazard analysis.
pub struct ServiceNode {
    pub name: String,
    pub lifetime: crate::traits::ServiceLifetime,
    pub is_disposable: bool,
    pub depends_on: Vec<String>,
}

/// Validates a declared service graph for the lifetime hazards spec §4.5 names.
pub struct LifetimeManager;

impl LifetimeManager {
    pub fn validate(graph: &[ServiceNode]) -> Vec<LifetimeHazard> {
        use crate::traits::ServiceLifetime::*;
        let mut hazards = Vec::new();
        let by_name: HashMap<&str, &ServiceNode> =
            graph.iter().map(|n| (n.name.as_str(), n)).collect();

        for node in graph {
            if node.lifetime == Singleton {
                for dep_name in &node.depends_on {
                    if let Some(dep) = by_name.get(dep_name.as_str()) {
                        match dep.lifetime {
                            Scoped => hazards.push(LifetimeHazard::LongLivedDependsOnScoped {
                                service: node.name.clone(),
                                dependency: dep.name.clone(),
                            }),
                            Transient => {
                                hazards.push(LifetimeHazard::LongLivedDependsOnTransient {
                                    service: node.name.clone(),
                                    dependency: dep.name.clone(),
                                })
                            }
                            Singleton => {}
                        }
                    }
                }
                if node.is_disposable {
                    hazards.push(LifetimeHazard::DisposableHeldForProcessLifetime {
                        service: node.name.clone(),
                    });
                }
            }
        }

        if let Some(path) = find_cycle(graph) {
            hazards.push(LifetimeHazard::CircularDependency { path });
        }

        hazards
    }
}

/// Iterative depth-first cycle detection with an explicit stack (spec §9
/// DESIGN NOTES: avoid the recursive pattern to prevent stack overflow on
/// deep graphs).
fn find_cycle(graph: &[ServiceNode]) -> Option<Vec<String>> {
    let by_name: HashMap<&str, &ServiceNode> =
        graph.iter().map(|n| (n.name.as_str(), n)).collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for start in graph {
        if marks.contains_key(start.name.as_str()) {
            continue;
        }

        // (node, next child index)
        let mut stack: Vec<(&str, usize)> = vec![(start.name.as_str(), 0)];
        marks.insert(start.name.as_str(), Mark::Visiting);

        while let Some((node, idx)) = stack.pop() {
            let deps = by_name
                .get(node)
                .map(|n| n.depends_on.as_slice())
                .unwrap_or(&[]);

            if idx < deps.len() {
                let child = deps[idx].as_str();
                stack.push((node, idx + 1));

                match marks.get(child) {
                    Some(Mark::Visiting) => {
                        let mut path: Vec<String> =
                            stack.iter().map(|(n, _)| n.to_string()).collect();
                        path.push(child.to_string());
                        return Some(path);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(child, Mark::Visiting);
                        stack.push((child, 0));
                    }
                }
            } else {
                marks.insert(node, Mark::Done);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SecretStore;
    struct Logger;

    #[test]
    fn child_resolves_before_parent() {
        let mut root = ServiceProvider::root();
        root.register(Arc::new(Logger));
        let root = Arc::new(root);

        let policy = Arc::new(IsolationPolicy::new());
        let child = ServiceProvider::child("plugin-a", root.clone(), policy, vec![]);

        assert!(child.get::<Logger>().is_some());
    }

    #[test]
    fn module_only_denies_other_plugin() {
        let mut root = ServiceProvider::root();
        root.register(Arc::new(SecretStore));
        let root = Arc::new(root);

        let policy = Arc::new(IsolationPolicy::new());
        policy.set_level::<SecretStore>(AccessLevel::ModuleOnly);

        let other = ServiceProvider::child("plugin-m", root.clone(), policy.clone(), vec![]);
        assert!(other.get::<SecretStore>().is_none());
        assert!(other.require::<SecretStore>().is_err());

        let (_, denied) = policy.audit_counts("plugin-m");
        assert_eq!(denied, 1);
    }

    #[test]
    fn global_type_always_allowed() {
        let mut root = ServiceProvider::root();
        root.register(Arc::new(Logger));
        let root = Arc::new(root);

        let policy = Arc::new(IsolationPolicy::new());
        policy.mark_global::<Logger>();
        policy.set_level::<Logger>(AccessLevel::Prohibited);

        let child = ServiceProvider::child("plugin-a", root, policy, vec![]);
        assert!(child.get::<Logger>().is_some());
    }

    #[test]
    fn cache_is_invalidated_on_mutation() {
        let mut root = ServiceProvider::root();
        root.register(Arc::new(SecretStore));
        let root = Arc::new(root);

        let policy = Arc::new(IsolationPolicy::new());
        policy.set_level::<SecretStore>(AccessLevel::Prohibited);
        let child = ServiceProvider::child("plugin-a", root, policy.clone(), vec![]);

        assert!(child.get::<SecretStore>().is_none());

        policy.set_level::<SecretStore>(AccessLevel::Global);
        assert!(child.get::<SecretStore>().is_some());
    }

    #[test]
    fn detects_circular_dependency() {
        let graph = vec![
            ServiceNode {
                name: "a".into(),
                lifetime: crate::traits::ServiceLifetime::Singleton,
                is_disposable: false,
                depends_on: vec!["b".into()],
            },
            ServiceNode {
                name: "b".into(),
                lifetime: crate::traits::ServiceLifetime::Singleton,
                is_disposable: false,
                depends_on: vec!["a".into()],
            },
        ];

        let hazards = LifetimeManager::validate(&graph);
        assert!(hazards
            .iter()
            .any(|h| matches!(h, LifetimeHazard::CircularDependency { .. })));
    }

    #[test]
    fn detects_singleton_depends_on_scoped() {
        let graph = vec![
            ServiceNode {
                name: "a".into(),
                lifetime: crate::traits::ServiceLifetime::Singleton,
                is_disposable: false,
                depends_on: vec!["b".into()],
            },
            ServiceNode {
                name: "b".into(),
                lifetime: crate::traits::ServiceLifetime::Scoped,
                is_disposable: false,
                depends_on: vec![],
            },
        ];

        let hazards = LifetimeManager::validate(&graph);
        assert!(hazards
            .iter()
            .any(|h| matches!(h, LifetimeHazard::LongLivedDependsOnScoped { .. })));
    }
}
