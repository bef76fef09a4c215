//! Dependency-resolving module registry.
//!
//! Modules are registered as named factories with a declared dependency
//! list. The registry instantiates each module at most once, always after
//! its dependencies, and hands the factory a typed [`Dependencies`] table
//! instead of a positional argument list.

use std::any::{type_name, Any};
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ModuleError, RegistryError};
use crate::validation::Validator;

/// Lifecycle hooks for a module instance.
pub trait Module: Send + Sync + 'static {
    /// Called once, right after the factory produced the instance.
    /// Failures are logged; the module stays initialized.
    fn init(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Called during teardown, in reverse initialization order.
    fn destroy(&self) {}
}

/// Type-erased handle to a module instance.
pub type ModuleInstance = Arc<dyn Any + Send + Sync>;

/// Lifecycle state of a registered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Registered,
    Initializing,
    Initialized,
    Failed,
}

/// What happens to a module whose dependency failed to initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyPolicy {
    /// The factory is not run; the module is marked failed.
    #[default]
    Required,
    /// The factory still runs and sees the dependency as absent.
    Tolerant,
}

#[derive(Clone)]
struct Built {
    any: ModuleInstance,
    module: Arc<dyn Module>,
}

type Factory = Arc<dyn Fn(&Dependencies) -> Result<Built, ModuleError> + Send + Sync>;

struct ModuleEntry {
    factory: Factory,
    dependencies: Vec<String>,
    policy: DependencyPolicy,
    instance: Option<Built>,
    state: ModuleState,
}

/// Resolved dependency instances handed to a factory, looked up by name.
pub struct Dependencies {
    module: String,
    resolved: Vec<(String, Option<ModuleInstance>)>,
}

impl Dependencies {
    /// Get a dependency, failing if it is unavailable or of another type.
    pub fn require<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, RegistryError> {
        let instance = self.instance(name).ok_or_else(|| RegistryError::MissingDependency {
            module: self.module.clone(),
            dependency: name.to_string(),
        })?;
        instance
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                module: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Get a dependency if it is available and of the requested type.
    pub fn optional<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.instance(name).and_then(|i| i.downcast::<T>().ok())
    }

    /// Whether the named dependency initialized successfully.
    pub fn is_available(&self, name: &str) -> bool {
        self.instance(name).is_some()
    }

    /// Declared dependency names, in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resolved.iter().map(|(name, _)| name.as_str())
    }

    /// The module being constructed.
    pub fn module(&self) -> &str {
        &self.module
    }

    fn instance(&self, name: &str) -> Option<ModuleInstance> {
        self.resolved
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, instance)| instance.clone())
    }
}

/// Transitive dependency closure of one module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Dependencies before dependents, deduplicated. Excludes the module itself.
    pub order: Vec<String>,
    /// Every back-edge found, as the path that closes the cycle.
    pub cycles: Vec<Vec<String>>,
    /// Referenced names that are not registered.
    pub missing: Vec<String>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.cycles.is_empty() && self.missing.is_empty()
    }
}

/// Outcome of [`ModuleRegistry::init_all`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InitReport {
    /// Initialized modules, in initialization order.
    pub initialized: Vec<String>,
    /// Modules that are not initialized, in registration order.
    pub failed: Vec<String>,
}

impl InitReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Introspection record for one registered module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub state: ModuleState,
    pub dependencies: Vec<String>,
    pub policy: DependencyPolicy,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, ModuleEntry>,
    /// Registration order.
    names: Vec<String>,
    /// Initialization order of the current generation.
    initialized: Vec<String>,
}

/// Registry of named module factories with singleton instances.
#[derive(Default)]
pub struct ModuleRegistry {
    inner: Mutex<Inner>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a module whose factory must not run without its dependencies.
    pub fn register<T, F>(
        &self,
        name: &str,
        dependencies: &[&str],
        factory: F,
    ) -> Result<(), RegistryError>
    where
        T: Module,
        F: Fn(&Dependencies) -> Result<Arc<T>, ModuleError> + Send + Sync + 'static,
    {
        self.register_with_policy(name, dependencies, DependencyPolicy::Required, factory)
    }

    /// Register a module whose factory runs even if some dependencies failed.
    pub fn register_tolerant<T, F>(
        &self,
        name: &str,
        dependencies: &[&str],
        factory: F,
    ) -> Result<(), RegistryError>
    where
        T: Module,
        F: Fn(&Dependencies) -> Result<Arc<T>, ModuleError> + Send + Sync + 'static,
    {
        self.register_with_policy(name, dependencies, DependencyPolicy::Tolerant, factory)
    }

    /// Register a module. The first registration of a name wins; later ones
    /// are rejected with `AlreadyRegistered`.
    pub fn register_with_policy<T, F>(
        &self,
        name: &str,
        dependencies: &[&str],
        policy: DependencyPolicy,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        T: Module,
        F: Fn(&Dependencies) -> Result<Arc<T>, ModuleError> + Send + Sync + 'static,
    {
        Validator::validate_module_name(name)?;
        Validator::validate_dependencies(name, dependencies)?;

        let mut inner = self.lock();
        if inner.entries.contains_key(name) {
            warn!(module = name, "Module already registered, keeping the first registration");
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }

        let factory: Factory = Arc::new(move |deps: &Dependencies| {
            let instance = factory(deps)?;
            Ok(Built {
                any: instance.clone(),
                module: instance,
            })
        });

        inner.entries.insert(
            name.to_string(),
            ModuleEntry {
                factory,
                dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                policy,
                instance: None,
                state: ModuleState::Registered,
            },
        );
        inner.names.push(name.to_string());

        debug!(module = name, ?dependencies, "Module registered");
        Ok(())
    }

    /// Transitive dependency closure of `name`, dependencies first.
    ///
    /// Never fails: cycles and unregistered names are reported in the
    /// result (and logged) and the offending branch is cut.
    pub fn resolve_dependencies(&self, name: &str) -> Resolution {
        let inner = self.lock();
        let mut resolution = Resolution::default();

        if !inner.entries.contains_key(name) {
            warn!(module = name, "Cannot resolve dependencies of an unregistered module");
            resolution.missing.push(name.to_string());
            return resolution;
        }

        let mut visiting = vec![name.to_string()];
        let mut done = HashSet::new();
        Self::visit(&inner, name, &mut visiting, &mut done, &mut resolution);
        resolution
    }

    fn visit(
        inner: &Inner,
        name: &str,
        visiting: &mut Vec<String>,
        done: &mut HashSet<String>,
        resolution: &mut Resolution,
    ) {
        let Some(entry) = inner.entries.get(name) else {
            return;
        };

        for dep in &entry.dependencies {
            if done.contains(dep) {
                continue;
            }
            if let Some(pos) = visiting.iter().position(|n| n == dep) {
                let mut cycle = visiting[pos..].to_vec();
                cycle.push(dep.clone());
                warn!(cycle = %cycle.join(" -> "), "Circular dependency detected");
                resolution.cycles.push(cycle);
                continue;
            }
            if !inner.entries.contains_key(dep) {
                warn!(module = name, dependency = %dep, "Dependency is not registered");
                if !resolution.missing.contains(dep) {
                    resolution.missing.push(dep.clone());
                }
                continue;
            }

            visiting.push(dep.clone());
            Self::visit(inner, dep, visiting, done, resolution);
            visiting.pop();

            done.insert(dep.clone());
            resolution.order.push(dep.clone());
        }
    }

    /// Initialize `name` and, first, every dependency it declares.
    ///
    /// Idempotent: an initialized module returns its cached instance without
    /// re-running the factory.
    ///
    /// A `Failed` module is retried.
    pub fn init(&self, name: &str) -> Result<ModuleInstance, RegistryError> {
        let mut path = Vec::new();
        let mut attempted = HashSet::new();
        self.init_inner(name, &mut path, &mut attempted)
            .map(|built| built.any)
    }

    /// `attempted` holds every module whose factory already ran in the
    /// current pass; a failed one is not run again within that pass.
    fn init_inner(
        &self,
        name: &str,
        path: &mut Vec<String>,
        attempted: &mut HashSet<String>,
    ) -> Result<Built, RegistryError> {
        let (factory, dependencies, policy) = {
            let mut inner = self.lock();
            let entry = inner
                .entries
                .get_mut(name)
                .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;

            if entry.state == ModuleState::Failed && attempted.contains(name) {
                return Err(RegistryError::AlreadyFailed(name.to_string()));
            }

            match (entry.state, &entry.instance) {
                (ModuleState::Initialized, Some(built)) => return Ok(built.clone()),
                (ModuleState::Initializing, _) => {
                    let start = path.iter().position(|n| n == name).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(name.to_string());
                    warn!(cycle = %cycle.join(" -> "), "Circular dependency during initialization");
                    return Err(RegistryError::Cycle(cycle));
                }
                _ => {}
            }

            entry.state = ModuleState::Initializing;
            (entry.factory.clone(), entry.dependencies.clone(), entry.policy)
        };
        attempted.insert(name.to_string());

        path.push(name.to_string());
        let mut resolved = Vec::with_capacity(dependencies.len());
        let mut first_failure = None;
        for dep in &dependencies {
            match self.init_inner(dep, path, attempted) {
                Ok(built) => resolved.push((dep.clone(), Some(built.any))),
                Err(e) => {
                    warn!(module = name, dependency = %dep, error = %e, "Dependency failed to initialize");
                    first_failure.get_or_insert_with(|| dep.clone());
                    resolved.push((dep.clone(), None));
                }
            }
        }
        path.pop();

        if let Some(dependency) = first_failure {
            if policy == DependencyPolicy::Required {
                self.set_state(name, ModuleState::Failed);
                return Err(RegistryError::DependencyFailed {
                    module: name.to_string(),
                    dependency,
                });
            }
        }

        let deps = Dependencies {
            module: name.to_string(),
            resolved,
        };
        let built = match catch_unwind(AssertUnwindSafe(|| factory(&deps))) {
            Ok(Ok(built)) => built,
            Ok(Err(e)) => {
                self.set_state(name, ModuleState::Failed);
                warn!(module = name, error = %e, "Module factory failed");
                return Err(RegistryError::FactoryFailed {
                    module: name.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.set_state(name, ModuleState::Failed);
                warn!(module = name, "Module factory panicked");
                return Err(RegistryError::FactoryFailed {
                    module: name.to_string(),
                    reason: "factory panicked".to_string(),
                });
            }
        };

        {
            let mut inner = self.lock();
            if let Some(entry) = inner.entries.get_mut(name) {
                entry.instance = Some(built.clone());
                entry.state = ModuleState::Initialized;
            }
            inner.initialized.push(name.to_string());
        }

        if let Err(e) = built.module.init() {
            warn!(module = name, error = %e, "Module init hook failed");
        }

        info!(module = name, "Module initialized");
        Ok(built)
    }

    fn set_state(&self, name: &str, state: ModuleState) {
        if let Some(entry) = self.lock().entries.get_mut(name) {
            entry.state = state;
        }
    }

    /// Initialize every registered module, in registration order.
    ///
    /// Best effort: a failing module never stops the pass.
    pub fn init_all(&self) -> InitReport {
        let names = self.names();
        let mut attempted = HashSet::new();

        for name in &names {
            let resolution = self.resolve_dependencies(name);
            for dep in resolution.order.iter().chain(std::iter::once(name)) {
                if self.is_initialized(dep) {
                    continue;
                }
                if self.state(dep) == Some(ModuleState::Failed) && attempted.contains(dep) {
                    continue;
                }
                let mut path = Vec::new();
                if let Err(e) = self.init_inner(dep, &mut path, &mut attempted) {
                    warn!(module = %dep, error = %e, "Failed to initialize module");
                }
            }
        }

        let inner = self.lock();
        let report = InitReport {
            initialized: inner.initialized.clone(),
            failed: inner
                .names
                .iter()
                .filter(|n| {
                    inner
                        .entries
                        .get(*n)
                        .is_some_and(|e| e.state != ModuleState::Initialized)
                })
                .cloned()
                .collect(),
        };
        info!(
            initialized = report.initialized.len(),
            failed = report.failed.len(),
            "Module initialization finished"
        );
        report
    }

    /// Get an initialized instance. Never triggers initialization.
    pub fn get(&self, name: &str) -> Option<ModuleInstance> {
        let inner = self.lock();
        match inner.entries.get(name) {
            Some(ModuleEntry {
                instance: Some(built),
                ..
            }) => Some(built.any.clone()),
            Some(_) => {
                warn!(module = name, "Module not initialized");
                None
            }
            None => {
                warn!(module = name, "Module not registered");
                None
            }
        }
    }

    /// Get an initialized instance as its concrete type.
    pub fn get_as<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.get(name).and_then(|i| i.downcast::<T>().ok())
    }

    pub fn state(&self, name: &str) -> Option<ModuleState> {
        self.lock().entries.get(name).map(|e| e.state)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.lock().entries.contains_key(name)
    }

    pub fn is_initialized(&self, name: &str) -> bool {
        self.state(name) == Some(ModuleState::Initialized)
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.lock().names.clone()
    }

    pub fn initialization_order(&self) -> Vec<String> {
        self.lock().initialized.clone()
    }

    pub fn modules(&self) -> Vec<ModuleInfo> {
        let inner = self.lock();
        inner
            .names
            .iter()
            .filter_map(|name| {
                inner.entries.get(name).map(|entry| ModuleInfo {
                    name: name.clone(),
                    state: entry.state,
                    dependencies: entry.dependencies.clone(),
                    policy: entry.policy,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every instance and return all modules to `Registered`.
    pub fn reset(&self) {
        let mut inner = self.lock();
        for entry in inner.entries.values_mut() {
            entry.instance = None;
            entry.state = ModuleState::Registered;
        }
        inner.initialized.clear();
        debug!("Module registry reset");
    }

    /// Run every `destroy` hook in reverse initialization order, then reset.
    pub fn shutdown(&self) {
        let instances: Vec<(String, Arc<dyn Module>)> = {
            let inner = self.lock();
            inner
                .initialized
                .iter()
                .rev()
                .filter_map(|name| {
                    inner
                        .entries
                        .get(name)
                        .and_then(|e| e.instance.as_ref())
                        .map(|built| (name.clone(), built.module.clone()))
                })
                .collect()
        };

        for (name, module) in instances {
            if catch_unwind(AssertUnwindSafe(|| module.destroy())).is_err() {
                warn!(module = %name, "Module destroy hook panicked");
            }
            debug!(module = %name, "Module destroyed");
        }

        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Service {
        name: &'static str,
        seen: Vec<String>,
    }

    impl Module for Service {}

    fn service(name: &'static str) -> Arc<Service> {
        Arc::new(Service {
            name,
            seen: Vec::new(),
        })
    }

    struct Kv {
        ready: AtomicUsize,
    }

    impl Module for Kv {
        fn init(&self) -> Result<(), ModuleError> {
            self.ready.store(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_init_is_memoized() {
        let registry = ModuleRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .register("storage", &[], move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(service("storage"))
            })
            .unwrap();

        let first = registry.init("storage").unwrap();
        let second = registry.init("storage").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.state("storage"), Some(ModuleState::Initialized));
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let registry = ModuleRegistry::new();
        registry
            .register("storage", &[], |_| Ok(service("first")))
            .unwrap();
        let err = registry
            .register("storage", &[], |_| Ok(service("second")))
            .unwrap_err();

        assert_eq!(err, RegistryError::AlreadyRegistered("storage".into()));
        registry.init("storage").unwrap();
        assert_eq!(registry.get_as::<Service>("storage").unwrap().name, "first");
    }

    #[test]
    fn test_register_rejects_invalid_input() {
        let registry = ModuleRegistry::new();
        assert!(registry.register("", &[], |_| Ok(service("x"))).is_err());
        assert!(registry
            .register("a", &["a"], |_| Ok(service("a")))
            .is_err());
        assert!(registry
            .register("b", &["c", "c"], |_| Ok(service("b")))
            .is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dependency_is_initialized_before_dependent() {
        let registry = ModuleRegistry::new();
        registry
            .register("storage", &[], |_| {
                Ok(Arc::new(Kv {
                    ready: AtomicUsize::new(0),
                }))
            })
            .unwrap();
        registry
            .register("students", &["storage"], |deps| {
                let kv = deps.require::<Kv>("storage")?;
                assert_eq!(kv.ready.load(Ordering::SeqCst), 1);
                Ok(Arc::new(Service {
                    name: "students",
                    seen: deps.names().map(String::from).collect(),
                }))
            })
            .unwrap();

        registry.init("students").unwrap();

        assert_eq!(registry.initialization_order(), vec!["storage", "students"]);
        let students = registry.get_as::<Service>("students").unwrap();
        assert_eq!(students.seen, vec!["storage"]);
    }

    #[test]
    fn test_resolve_dependencies_orders_closure() {
        let registry = ModuleRegistry::new();
        registry.register("storage", &[], |_| Ok(service("s"))).unwrap();
        registry.register("bus", &[], |_| Ok(service("b"))).unwrap();
        registry
            .register("state", &["storage"], |_| Ok(service("st")))
            .unwrap();
        registry
            .register("tasks", &["storage", "bus", "state"], |_| Ok(service("t")))
            .unwrap();
        registry
            .register("ui", &["tasks", "state"], |_| Ok(service("u")))
            .unwrap();

        let resolution = registry.resolve_dependencies("ui");
        assert!(resolution.is_complete());
        assert_eq!(resolution.order, vec!["storage", "bus", "state", "tasks"]);
    }

    #[test]
    fn test_resolve_dependencies_reports_cycle() {
        let registry = ModuleRegistry::new();
        registry.register("a", &["b"], |_| Ok(service("a"))).unwrap();
        registry.register("b", &["a"], |_| Ok(service("b"))).unwrap();

        let resolution = registry.resolve_dependencies("a");
        assert_eq!(resolution.order, vec!["b"]);
        assert_eq!(resolution.cycles, vec![vec!["a", "b", "a"]]);
    }

    #[test]
    fn test_resolve_dependencies_reports_missing() {
        let registry = ModuleRegistry::new();
        registry
            .register("students", &["storage"], |_| Ok(service("s")))
            .unwrap();

        let resolution = registry.resolve_dependencies("students");
        assert!(resolution.order.is_empty());
        assert_eq!(resolution.missing, vec!["storage"]);
        assert_eq!(registry.resolve_dependencies("nope").missing, vec!["nope"]);
    }

    #[test]
    fn test_cyclic_init_fails_without_looping() {
        let registry = ModuleRegistry::new();
        registry.register("a", &["b"], |_| Ok(service("a"))).unwrap();
        registry.register("b", &["a"], |_| Ok(service("b"))).unwrap();

        let err = registry.init("a").unwrap_err();
        assert_eq!(
            err,
            RegistryError::DependencyFailed {
                module: "a".into(),
                dependency: "b".into()
            }
        );
        assert_eq!(registry.state("a"), Some(ModuleState::Failed));
        assert_eq!(registry.state("b"), Some(ModuleState::Failed));
    }

    #[test]
    fn test_required_module_skips_factory_when_dependency_fails() {
        let registry = ModuleRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .register::<Service, _>("storage", &[], |_| Err(ModuleError::failed("quota")))
            .unwrap();
        registry
            .register("students", &["storage"], move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(service("students"))
            })
            .unwrap();

        assert!(registry.init("students").is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.state("students"), Some(ModuleState::Failed));
    }

    #[test]
    fn test_tolerant_module_sees_absent_dependency() {
        let registry = ModuleRegistry::new();
        registry
            .register::<Service, _>("storage", &[], |_| Err(ModuleError::failed("quota")))
            .unwrap();
        registry.register("bus", &[], |_| Ok(service("bus"))).unwrap();
        registry
            .register_tolerant("ui", &["storage", "bus"], |deps| {
                assert!(!deps.is_available("storage"));
                assert!(deps.optional::<Service>("storage").is_none());
                assert!(deps.require::<Service>("storage").is_err());
                let bus = deps.require::<Service>("bus")?;
                Ok(service(bus.name))
            })
            .unwrap();

        registry.init("ui").unwrap();
        assert_eq!(registry.get_as::<Service>("ui").unwrap().name, "bus");
    }

    #[test]
    fn test_factory_panic_marks_failed() {
        let registry = ModuleRegistry::new();
        registry
            .register::<Service, _>("broken", &[], |_| panic!("boom"))
            .unwrap();

        let err = registry.init("broken").unwrap_err();
        assert!(matches!(err, RegistryError::FactoryFailed { .. }));
        assert_eq!(registry.state("broken"), Some(ModuleState::Failed));
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let registry = ModuleRegistry::new();
        registry.register("storage", &[], |_| Ok(service("s"))).unwrap();
        registry
            .register("students", &["storage"], |deps| {
                deps.require::<Kv>("storage")?;
                Ok(service("students"))
            })
            .unwrap();

        let err = registry.init("students").unwrap_err();
        assert!(matches!(err, RegistryError::FactoryFailed { .. }));
    }

    #[test]
    fn test_init_all_is_best_effort() {
        let registry = ModuleRegistry::new();
        registry
            .register("tasks", &["state"], |_| Ok(service("tasks")))
            .unwrap();
        registry
            .register("state", &["storage"], |_| Ok(service("state")))
            .unwrap();
        registry.register("storage", &[], |_| Ok(service("s"))).unwrap();
        registry
            .register::<Service, _>("broken", &[], |_| Err(ModuleError::failed("nope")))
            .unwrap();
        registry
            .register("orphan", &["missing"], |_| Ok(service("o")))
            .unwrap();

        let report = registry.init_all();

        assert_eq!(report.initialized, vec!["storage", "state", "tasks"]);
        assert_eq!(report.failed, vec!["broken", "orphan"]);
        assert!(!report.is_success());
    }

    #[test]
    fn test_init_all_runs_failing_factory_once_per_pass() {
        let registry = ModuleRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .register::<Service, _>("storage", &[], move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ModuleError::failed("unavailable"))
            })
            .unwrap();
        for name in ["students", "tasks", "state"] {
            registry
                .register(name, &["storage"], move |_| Ok(service(name)))
                .unwrap();
        }
        registry
            .register_tolerant("ui", &["students", "tasks", "state"], |_| Ok(service("ui")))
            .unwrap();

        let report = registry.init_all();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.initialized, vec!["ui"]);
        assert_eq!(report.failed, vec!["storage", "students", "tasks", "state"]);

        // An explicit init retries.
        assert!(registry.init("storage").is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_get_never_initializes() {
        let registry = ModuleRegistry::new();
        registry.register("storage", &[], |_| Ok(service("s"))).unwrap();

        assert!(registry.get("storage").is_none());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.state("storage"), Some(ModuleState::Registered));
    }

    #[test]
    fn test_reset_allows_reinitialization() {
        let registry = ModuleRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .register("storage", &[], move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(service("s"))
            })
            .unwrap();

        registry.init("storage").unwrap();
        registry.reset();
        assert_eq!(registry.state("storage"), Some(ModuleState::Registered));
        assert!(registry.initialization_order().is_empty());

        registry.init("storage").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_shutdown_destroys_in_reverse_order() {
        struct Tracked {
            name: &'static str,
            log: Arc<Mutex<Vec<&'static str>>>,
        }

        impl Module for Tracked {
            fn destroy(&self) {
                self.log.lock().unwrap().push(self.name);
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ModuleRegistry::new();
        let l1 = log.clone();
        registry
            .register("storage", &[], move |_| {
                Ok(Arc::new(Tracked {
                    name: "storage",
                    log: l1.clone(),
                }))
            })
            .unwrap();
        let l2 = log.clone();
        registry
            .register("students", &["storage"], move |_| {
                Ok(Arc::new(Tracked {
                    name: "students",
                    log: l2.clone(),
                }))
            })
            .unwrap();

        registry.init_all();
        registry.shutdown();

        assert_eq!(*log.lock().unwrap(), vec!["students", "storage"]);
        assert_eq!(registry.state("students"), Some(ModuleState::Registered));
    }
}
