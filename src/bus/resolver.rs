//! Per-message handler resolution.
//!
//! Handlers registered with `subscribe_to_*_resolved` are not built up front:
//! every inbound message opens a [`ResolverScope`], resolves a handler
//! instance from it, runs it, and releases it. Container adapters implement
//! [`ServiceResolver`]; [`ServiceRegistry`] is the built-in factory-based one.

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

/// Error returned when a scope cannot produce the requested service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no service registered for `{0}`")]
pub struct ResolveError(pub &'static str);

/// Source of resolution scopes.
pub trait ServiceResolver: Send + Sync {
    /// Open a scope for a single message.
    fn begin_scope(&self) -> Box<dyn ResolverScope>;
}

/// A short-lived resolution scope.
pub trait ResolverScope: Send {
    fn resolve_any(&mut self, type_id: TypeId) -> Option<Box<dyn Any + Send>>;

    /// Give an instance back to the scope. The default just drops it.
    fn release_any(&mut self, instance: Box<dyn Any + Send>) {
        drop(instance);
    }
}

impl dyn ResolverScope {
    pub fn resolve<T: Any + Send>(&mut self) -> Result<Box<T>, ResolveError> {
        let missing = || ResolveError(std::any::type_name::<T>());
        self.resolve_any(TypeId::of::<T>())
            .ok_or_else(missing)?
            .downcast::<T>()
            .map_err(|_| missing())
    }

    pub fn release<T: Any + Send>(&mut self, instance: Box<T>) {
        self.release_any(instance);
    }
}

type Factory = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

#[derive(Debug, Default)]
struct ScopeStats {
    scopes: AtomicUsize,
    resolved: AtomicUsize,
    released: AtomicUsize,
}

/// Factory-backed resolver: each resolve calls the registered factory.
///
/// Cheap to clone; clones share registrations and counters.
///
/// ```
/// use nybus::ServiceRegistry;
///
/// struct Greeter(&'static str);
///
/// let registry = ServiceRegistry::new().with(|| Greeter("hello"));
/// assert!(registry.contains::<Greeter>());
/// ```
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    factories: Arc<DashMap<TypeId, Factory>>,
    stats: Arc<ScopeStats>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `T`, replacing any previous one.
    pub fn register<T, F>(&self, factory: F)
    where
        T: Any + Send,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || Box::new(factory()) as Box<dyn Any + Send>);
        self.factories.insert(TypeId::of::<T>(), factory);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<T, F>(self, factory: F) -> Self
    where
        T: Any + Send,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.register(factory);
        self
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<T>())
    }

    /// Number of scopes opened so far.
    pub fn scopes_started(&self) -> usize {
        self.stats.scopes.load(Ordering::SeqCst)
    }

    pub fn resolved(&self) -> usize {
        self.stats.resolved.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.stats.released.load(Ordering::SeqCst)
    }
}

impl ServiceResolver for ServiceRegistry {
    fn begin_scope(&self) -> Box<dyn ResolverScope> {
        self.stats.scopes.fetch_add(1, Ordering::SeqCst);
        Box::new(RegistryScope {
            factories: Arc::clone(&self.factories),
            stats: Arc::clone(&self.stats),
        })
    }
}

struct RegistryScope {
    factories: Arc<DashMap<TypeId, Factory>>,
    stats: Arc<ScopeStats>,
}

impl ResolverScope for RegistryScope {
    fn resolve_any(&mut self, type_id: TypeId) -> Option<Box<dyn Any + Send>> {
        let factory = self.factories.get(&type_id).map(|f| Arc::clone(f.value()))?;
        self.stats.resolved.fetch_add(1, Ordering::SeqCst);
        Some(factory())
    }

    fn release_any(&mut self, instance: Box<dyn Any + Send>) {
        self.stats.released.fetch_add(1, Ordering::SeqCst);
        drop(instance);
    }
}
