//! Root container
//!
//! The `Container` owns the registration store, the resolution engine and the
//! root scope. It is where registrations come in; resolution and scope
//! creation are inherited from the root [`Scope`] it dereferences to.

use crate::config::ContainerConfig;
use crate::engine::Engine;
use crate::key::{ServiceKey, ServiceType};
use crate::registration::{Constructor, Implementation, Kind, Registration, RegistrationId, Service};
use crate::scope::Scope;
use crate::storage::AddOutcome;
use crate::{DiError, Injectable, Lifetime, Result};
use std::ops::Deref;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// A reusable unit of registrations.
///
/// # Examples
///
/// ```rust
/// use dependency_resolver::{CompositionRoot, Container, Result};
///
/// struct Settings {
///     verbose: bool,
/// }
///
/// struct SettingsModule;
///
/// impl CompositionRoot for SettingsModule {
///     fn compose(&self, container: &Container) -> Result<()> {
///         container.singleton(Settings { verbose: true })?;
///         Ok(())
///     }
/// }
///
/// let container = Container::new();
/// container.compose_by(&SettingsModule).unwrap();
/// assert!(container.get::<Settings>().unwrap().verbose);
/// ```
pub trait CompositionRoot {
    /// Register this unit's services into `container`.
    fn compose(&self, container: &Container) -> Result<()>;
}

/// Dependency injection container.
///
/// Registrations are immutable once added and the store is safe to mutate
/// while other threads resolve; every change invalidates the compiled plans.
/// The container dereferences to its root [`Scope`], so `get`, `resolve`,
/// `begin_scope` and `dispose` are available directly.
///
/// # Examples
///
/// ```rust
/// use dependency_resolver::Container;
/// use std::sync::Arc;
///
/// struct Database {
///     url: String,
/// }
///
/// let container = Container::new();
/// container.singleton(Database { url: "postgres://localhost".into() }).unwrap();
///
/// let db: Arc<Database> = container.get().unwrap();
/// assert_eq!(db.url, "postgres://localhost");
/// ```
pub struct Container {
    root: Scope,
}

impl Container {
    /// Create a container with the default configuration.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    /// Create a container with `config`.
    pub fn with_config(config: ContainerConfig) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_resolver",
            duplicates = ?config.duplicates,
            default_lifetime = config.default_lifetime.label(),
            lazy_cycles = config.lazy_circular_dependencies,
            "Creating new root container"
        );

        let engine = Engine::new(config);
        let root = Arc::clone(engine.root());
        Self {
            root: Scope::new(engine, root),
        }
    }

    /// The container-wide configuration.
    #[inline]
    pub fn config(&self) -> &ContainerConfig {
        self.root.engine.config()
    }

    /// The root scope.
    #[inline]
    pub fn root(&self) -> &Scope {
        &self.root
    }

    // =========================================================================
    // Registration Methods
    // =========================================================================

    /// Add a registration.
    ///
    /// Registrations without a lifetime get the configured default. Returns the
    /// id answering for the registration: its own, the one it took over when
    /// it replaced another, or the one kept when it was skipped.
    pub fn register(&self, registration: Registration) -> Result<RegistrationId> {
        let engine = &self.root.engine;
        if engine.is_disposed() {
            return Err(DiError::Disposed);
        }

        let registration = registration.with_default_lifetime(&engine.config().default_lifetime);
        if let Err(err) = registration.validate() {
            #[cfg(feature = "logging")]
            warn!(
                target: "dependency_resolver",
                service = registration.service().name(),
                error = %err,
                "Registration rejected"
            );
            return Err(err);
        }

        let own_id = registration.id();
        let service = *registration.service();

        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_resolver",
            service = service.name(),
            implementation = registration.implementation_type().name(),
            lifetime = registration.effective_lifetime().label(),
            name = ?registration.name(),
            decorator = registration.is_decorator(),
            registration_id = own_id.as_u64(),
            "Registering service"
        );

        let owned_instance = match (&registration.implementation.kind, &registration.disposer) {
            (Kind::Instance(value), Some(disposer)) if registration.tracks_disposal() => {
                Some((Arc::clone(value), Arc::clone(disposer)))
            }
            _ => None,
        };

        match engine.store().add(registration, engine.config().duplicates)? {
            AddOutcome::Added(id) | AddOutcome::Replaced(id) => {
                engine.invalidate();
                if let Some((value, disposer)) = owned_instance {
                    engine.root().track(value, disposer, service.name());
                }
                Ok(id)
            }
            AddOutcome::Skipped(kept) => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "dependency_resolver",
                    service = service.name(),
                    kept = ?kept,
                    "Registration skipped"
                );
                Ok(kept.unwrap_or(own_id))
            }
        }
    }

    /// Remove every registration of the service (every decorator, for a
    /// decorator registration) and add `registration` in their place.
    pub fn remap(&self, registration: Registration) -> Result<RegistrationId> {
        let engine = &self.root.engine;
        if engine.is_disposed() {
            return Err(DiError::Disposed);
        }
        registration.validate()?;

        let removed = engine
            .store()
            .remove_all(registration.service(), registration.is_decorator());
        if removed > 0 {
            #[cfg(feature = "logging")]
            debug!(
                target: "dependency_resolver",
                service = registration.service().name(),
                removed = removed,
                "Registrations remapped"
            );
            engine.invalidate();
        }
        self.register(registration)
    }

    /// Register a ready-made instance as a singleton.
    #[inline]
    pub fn singleton<T: Injectable>(&self, instance: T) -> Result<RegistrationId> {
        self.register(Registration::instance(instance))
    }

    /// Register a ready-made instance under the qualifier `name`.
    #[inline]
    pub fn instance_named<T: Injectable>(
        &self,
        name: impl Into<Arc<str>>,
        instance: T,
    ) -> Result<RegistrationId> {
        self.register(Registration::instance(instance).named(name))
    }

    /// Register a singleton built by `factory` on first access.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dependency_resolver::Container;
    ///
    /// struct ExpensiveService {
    ///     data: Vec<u8>,
    /// }
    ///
    /// let container = Container::new();
    /// container
    ///     .lazy(|| ExpensiveService { data: vec![0; 1024] })
    ///     .unwrap();
    /// assert_eq!(container.get::<ExpensiveService>().unwrap().data.len(), 1024);
    /// ```
    #[inline]
    pub fn lazy<T: Injectable, F>(&self, factory: F) -> Result<RegistrationId>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.register(from_factory(factory).with_lifetime(Lifetime::Singleton))
    }

    /// Register a service built by `factory` on every resolve.
    #[inline]
    pub fn transient<T: Injectable, F>(&self, factory: F) -> Result<RegistrationId>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.register(from_factory(factory).with_lifetime(Lifetime::Transient))
    }

    /// Register a service built by `factory` once per scope.
    #[inline]
    pub fn scoped<T: Injectable, F>(&self, factory: F) -> Result<RegistrationId>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.register(from_factory(factory).with_lifetime(Lifetime::Scoped))
    }

    /// Register a [`Service`] with the default lifetime.
    #[inline]
    pub fn provide<S: Service>(&self) -> Result<RegistrationId> {
        self.register(Registration::of::<S>(Implementation::constructor(
            Constructor::of::<S>(),
        )))
    }

    /// Apply a composition root.
    pub fn compose_by(&self, root: &impl CompositionRoot) -> Result<()> {
        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_resolver",
            composition_root = std::any::type_name_of_val(root),
            "Composing registrations"
        );

        root.compose(self)
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Every stored registration with its service key, decorators included.
    pub fn registrations(&self) -> Vec<(ServiceKey, Arc<Registration>)> {
        self.root
            .engine
            .store()
            .all()
            .into_iter()
            .map(|registration| {
                let key = ServiceKey::new(*registration.service(), registration.name_arc().cloned());
                (key, registration)
            })
            .collect()
    }

    /// Whether a registration (decorators aside) exists for `T`.
    #[inline]
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.root.engine.store().contains(&ServiceType::of::<T>())
    }

    /// Number of stored registrations, decorators included.
    #[inline]
    pub fn len(&self) -> usize {
        self.root.engine.store().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn from_factory<T: Injectable, F>(factory: F) -> Registration
where
    F: Fn() -> T + Send + Sync + 'static,
{
    Registration::of::<T>(Implementation::constructor(Constructor::from_fn(
        move |_: ()| factory(),
    )))
}

impl Deref for Container {
    type Target = Scope;

    #[inline]
    fn deref(&self) -> &Scope {
        &self.root
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("registrations", &self.len())
            .field("config", self.config())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::registration::Dispose;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestService {
        value: String,
    }

    #[test]
    fn test_singleton() {
        let container = Container::new();
        container
            .singleton(TestService {
                value: "test".into(),
            })
            .unwrap();

        let s1 = container.get::<TestService>().unwrap();
        let s2 = container.get::<TestService>().unwrap();

        assert_eq!(s1.value, "test");
        assert!(Arc::ptr_eq(&s1, &s2));
    }

    #[test]
    fn test_lazy() {
        static CREATED: AtomicBool = AtomicBool::new(false);

        let container = Container::new();
        container
            .lazy(|| {
                CREATED.store(true, Ordering::SeqCst);
                TestService {
                    value: "lazy".into(),
                }
            })
            .unwrap();

        assert!(!CREATED.load(Ordering::SeqCst));

        let s = container.get::<TestService>().unwrap();
        assert!(CREATED.load(Ordering::SeqCst));
        assert_eq!(s.value, "lazy");
        assert!(Arc::ptr_eq(&s, &container.get::<TestService>().unwrap()));
    }

    #[test]
    fn test_transient() {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        struct Counter(u32);

        let container = Container::new();
        container
            .transient(|| Counter(COUNTER.fetch_add(1, Ordering::SeqCst)))
            .unwrap();

        let c1 = container.get::<Counter>().unwrap();
        let c2 = container.get::<Counter>().unwrap();

        assert_ne!(c1.0, c2.0);
    }

    #[test]
    fn test_scoped_shortcut() {
        let container = Container::new();
        container
            .scoped(|| TestService {
                value: "scoped".into(),
            })
            .unwrap();

        let scope = container.begin_scope(None).unwrap();
        let a = scope.get::<TestService>().unwrap();
        assert!(Arc::ptr_eq(&a, &scope.get::<TestService>().unwrap()));
        assert!(!Arc::ptr_eq(&a, &container.get::<TestService>().unwrap()));
    }

    #[test]
    fn test_provide_service() {
        struct Config {
            debug: bool,
        }

        struct Logger {
            config: Arc<Config>,
        }

        impl Service for Logger {
            type Dependencies = Arc<Config>;

            fn create(config: Arc<Config>) -> Self {
                Logger { config }
            }
        }

        let container = Container::new();
        container.singleton(Config { debug: true }).unwrap();
        container.provide::<Logger>().unwrap();
        assert!(container.get::<Logger>().unwrap().config.debug);
    }

    #[test]
    fn test_instance_named() {
        let container = Container::new();
        container
            .instance_named(
                "primary",
                TestService {
                    value: "one".into(),
                },
            )
            .unwrap();
        assert_eq!(
            container.get_named::<TestService>("primary").unwrap().value,
            "one"
        );
        assert!(container.try_get::<TestService>().is_none());
    }

    #[test]
    fn test_default_lifetime_applies_to_unset_registrations() {
        let container = Container::with_config(ContainerConfig::new().default_lifetime(Lifetime::Singleton));
        container
            .register(Registration::of::<TestService>(Implementation::constructor(
                Constructor::from_fn(|_: ()| TestService {
                    value: "default".into(),
                }),
            )))
            .unwrap();

        let a = container.get::<TestService>().unwrap();
        let b = container.begin_scope(None).unwrap().get::<TestService>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_duplicate_policies() {
        let replacing = Container::with_config(ContainerConfig::new().duplicates(DuplicatePolicy::ReplaceExisting));
        let first = replacing.singleton(1u32).unwrap();
        let second = replacing.singleton(2u32).unwrap();
        assert_eq!(first, second);
        assert_eq!(*replacing.get::<u32>().unwrap(), 2);
        assert_eq!(replacing.len(), 1);

        let skipping = Container::with_config(ContainerConfig::new().duplicates(DuplicatePolicy::SkipDuplications));
        let kept = skipping.singleton(1u32).unwrap();
        assert_eq!(skipping.singleton(2u32).unwrap(), kept);
        assert_eq!(*skipping.get::<u32>().unwrap(), 1);

        let throwing = Container::with_config(ContainerConfig::new().duplicates(DuplicatePolicy::ThrowOnDuplicate));
        throwing.singleton(1u32).unwrap();
        assert!(matches!(
            throwing.singleton(2u32),
            Err(DiError::AlreadyRegistered { .. })
        ));
        throwing.instance_named("other", 3u32).unwrap();
        assert_eq!(throwing.len(), 2);
    }

    #[test]
    fn test_replace_directives() {
        let container = Container::new();
        let id = container.singleton(1u32).unwrap();
        container.singleton(2u8).unwrap();

        let replaced = container
            .register(Registration::instance(3u32).replace_existing())
            .unwrap();
        assert_eq!(replaced, id);
        assert_eq!(*container.get::<u32>().unwrap(), 3);

        container
            .register(Registration::instance(4u64).replace_only_if_exists())
            .unwrap();
        assert!(!container.contains::<u64>());

        container
            .register(Registration::instance(5u64).replace_existing())
            .unwrap();
        assert_eq!(*container.get::<u64>().unwrap(), 5);
    }

    #[test]
    fn test_remap() {
        let container = Container::new();
        container.singleton(1u32).unwrap();
        container.instance_named("other", 2u32).unwrap();
        container
            .register(Registration::decorator::<u32>(Implementation::constructor(
                Constructor::from_fn(|inner: Arc<u32>| *inner + 100),
            )))
            .unwrap();
        assert_eq!(*container.get::<u32>().unwrap(), 101);

        container.remap(Registration::instance(7u32)).unwrap();
        assert_eq!(*container.get::<u32>().unwrap(), 107);
        assert_eq!(container.get_all::<u32>().unwrap().len(), 1);

        container
            .remap(Registration::decorator::<u32>(Implementation::constructor(
                Constructor::from_fn(|inner: Arc<u32>| *inner * 2),
            )))
            .unwrap();
        assert_eq!(*container.get::<u32>().unwrap(), 14);
    }

    #[test]
    fn test_invalid_registration_rejected() {
        let container = Container::new();
        let wrong = Registration::of::<u32>(Implementation::constructor(Constructor::from_fn(
            |_: ()| 1u8,
        )));
        assert!(matches!(
            container.register(wrong),
            Err(DiError::CreationFailed { .. })
        ));
        assert!(container.is_empty());
    }

    #[test]
    fn test_compose_by() {
        struct Storage;

        impl CompositionRoot for Storage {
            fn compose(&self, container: &Container) -> Result<()> {
                container.singleton(1u32)?;
                container.instance_named("backup", 2u32)?;
                Ok(())
            }
        }

        let container = Container::new();
        container.compose_by(&Storage).unwrap();
        assert_eq!(container.len(), 2);
        assert_eq!(*container.get_named::<u32>("backup").unwrap(), 2);
    }

    #[test]
    fn test_registrations_diagnostics() {
        let container = Container::new();
        container.singleton(1u32).unwrap();
        container.instance_named("port", 2u16).unwrap();
        container
            .register(Registration::decorator::<u32>(Implementation::constructor(
                Constructor::from_fn(|inner: Arc<u32>| *inner),
            )))
            .unwrap();

        let all = container.registrations();
        assert_eq!(all.len(), 3);
        assert!(
            all.iter()
                .any(|(key, _)| *key == ServiceKey::named::<u16>("port"))
        );
        assert_eq!(all.iter().filter(|(_, r)| r.is_decorator()).count(), 1);
        assert!(container.contains::<u32>());
        assert!(!container.contains::<u64>());
    }

    #[test]
    fn test_registered_instances_disposed_with_container() {
        struct Connection {
            log: Arc<Mutex<Vec<&'static str>>>,
        }

        impl Dispose for Connection {
            fn dispose(&self) -> std::result::Result<(), String> {
                self.log.lock().push("connection");
                Ok(())
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let container = Container::new();
        container
            .register(
                Registration::instance(Connection {
                    log: Arc::clone(&log),
                })
                .disposable::<Connection>(),
            )
            .unwrap();
        container
            .register(
                Registration::instance(Connection {
                    log: Arc::clone(&log),
                })
                .disposable::<Connection>()
                .without_disposal_tracking(),
            )
            .unwrap();

        container.dispose().unwrap();
        assert_eq!(*log.lock(), vec!["connection"]);
        assert!(container.is_disposed());
    }

    #[test]
    fn test_registration_after_dispose_fails() {
        let container = Container::new();
        container.dispose().unwrap();
        assert!(matches!(container.singleton(1u8), Err(DiError::Disposed)));
        assert!(matches!(
            container.remap(Registration::instance(1u8)),
            Err(DiError::Disposed)
        ));
    }
}
