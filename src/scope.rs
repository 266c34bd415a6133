//! Resolution scopes
//!
//! A scope holds the instances cached for it (scoped, named-scope and, in the
//! root, singleton instances) and the disposables it owns. Child scopes keep a
//! non-owning reference to their parent, used only to find named scopes.

use crate::engine::Engine;
use crate::key::GenericType;
use crate::registration::{Disposer, RegistrationId};
use crate::request::{Generic, Overrides, Request, Resolvable, downcast};
use crate::{AnyArc, DiError, Injectable, Result};
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Unique scope identifier.
///
/// Each scope gets a unique ID for tracking and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique scope ID.
    #[inline]
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Key of a cached instance within one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotKey(pub(crate) RegistrationId);

/// A disposable owned by a scope.
struct Tracked {
    instance: AnyArc,
    disposer: Disposer,
    service: &'static str,
}

thread_local! {
    /// Slots whose construction is in progress on this thread.
    static CONSTRUCTING: RefCell<Vec<(ScopeId, SlotKey)>> = const { RefCell::new(Vec::new()) };
}

/// Pops the in-progress marker even when construction fails.
struct ConstructionGuard {
    scope: ScopeId,
    key: SlotKey,
}

impl ConstructionGuard {
    fn enter(scope: ScopeId, key: SlotKey) -> Option<Self> {
        CONSTRUCTING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&(scope, key)) {
                None
            } else {
                stack.push((scope, key));
                Some(Self { scope, key })
            }
        })
    }
}

impl Drop for ConstructionGuard {
    fn drop(&mut self) {
        CONSTRUCTING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(index) = stack.iter().rposition(|e| *e == (self.scope, self.key)) {
                stack.remove(index);
            }
        });
    }
}

/// Scope state shared by every handle and plan execution in that scope.
pub(crate) struct ScopeInner {
    id: ScopeId,
    name: Option<Arc<str>>,
    /// Names of this and the enclosing scopes, innermost first.
    names: Arc<[Arc<str>]>,
    parent: Option<Weak<ScopeInner>>,
    depth: u32,
    slots: DashMap<SlotKey, Arc<OnceCell<AnyArc>>, RandomState>,
    disposables: Mutex<Vec<Tracked>>,
    disposed: AtomicBool,
}

impl ScopeInner {
    pub(crate) fn root() -> Arc<Self> {
        Arc::new(Self {
            id: ScopeId::next(),
            name: None,
            names: Arc::from(Vec::new()),
            parent: None,
            depth: 0,
            slots: DashMap::with_hasher(RandomState::new()),
            disposables: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    pub(crate) fn child(parent: &Arc<ScopeInner>, name: Option<&str>) -> Arc<Self> {
        let name: Option<Arc<str>> = name.map(Arc::from);
        let names: Arc<[Arc<str>]> = match &name {
            Some(name) => std::iter::once(Arc::clone(name))
                .chain(parent.names.iter().cloned())
                .collect(),
            None => Arc::clone(&parent.names),
        };
        Arc::new(Self {
            id: ScopeId::next(),
            name,
            names,
            parent: Some(Arc::downgrade(parent)),
            depth: parent.depth + 1,
            slots: DashMap::with_hasher(RandomState::new()),
            disposables: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> ScopeId {
        self.id
    }

    #[inline]
    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub(crate) fn names(&self) -> &Arc<[Arc<str>]> {
        &self.names
    }

    #[inline]
    pub(crate) fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub(crate) fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    #[inline]
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// The cached instance under `key`, constructing it at most once.
    ///
    /// Double-checked: a lock-free probe first, then the slot's own
    /// initialization lock. Concurrent callers for the same slot wait for the
    /// single construction; a failed construction leaves the slot empty.
    pub(crate) fn get_or_create(
        &self,
        key: SlotKey,
        service: &'static str,
        create: impl FnOnce() -> Result<AnyArc>,
    ) -> Result<AnyArc> {
        if self.is_disposed() {
            return Err(DiError::Disposed);
        }

        if let Some(value) = self.slots.get(&key).and_then(|cell| cell.get().cloned()) {
            return Ok(value);
        }

        let cell = Arc::clone(
            self.slots
                .entry(key)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        );

        if let Some(value) = cell.get() {
            return Ok(Arc::clone(value));
        }

        let Some(_guard) = ConstructionGuard::enter(self.id, key) else {
            return Err(DiError::CircularDependency {
                type_name: service,
                path: vec![service, service],
            });
        };

        cell.get_or_try_init(create).map(Arc::clone)
    }

    /// Take ownership of a disposable.
    ///
    /// A scope that is already torn down releases it immediately.
    pub(crate) fn track(&self, instance: AnyArc, disposer: Disposer, service: &'static str) {
        let tracked = Tracked {
            instance,
            disposer,
            service,
        };
        if self.is_disposed() {
            Self::release(std::iter::once(tracked));
            return;
        }
        self.disposables.lock().push(tracked);
    }

    fn release(tracked: impl Iterator<Item = Tracked>) -> Vec<String> {
        let mut errors = Vec::new();
        for item in tracked {
            if let Err(reason) = (item.disposer)(&item.instance) {
                #[cfg(feature = "logging")]
                warn!(
                    target: "dependency_resolver",
                    service = item.service,
                    error = %reason,
                    "Disposable failed during scope teardown"
                );
                errors.push(format!("{}: {reason}", item.service));
            }
        }
        errors
    }

    /// Release owned disposables in reverse acquisition order and drop cached
    /// instances. A second call does nothing.
    pub(crate) fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let tracked = std::mem::take(&mut *self.disposables.lock());

        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_resolver",
            scope_id = self.id.0,
            depth = self.depth,
            disposables = tracked.len(),
            cached = self.slots.len(),
            "Disposing scope"
        );

        let errors = Self::release(tracked.into_iter().rev());
        self.slots.clear();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DiError::DisposalFailed { errors })
        }
    }

    /// The nearest scope, starting with this one, carrying `name`.
    pub(crate) fn find_named(self: &Arc<Self>, name: &str) -> Result<Option<Arc<ScopeInner>>> {
        let mut current = Arc::clone(self);
        loop {
            if current.name.as_deref() == Some(name) {
                return Ok(Some(current));
            }
            let next = match &current.parent {
                Some(parent) => parent.upgrade().ok_or(DiError::ParentDropped)?,
                None => return Ok(None),
            };
            current = next;
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if let Err(_err) = self.dispose() {
            #[cfg(feature = "logging")]
            warn!(
                target: "dependency_resolver",
                scope_id = self.id.0,
                error = %_err,
                "Scope dropped with failing disposables"
            );
        }
    }
}

/// Handle to a resolution scope.
///
/// Cloning is cheap and shares the scope. Scoped instances resolved through
/// one scope are reused by every resolve made through it; a child scope gets
/// its own. The scope is torn down by [`Scope::dispose`], or when the last
/// handle goes away.
///
/// # Examples
///
/// ```rust
/// use dependency_resolver::{Container, Lifetime};
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// struct RequestContext {
///     id: u32,
/// }
///
/// static NEXT: AtomicU32 = AtomicU32::new(1);
///
/// let container = Container::new();
/// container
///     .scoped(|| RequestContext { id: NEXT.fetch_add(1, Ordering::SeqCst) })
///     .unwrap();
///
/// let request = container.begin_scope(Some("request")).unwrap();
/// let a = request.get::<RequestContext>().unwrap();
/// let b = request.get::<RequestContext>().unwrap();
/// assert_eq!(a.id, b.id);
///
/// let other = container.begin_scope(None).unwrap();
/// assert_ne!(other.get::<RequestContext>().unwrap().id, a.id);
/// request.dispose().unwrap();
/// ```
#[derive(Clone)]
pub struct Scope {
    pub(crate) engine: Arc<Engine>,
    pub(crate) inner: Arc<ScopeInner>,
}

impl Scope {
    pub(crate) fn new(engine: Arc<Engine>, inner: Arc<ScopeInner>) -> Self {
        Self { engine, inner }
    }

    /// Unique id of this scope.
    #[inline]
    pub fn id(&self) -> ScopeId {
        self.inner.id()
    }

    /// The scope's name, if it was given one.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.inner.name()
    }

    /// Nesting depth (0 = root).
    #[inline]
    pub fn depth(&self) -> u32 {
        self.inner.depth()
    }

    /// Whether the scope was torn down.
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed() || self.engine.is_disposed()
    }

    /// Resolve a required service.
    #[inline]
    pub fn get<T: Injectable>(&self) -> Result<Arc<T>> {
        self.resolve::<Arc<T>>()
    }

    /// Resolve the registration of `T` carrying `name`.
    pub fn get_named<T: Injectable>(&self, name: &str) -> Result<Arc<T>> {
        let slot = self.resolve_request(Request::of::<T>().named(name), &Overrides::new())?;
        let Some(value) = slot else {
            return Err(DiError::NotFound {
                type_name: std::any::type_name::<T>(),
                type_id: std::any::TypeId::of::<T>(),
                name: Some(name.to_owned()),
            });
        };
        downcast(value)
    }

    /// Resolve a service, or `None` when nothing can provide it.
    ///
    /// Errors other than a missing registration (a dependency cycle, a failed
    /// constructor) still surface as `None`; use [`Scope::resolve`] with
    /// `Option<Arc<T>>` to see them.
    #[inline]
    pub fn try_get<T: Injectable>(&self) -> Option<Arc<T>> {
        self.resolve::<Option<Arc<T>>>().ok().flatten()
    }

    /// Resolve every selectable registration of `T`; empty when there is none.
    #[inline]
    pub fn get_all<T: Injectable>(&self) -> Result<Vec<Arc<T>>> {
        self.resolve::<Vec<Arc<T>>>()
    }

    /// Resolve a closed generic service, specializing an open registration if
    /// the closed type has none of its own.
    #[inline]
    pub fn get_generic<T: GenericType>(&self) -> Result<Arc<T>> {
        self.resolve::<Generic<T>>().map(|generic| generic.0)
    }

    /// Resolve any [`Resolvable`] form: `Arc<T>`, `Option<Arc<T>>`,
    /// `Vec<Arc<T>>`, `Lazy<T>`, factories and accessors.
    #[inline]
    pub fn resolve<R: Resolvable>(&self) -> Result<R> {
        self.resolve_with(Overrides::new())
    }

    /// Resolve with per-call instances outranking every registration.
    pub fn resolve_with<R: Resolvable>(&self, overrides: Overrides) -> Result<R> {
        let slot = self.resolve_request(R::request(), &overrides)?;
        R::from_slot(slot)
    }

    /// Resolve an untyped request. `Ok(None)` only for optional requests.
    pub fn resolve_request(&self, request: Request, overrides: &Overrides) -> Result<Option<AnyArc>> {
        self.engine.resolve(&self.inner, &request, overrides)
    }

    /// Open a child scope, optionally named for named-scope lifetimes.
    pub fn begin_scope(&self, name: Option<&str>) -> Result<Scope> {
        let child = self.engine.begin_scope(&self.inner, name)?;
        Ok(Scope::new(Arc::clone(&self.engine), child))
    }

    /// Tear the scope down, releasing its disposables in reverse order.
    ///
    /// Disposing the root scope tears the whole container down, singletons
    /// included. Disposing twice is a no-op.
    pub fn dispose(&self) -> Result<()> {
        if self.inner.is_root() {
            self.engine.dispose()
        } else {
            self.inner.dispose()
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("depth", &self.inner.depth)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
