//! Requests and wrapper types
//!
//! A [`Request`] is what a caller or a constructor parameter asks the engine
//! for. Typed requests are described by [`Resolvable`], which is implemented
//! for plain services (`Arc<T>`), optional services (`Option<Arc<T>>`),
//! collections of all matches (`Vec<Arc<T>>`) and the indirection wrappers
//! defined here: [`Lazy`], [`Factory`], [`Factory1`], [`Keyed`], [`Owned`]
//! and [`Generic`].

use crate::key::{GenericType, ServiceType};
use crate::scope::Scope;
use crate::{AnyArc, DiError, Injectable, Result};
use once_cell::sync::OnceCell;
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

/// Deferred evaluation of a compiled plan.
pub(crate) type Thunk = Arc<dyn Fn() -> Result<AnyArc> + Send + Sync>;
/// Plan invocation with call-time parameters.
pub(crate) type FactoryFn = Arc<dyn Fn(Vec<AnyArc>) -> Result<AnyArc> + Send + Sync>;
/// Resolution of a qualified service at call time.
pub(crate) type KeyedFn = Arc<dyn Fn(&str) -> Result<AnyArc> + Send + Sync>;

/// How a wrapper request unwraps to its inner request and wraps the result.
pub(crate) enum Wrapper {
    Lazy {
        inner: Request,
        wrap: fn(Thunk) -> AnyArc,
    },
    Factory {
        inner: Request,
        parameters: Vec<ServiceType>,
        wrap: fn(FactoryFn) -> AnyArc,
    },
    Enumerable {
        item: Request,
        wrap: fn(Vec<AnyArc>) -> Result<AnyArc>,
    },
    Keyed {
        item: ServiceType,
        wrap: fn(KeyedFn) -> AnyArc,
    },
    Owned {
        inner: Request,
        wrap: fn(AnyArc, Scope) -> Result<AnyArc>,
    },
}

/// A request for a service.
///
/// Carries the requested type, the optional qualifier, whether an absent
/// result is acceptable, marker types attached to the injection site (used by
/// marker conditions) and, for wrapper types, how to unwrap them.
#[derive(Clone)]
pub struct Request {
    pub(crate) service: ServiceType,
    pub(crate) name: Option<Arc<str>>,
    pub(crate) optional: bool,
    pub(crate) markers: Vec<TypeId>,
    pub(crate) wrapper: Option<Arc<Wrapper>>,
}

impl Request {
    /// Request for the service `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::for_type(ServiceType::of::<T>())
    }

    /// Request for an already-built service identity.
    #[inline]
    pub fn for_type(service: ServiceType) -> Self {
        Self {
            service,
            name: None,
            optional: false,
            markers: Vec::new(),
            wrapper: None,
        }
    }

    pub(crate) fn wrapped(service: ServiceType, wrapper: Wrapper) -> Self {
        Self {
            wrapper: Some(Arc::new(wrapper)),
            ..Self::for_type(service)
        }
    }

    /// Ask for the registration with this qualifier.
    #[inline]
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Accept an absent result instead of failing.
    #[inline]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Attach a marker type to the injection site.
    #[inline]
    pub fn marked<M: 'static>(mut self) -> Self {
        self.markers.push(TypeId::of::<M>());
        self
    }

    /// The requested type.
    #[inline]
    pub fn service(&self) -> &ServiceType {
        &self.service
    }

    /// The requested qualifier.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether an absent result is acceptable.
    #[inline]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Whether this request is for an indirection type.
    #[inline]
    pub fn is_wrapper(&self) -> bool {
        self.wrapper.is_some()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("service", &self.service)
            .field("name", &self.name)
            .field("optional", &self.optional)
            .field("wrapper", &self.wrapper.is_some())
            .finish()
    }
}

/// Downcast a resolved instance to `T`.
#[inline]
pub(crate) fn downcast<T: Injectable>(any: AnyArc) -> Result<Arc<T>> {
    any.downcast::<T>().map_err(|_| DiError::type_mismatch::<T>())
}

/// Types that can be requested from a scope or declared as a constructor
/// parameter.
pub trait Resolvable: Sized + 'static {
    /// Describe the request.
    fn request() -> Request;

    /// Turn the resolved slot (absent for unsatisfied optional requests) into
    /// the typed value.
    fn from_slot(slot: Option<AnyArc>) -> Result<Self>;
}

impl<T: Injectable> Resolvable for Arc<T> {
    #[inline]
    fn request() -> Request {
        Request::of::<T>()
    }

    #[inline]
    fn from_slot(slot: Option<AnyArc>) -> Result<Self> {
        downcast(slot.ok_or_else(DiError::not_found::<T>)?)
    }
}

impl<T: Injectable> Resolvable for Option<Arc<T>> {
    #[inline]
    fn request() -> Request {
        Request::of::<T>().optional()
    }

    #[inline]
    fn from_slot(slot: Option<AnyArc>) -> Result<Self> {
        slot.map(downcast::<T>).transpose()
    }
}

fn wrap_all<T: Injectable>(items: Vec<AnyArc>) -> Result<AnyArc> {
    let items = items
        .into_iter()
        .map(downcast::<T>)
        .collect::<Result<Vec<Arc<T>>>>()?;
    Ok(Arc::new(items))
}

impl<T: Injectable> Resolvable for Vec<Arc<T>> {
    fn request() -> Request {
        Request::wrapped(
            ServiceType::of::<Vec<Arc<T>>>(),
            Wrapper::Enumerable {
                item: Request::of::<T>(),
                wrap: wrap_all::<T>,
            },
        )
    }

    fn from_slot(slot: Option<AnyArc>) -> Result<Self> {
        match slot {
            Some(any) => Ok((*downcast::<Vec<Arc<T>>>(any)?).clone()),
            None => Ok(Vec::new()),
        }
    }
}

// =============================================================================
// Lazy
// =============================================================================

/// Deferred value: the service is constructed on the first [`Lazy::get`].
///
/// When the container allows it, a `Lazy<T>` parameter also breaks a
/// dependency cycle, because the plan for `T` is only compiled on evaluation.
pub struct Lazy<T> {
    thunk: Thunk,
    value: Arc<OnceCell<Arc<T>>>,
}

impl<T: Injectable> Lazy<T> {
    pub(crate) fn new(thunk: Thunk) -> Self {
        Self {
            thunk,
            value: Arc::new(OnceCell::new()),
        }
    }

    /// Evaluate (once) and return the value.
    pub fn get(&self) -> Result<Arc<T>> {
        self.value
            .get_or_try_init(|| downcast::<T>((self.thunk)()?))
            .map(Arc::clone)
    }

    /// Whether the value was already produced.
    #[inline]
    pub fn is_evaluated(&self) -> bool {
        self.value.get().is_some()
    }
}

impl<T> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self {
            thunk: Arc::clone(&self.thunk),
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("service", &std::any::type_name::<T>())
            .field("evaluated", &self.value.get().is_some())
            .finish()
    }
}

fn wrap_lazy<T: Injectable>(thunk: Thunk) -> AnyArc {
    Arc::new(Lazy::<T>::new(thunk))
}

impl<T: Injectable> Resolvable for Lazy<T> {
    fn request() -> Request {
        Request::wrapped(
            ServiceType::of::<Lazy<T>>(),
            Wrapper::Lazy {
                inner: Request::of::<T>(),
                wrap: wrap_lazy::<T>,
            },
        )
    }

    fn from_slot(slot: Option<AnyArc>) -> Result<Self> {
        let any = slot.ok_or_else(DiError::not_found::<Lazy<T>>)?;
        Ok((*downcast::<Lazy<T>>(any)?).clone())
    }
}

// =============================================================================
// Factories
// =============================================================================

/// Zero-argument factory: every [`Factory::create`] runs the compiled plan for `T`.
pub struct Factory<T> {
    invoke: FactoryFn,
    _service: PhantomData<fn() -> T>,
}

impl<T: Injectable> Factory<T> {
    /// Produce an instance according to `T`'s lifetime.
    pub fn create(&self) -> Result<Arc<T>> {
        downcast((self.invoke)(Vec::new())?)
    }
}

impl<T> Clone for Factory<T> {
    fn clone(&self) -> Self {
        Self {
            invoke: Arc::clone(&self.invoke),
            _service: PhantomData,
        }
    }
}

fn wrap_factory<T: Injectable>(invoke: FactoryFn) -> AnyArc {
    Arc::new(Factory::<T> {
        invoke,
        _service: PhantomData,
    })
}

impl<T: Injectable> Resolvable for Factory<T> {
    fn request() -> Request {
        Request::wrapped(
            ServiceType::of::<Factory<T>>(),
            Wrapper::Factory {
                inner: Request::of::<T>(),
                parameters: Vec::new(),
                wrap: wrap_factory::<T>,
            },
        )
    }

    fn from_slot(slot: Option<AnyArc>) -> Result<Self> {
        let any = slot.ok_or_else(DiError::not_found::<Factory<T>>)?;
        Ok((*downcast::<Factory<T>>(any)?).clone())
    }
}

/// Parametrized factory: the argument passed to [`Factory1::create`] satisfies
/// any dependency of type `A` while `T` is being constructed.
pub struct Factory1<A, T> {
    invoke: FactoryFn,
    _service: PhantomData<fn(A) -> T>,
}

impl<A: Injectable, T: Injectable> Factory1<A, T> {
    /// Produce an instance, injecting `argument` wherever an `A` is needed.
    pub fn create(&self, argument: A) -> Result<Arc<T>> {
        downcast((self.invoke)(vec![Arc::new(argument) as AnyArc])?)
    }
}

impl<A, T> Clone for Factory1<A, T> {
    fn clone(&self) -> Self {
        Self {
            invoke: Arc::clone(&self.invoke),
            _service: PhantomData,
        }
    }
}

fn wrap_factory1<A: Injectable, T: Injectable>(invoke: FactoryFn) -> AnyArc {
    Arc::new(Factory1::<A, T> {
        invoke,
        _service: PhantomData,
    })
}

impl<A: Injectable, T: Injectable> Resolvable for Factory1<A, T> {
    fn request() -> Request {
        Request::wrapped(
            ServiceType::of::<Factory1<A, T>>(),
            Wrapper::Factory {
                inner: Request::of::<T>(),
                parameters: vec![ServiceType::of::<A>()],
                wrap: wrap_factory1::<A, T>,
            },
        )
    }

    fn from_slot(slot: Option<AnyArc>) -> Result<Self> {
        let any = slot.ok_or_else(DiError::not_found::<Factory1<A, T>>)?;
        Ok((*downcast::<Factory1<A, T>>(any)?).clone())
    }
}

// =============================================================================
// Accessors
// =============================================================================

/// Named accessor: resolves a qualified `T` at call time from the scope the
/// accessor was resolved in.
pub struct Keyed<T> {
    resolve: KeyedFn,
    _service: PhantomData<fn() -> T>,
}

impl<T: Injectable> Keyed<T> {
    /// Resolve the registration of `T` carrying `name`.
    pub fn get(&self, name: &str) -> Result<Arc<T>> {
        downcast((self.resolve)(name)?)
    }
}

impl<T> Clone for Keyed<T> {
    fn clone(&self) -> Self {
        Self {
            resolve: Arc::clone(&self.resolve),
            _service: PhantomData,
        }
    }
}

fn wrap_keyed<T: Injectable>(resolve: KeyedFn) -> AnyArc {
    Arc::new(Keyed::<T> {
        resolve,
        _service: PhantomData,
    })
}

impl<T: Injectable> Resolvable for Keyed<T> {
    fn request() -> Request {
        Request::wrapped(
            ServiceType::of::<Keyed<T>>(),
            Wrapper::Keyed {
                item: ServiceType::of::<T>(),
                wrap: wrap_keyed::<T>,
            },
        )
    }

    fn from_slot(slot: Option<AnyArc>) -> Result<Self> {
        let any = slot.ok_or_else(DiError::not_found::<Keyed<T>>)?;
        Ok((*downcast::<Keyed<T>>(any)?).clone())
    }
}

/// Scoped accessor: `T` resolved inside a fresh child scope owned by this value.
///
/// The child scope is torn down by [`Owned::dispose`], or when the last handle
/// to it is dropped.
pub struct Owned<T> {
    value: Arc<T>,
    scope: Scope,
}

impl<T> Owned<T> {
    /// The owned value.
    #[inline]
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    /// The child scope the value was resolved in.
    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Tear the child scope down.
    pub fn dispose(&self) -> Result<()> {
        self.scope.dispose()
    }
}

impl<T> Clone for Owned<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            scope: self.scope.clone(),
        }
    }
}

impl<T> Deref for Owned<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

fn wrap_owned<T: Injectable>(value: AnyArc, scope: Scope) -> Result<AnyArc> {
    Ok(Arc::new(Owned::<T> {
        value: downcast::<T>(value)?,
        scope,
    }))
}

impl<T: Injectable> Resolvable for Owned<T> {
    fn request() -> Request {
        Request::wrapped(
            ServiceType::of::<Owned<T>>(),
            Wrapper::Owned {
                inner: Request::of::<T>(),
                wrap: wrap_owned::<T>,
            },
        )
    }

    fn from_slot(slot: Option<AnyArc>) -> Result<Self> {
        let any = slot.ok_or_else(DiError::not_found::<Owned<T>>)?;
        Ok((*downcast::<Owned<T>>(any)?).clone())
    }
}

/// A closed generic service, looked up through its open definition when no
/// registration exists for the closed type itself.
pub struct Generic<T>(pub Arc<T>);

impl<T> Deref for Generic<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: GenericType> Resolvable for Generic<T> {
    #[inline]
    fn request() -> Request {
        Request::for_type(ServiceType::closed::<T>())
    }

    #[inline]
    fn from_slot(slot: Option<AnyArc>) -> Result<Self> {
        Ok(Generic(downcast(slot.ok_or_else(DiError::not_found::<T>)?)?))
    }
}

// =============================================================================
// Overrides
// =============================================================================

/// Instances supplied for a single resolve call.
///
/// Overrides outrank every registration. A call that uses them compiles a
/// private plan instead of touching the shared plan cache.
#[derive(Clone, Default)]
pub struct Overrides {
    entries: Vec<(ServiceType, Option<Arc<str>>, AnyArc)>,
}

impl Overrides {
    /// No overrides.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply `value` for every unqualified request of `T`.
    pub fn with<T: Injectable>(self, value: T) -> Self {
        self.with_arc(Arc::new(value))
    }

    /// Supply a shared `value` for every unqualified request of `T`.
    pub fn with_arc<T: Injectable>(mut self, value: Arc<T>) -> Self {
        self.entries.push((ServiceType::of::<T>(), None, value));
        self
    }

    /// Supply `value` for requests of `T` qualified with `name`.
    pub fn with_named<T: Injectable>(mut self, name: impl Into<Arc<str>>, value: T) -> Self {
        self.entries
            .push((ServiceType::of::<T>(), Some(name.into()), Arc::new(value)));
        self
    }

    /// Whether no override is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the override matching a request; later entries win.
    pub(crate) fn find(&self, service: &ServiceType, name: Option<&str>) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|(ty, n, _)| ty == service && n.as_deref() == name)
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> Option<&AnyArc> {
        self.entries.get(index).map(|(_, _, value)| value)
    }
}

impl fmt::Debug for Overrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(ty, name, _)| (ty, name)))
            .finish()
    }
}
