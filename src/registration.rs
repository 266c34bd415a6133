//! Registrations
//!
//! A [`Registration`] is the normalized record of one implementation of a
//! service: how to build it ([`Implementation`], [`Constructor`]), how long the
//! result lives, and which requests it may answer (qualifier, [`Condition`]s).
//! Registrations are immutable once handed to the container.
//!
//! # Example
//!
//! ```rust
//! use dependency_resolver::{Constructor, Container, Implementation, Lifetime, Registration};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserRepository {
//!     db: Arc<Database>,
//! }
//!
//! let container = Container::new();
//! container
//!     .register(Registration::instance(Database { url: "postgres://localhost".into() }))
//!     .unwrap();
//! container
//!     .register(
//!         Registration::of::<UserRepository>(Implementation::constructor(
//!             Constructor::from_fn(|db: Arc<Database>| UserRepository { db }),
//!         ))
//!         .with_lifetime(Lifetime::Scoped),
//!     )
//!     .unwrap();
//!
//! let repo = container.get::<UserRepository>().unwrap();
//! assert_eq!(repo.db.url, "postgres://localhost");
//! ```

use crate::config::ConstructorSelection;
use crate::key::{GenericType, ServiceType};
use crate::request::{Factory, Factory1, Generic, Keyed, Lazy, Owned, Request, Resolvable};
use crate::{AnyArc, DiError, Injectable, Lifetime, Result};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Registration ids
// =============================================================================

static NEXT_REGISTRATION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique, monotonically assigned registration id.
///
/// Later registrations carry larger ids; selection uses this as its final
/// tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationId(u64);

impl RegistrationId {
    #[inline]
    pub(crate) fn next() -> Self {
        Self(NEXT_REGISTRATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Parameters and arguments
// =============================================================================

/// One declared dependency of a constructor or initializer.
#[derive(Clone, Debug)]
pub struct Param {
    pub(crate) request: Request,
    pub(crate) name: Option<&'static str>,
}

impl Param {
    /// Parameter resolving `R`.
    #[inline]
    pub fn of<R: Resolvable>() -> Self {
        Self::new(R::request())
    }

    /// Parameter resolving an arbitrary request.
    #[inline]
    pub fn new(request: Request) -> Self {
        Self {
            request,
            name: None,
        }
    }

    /// Give the parameter a name, so bindings and injection parameters can
    /// address it.
    #[inline]
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    /// The request made for this parameter.
    #[inline]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The parameter name, if one was given.
    #[inline]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }
}

/// Resolved values for a constructor or initializer, in parameter order.
///
/// An unsatisfied optional parameter is an empty slot.
pub struct Args {
    values: Vec<Option<AnyArc>>,
    next: usize,
}

impl Args {
    pub(crate) fn new(values: Vec<Option<AnyArc>>) -> Self {
        Self { values, next: 0 }
    }

    /// Number of arguments.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no arguments.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Typed argument at `index`.
    pub fn get<R: Resolvable>(&self, index: usize) -> Result<R> {
        match self.values.get(index) {
            Some(slot) => R::from_slot(slot.clone()),
            None => Err(DiError::Internal(format!(
                "argument {index} requested but only {} were resolved",
                self.values.len()
            ))),
        }
    }

    /// Next typed argument.
    pub fn take<R: Resolvable>(&mut self) -> Result<R> {
        let value = self.get(self.next);
        self.next += 1;
        value
    }
}

/// A group of dependencies resolved together, used by [`Constructor::from_fn`].
///
/// Implemented for `()`, every single [`Resolvable`] form and tuples of up to
/// eight resolvables.
pub trait Dependencies: Sized + 'static {
    /// Parameters in declaration order.
    fn params() -> Vec<Param>;

    /// Build the group from resolved arguments.
    fn from_args(args: &mut Args) -> Result<Self>;
}

impl Dependencies for () {
    #[inline]
    fn params() -> Vec<Param> {
        Vec::new()
    }

    #[inline]
    fn from_args(_args: &mut Args) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_single_dependency {
    ($(<$($G:ident: $B:path),+> $ty:ty;)+) => {
        $(
            impl<$($G: $B),+> Dependencies for $ty {
                #[inline]
                fn params() -> Vec<Param> {
                    vec![Param::of::<$ty>()]
                }

                #[inline]
                fn from_args(args: &mut Args) -> Result<Self> {
                    args.take::<$ty>()
                }
            }
        )+
    };
}

impl_single_dependency! {
    <T: Injectable> Arc<T>;
    <T: Injectable> Option<Arc<T>>;
    <T: Injectable> Vec<Arc<T>>;
    <T: Injectable> Lazy<T>;
    <T: Injectable> Factory<T>;
    <A: Injectable, T: Injectable> Factory1<A, T>;
    <T: Injectable> Keyed<T>;
    <T: Injectable> Owned<T>;
    <T: GenericType> Generic<T>;
}

macro_rules! impl_dependency_tuple {
    ($($T:ident),+) => {
        impl<$($T: Resolvable),+> Dependencies for ($($T,)+) {
            fn params() -> Vec<Param> {
                vec![$(Param::of::<$T>()),+]
            }

            fn from_args(args: &mut Args) -> Result<Self> {
                Ok(($(args.take::<$T>()?,)+))
            }
        }
    };
}

impl_dependency_tuple!(A);
impl_dependency_tuple!(A, B);
impl_dependency_tuple!(A, B, C);
impl_dependency_tuple!(A, B, C, D);
impl_dependency_tuple!(A, B, C, D, E);
impl_dependency_tuple!(A, B, C, D, E, F);
impl_dependency_tuple!(A, B, C, D, E, F, G);
impl_dependency_tuple!(A, B, C, D, E, F, G, H);

// =============================================================================
// Constructors and initializers
// =============================================================================

type BuildFn = Arc<dyn Fn(&mut Args) -> Result<AnyArc> + Send + Sync>;
type InitFn = Arc<dyn Fn(&AnyArc, &mut Args) -> Result<()> + Send + Sync>;

/// One way of constructing an implementation from its dependencies.
#[derive(Clone)]
pub struct Constructor {
    params: Vec<Param>,
    build: BuildFn,
    produces: ServiceType,
}

impl Constructor {
    /// Constructor with explicitly declared parameters.
    pub fn new<T: Injectable>(
        params: Vec<Param>,
        build: impl Fn(&mut Args) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            params,
            build: Arc::new(move |args: &mut Args| {
                build(args).map(|value| Arc::new(value) as AnyArc)
            }),
            produces: ServiceType::of::<T>(),
        }
    }

    /// Constructor whose parameters are described by the closure's argument type.
    pub fn from_fn<D, T>(f: impl Fn(D) -> T + Send + Sync + 'static) -> Self
    where
        D: Dependencies,
        T: Injectable,
    {
        Self::new(D::params(), move |args| Ok(f(D::from_args(args)?)))
    }

    /// Fallible variant of [`Constructor::from_fn`].
    pub fn try_from_fn<D, T>(f: impl Fn(D) -> Result<T> + Send + Sync + 'static) -> Self
    where
        D: Dependencies,
        T: Injectable,
    {
        Self::new(D::params(), move |args| f(D::from_args(args)?))
    }

    /// Constructor of a [`Service`].
    #[inline]
    pub fn of<S: Service>() -> Self {
        Self::from_fn(S::create)
    }

    /// Name the parameter at `index`.
    pub fn with_param_name(mut self, index: usize, name: &'static str) -> Self {
        if let Some(param) = self.params.get_mut(index) {
            param.name = Some(name);
        }
        self
    }

    /// Declared parameters.
    #[inline]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// The type this constructor produces.
    #[inline]
    pub fn produces(&self) -> &ServiceType {
        &self.produces
    }

    /// Parameter types, used to match signature overrides.
    pub(crate) fn signature(&self) -> Vec<ServiceType> {
        self.params.iter().map(|p| p.request.service).collect()
    }

    #[inline]
    pub(crate) fn invoke(&self, mut args: Args) -> Result<AnyArc> {
        (self.build)(&mut args)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("produces", &self.produces)
            .field("params", &self.signature())
            .finish()
    }
}

/// A service that declares its dependencies at compile time.
///
/// ```rust
/// use dependency_resolver::{Container, Service};
/// use std::sync::Arc;
///
/// struct Config {
///     debug: bool,
/// }
///
/// struct Logger {
///     config: Arc<Config>,
/// }
///
/// impl Service for Logger {
///     type Dependencies = Arc<Config>;
///
///     fn create(config: Arc<Config>) -> Self {
///         Logger { config }
///     }
/// }
///
/// let container = Container::new();
/// container.singleton(Config { debug: true }).unwrap();
/// container.provide::<Logger>().unwrap();
/// assert!(container.get::<Logger>().unwrap().config.debug);
/// ```
pub trait Service: Injectable + Sized {
    /// The dependencies required to create this service.
    type Dependencies: Dependencies;

    /// Create a new instance given the resolved dependencies.
    fn create(deps: Self::Dependencies) -> Self;
}

/// Post-construction step: member injection or a bound method call.
///
/// Initializers receive the freshly built instance and their own resolved
/// dependencies; they run in registration order before the instance is cached
/// or decorated.
#[derive(Clone)]
pub struct Initializer {
    params: Vec<Param>,
    run: InitFn,
}

impl Initializer {
    /// Initializer with explicitly declared parameters.
    pub fn new<T: Injectable>(
        params: Vec<Param>,
        run: impl Fn(&T, &mut Args) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            params,
            run: Arc::new(move |instance: &AnyArc, args: &mut Args| {
                let target = (**instance)
                    .downcast_ref::<T>()
                    .ok_or_else(DiError::type_mismatch::<T>)?;
                run(target, args)
            }),
        }
    }

    /// Initializer whose dependencies are described by the closure's second argument.
    pub fn from_fn<T, D>(f: impl Fn(&T, D) + Send + Sync + 'static) -> Self
    where
        T: Injectable,
        D: Dependencies,
    {
        Self::new(D::params(), move |target: &T, args| {
            f(target, D::from_args(args)?);
            Ok(())
        })
    }

    #[inline]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    #[inline]
    pub(crate) fn run(&self, instance: &AnyArc, mut args: Args) -> Result<()> {
        (self.run)(instance, &mut args)
    }
}

// =============================================================================
// Implementations
// =============================================================================

/// Produces the implementation of a closed generic type from an open
/// definition, or `None` when the closed type is not supported.
pub type Specializer = Arc<dyn Fn(&ServiceType) -> Option<Implementation> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Kind {
    Instance(AnyArc),
    Constructors(Vec<Constructor>),
    OpenGeneric(Specializer),
}

/// How instances of a registration are produced.
#[derive(Clone)]
pub struct Implementation {
    ty: ServiceType,
    pub(crate) kind: Kind,
    pub(crate) initializers: Vec<Initializer>,
}

impl Implementation {
    /// A ready-made instance.
    pub fn instance<T: Injectable>(value: T) -> Self {
        Self::shared(Arc::new(value))
    }

    /// A ready-made shared instance.
    pub fn shared<T: Injectable>(value: Arc<T>) -> Self {
        Self {
            ty: ServiceType::of::<T>(),
            kind: Kind::Instance(value),
            initializers: Vec::new(),
        }
    }

    /// Built by a single constructor.
    pub fn constructor(constructor: Constructor) -> Self {
        Self {
            ty: constructor.produces,
            kind: Kind::Constructors(vec![constructor]),
            initializers: Vec::new(),
        }
    }

    /// Add an alternative constructor; the container's constructor selection
    /// rule picks among them.
    pub fn or_constructor(mut self, constructor: Constructor) -> Self {
        match &mut self.kind {
            Kind::Constructors(all) => all.push(constructor),
            _ => {
                self.ty = constructor.produces;
                self.kind = Kind::Constructors(vec![constructor]);
            }
        }
        self
    }

    /// Open generic implementation stored under the definition marker `D`.
    pub fn open_generic<D: 'static>(
        specializer: impl Fn(&ServiceType) -> Option<Implementation> + Send + Sync + 'static,
    ) -> Self {
        Self {
            ty: ServiceType::of::<D>(),
            kind: Kind::OpenGeneric(Arc::new(specializer)),
            initializers: Vec::new(),
        }
    }

    /// Record the concrete implementation type, when the constructor returns
    /// an abstraction such as `Arc<dyn Trait>`.
    pub fn implemented_by<I: ?Sized + 'static>(mut self) -> Self {
        self.ty = ServiceType::of::<I>();
        self
    }

    /// Run `initializer` after construction.
    pub fn with_initializer(mut self, initializer: Initializer) -> Self {
        self.initializers.push(initializer);
        self
    }

    /// The implementation type.
    #[inline]
    pub fn ty(&self) -> &ServiceType {
        &self.ty
    }

    /// Available constructors (empty for instances and open generics).
    pub fn constructors(&self) -> &[Constructor] {
        match &self.kind {
            Kind::Constructors(all) => all,
            _ => &[],
        }
    }
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            Kind::Instance(_) => "instance",
            Kind::Constructors(_) => "constructors",
            Kind::OpenGeneric(_) => "open_generic",
        };
        f.debug_struct("Implementation")
            .field("ty", &self.ty)
            .field("kind", &kind)
            .finish()
    }
}

// =============================================================================
// Conditions, bindings, overrides
// =============================================================================

/// What a condition can inspect about the request being resolved.
#[derive(Debug)]
pub struct ResolutionInfo<'a> {
    /// The requested service.
    pub service: &'a ServiceType,
    /// The requested qualifier.
    pub name: Option<&'a str>,
    /// The service whose dependency is being resolved, if any.
    pub parent: Option<&'a ServiceType>,
    /// Services currently being resolved, outermost first.
    pub path: &'a [ServiceType],
    /// Marker types attached to the injection site.
    pub markers: &'a [TypeId],
    /// Names of the enclosing scopes, innermost first.
    pub scope_names: &'a [Arc<str>],
}

type PredicateFn = Arc<dyn Fn(&ResolutionInfo<'_>) -> bool + Send + Sync>;

/// Restricts when a registration is selectable.
///
/// A registration with conditions is selectable when at least one of them
/// holds.
#[derive(Clone)]
pub enum Condition {
    /// The direct consumer is the given service.
    InjectedInto(ServiceType),
    /// The injection site carries the given marker type.
    Marked(TypeId),
    /// The given service appears anywhere in the resolution path.
    InPath(ServiceType),
    /// Arbitrary predicate.
    Predicate(PredicateFn),
}

impl Condition {
    /// Only when injected directly into `T`.
    pub fn injected_into<T: ?Sized + 'static>() -> Self {
        Self::InjectedInto(ServiceType::of::<T>())
    }

    /// Only when the injection site is marked with `M`.
    pub fn marked<M: 'static>() -> Self {
        Self::Marked(TypeId::of::<M>())
    }

    /// Only while resolving something for `T`.
    pub fn in_path<T: ?Sized + 'static>() -> Self {
        Self::InPath(ServiceType::of::<T>())
    }

    /// Only when `predicate` holds.
    pub fn predicate(predicate: impl Fn(&ResolutionInfo<'_>) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(predicate))
    }

    pub(crate) fn holds(&self, info: &ResolutionInfo<'_>) -> bool {
        match self {
            Condition::InjectedInto(ty) => info.parent == Some(ty),
            Condition::Marked(marker) => info.markers.contains(marker),
            Condition::InPath(ty) => info.path.contains(ty),
            Condition::Predicate(predicate) => predicate(info),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::InjectedInto(ty) => write!(f, "InjectedInto({ty})"),
            Condition::Marked(_) => f.write_str("Marked"),
            Condition::InPath(ty) => write!(f, "InPath({ty})"),
            Condition::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

/// Which parameters a [`DependencyBinding`] applies to.
#[derive(Debug, Clone)]
pub enum BindingTarget {
    /// The parameter with this name.
    Parameter(&'static str),
    /// Every parameter requesting this type.
    Type(ServiceType),
}

/// Resolve certain parameters with a qualifier.
#[derive(Debug, Clone)]
pub struct DependencyBinding {
    pub(crate) target: BindingTarget,
    pub(crate) name: Arc<str>,
}

impl DependencyBinding {
    pub(crate) fn applies(&self, param: &Param) -> bool {
        match &self.target {
            BindingTarget::Parameter(name) => param.name == Some(*name),
            BindingTarget::Type(ty) => param.request.service == *ty,
        }
    }
}

type RuleFn = Arc<dyn Fn(&[Constructor]) -> Option<usize> + Send + Sync>;

/// Per-registration constructor choice, taking precedence over the
/// container-wide selection rule.
#[derive(Clone)]
pub enum ConstructorOverride {
    /// The constructor with exactly these parameter types.
    ParameterTypes(Vec<ServiceType>),
    /// The constructor whose parameter types match these values, which are
    /// passed as its arguments.
    Arguments(Vec<AnyArc>),
    /// Custom choice by index.
    Rule(RuleFn),
}

impl ConstructorOverride {
    /// Select by custom rule.
    pub fn rule(rule: impl Fn(&[Constructor]) -> Option<usize> + Send + Sync + 'static) -> Self {
        Self::Rule(Arc::new(rule))
    }

    /// Index of the selected constructor.
    pub(crate) fn select(&self, constructors: &[Constructor]) -> Option<usize> {
        match self {
            ConstructorOverride::ParameterTypes(types) => constructors
                .iter()
                .position(|c| &c.signature() == types),
            ConstructorOverride::Arguments(values) => constructors.iter().position(|c| {
                c.params.len() == values.len()
                    && c.params
                        .iter()
                        .zip(values)
                        .all(|(p, v)| p.request.service.id() == Any::type_id(&**v))
            }),
            ConstructorOverride::Rule(rule) => {
                rule(constructors).filter(|index| *index < constructors.len())
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            ConstructorOverride::ParameterTypes(types) => format!(
                "({})",
                types.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
            ),
            ConstructorOverride::Arguments(values) => format!("{} literal argument(s)", values.len()),
            ConstructorOverride::Rule(_) => "custom rule".to_owned(),
        }
    }
}

impl fmt::Debug for ConstructorOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

// =============================================================================
// Disposal
// =============================================================================

/// Resources released when the owning scope is torn down.
pub trait Dispose: Send + Sync {
    /// Release the resource. Errors are collected, never abort the teardown.
    fn dispose(&self) -> std::result::Result<(), String>;
}

pub(crate) type Disposer = Arc<dyn Fn(&AnyArc) -> std::result::Result<(), String> + Send + Sync>;

fn dispose_as<T: Injectable + Dispose>(instance: &AnyArc) -> std::result::Result<(), String> {
    match (**instance).downcast_ref::<T>() {
        Some(value) => value.dispose(),
        None => Err(format!("instance is not a {}", std::any::type_name::<T>())),
    }
}

// =============================================================================
// Registration
// =============================================================================

/// Identity used by the duplicate policy to decide replace-or-append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Discriminator {
    Qualifier(Arc<str>),
    Implementation(ServiceType),
}

/// Declarative record of one implementation for a service.
#[derive(Clone)]
pub struct Registration {
    id: RegistrationId,
    origin: RegistrationId,
    service: ServiceType,
    pub(crate) implementation: Implementation,
    lifetime: Option<Lifetime>,
    name: Option<Arc<str>>,
    decorator: bool,
    pub(crate) conditions: Vec<Condition>,
    pub(crate) bindings: Vec<DependencyBinding>,
    pub(crate) injection: Vec<(&'static str, AnyArc)>,
    pub(crate) constructor_override: Option<ConstructorOverride>,
    pub(crate) constructor_selection: Option<ConstructorSelection>,
    pub(crate) disposer: Option<Disposer>,
    track_disposal: bool,
    replace: Option<ReplaceDirective>,
    specialized_from: Option<RegistrationId>,
}

/// Explicit replace request carried by a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplaceDirective {
    /// Replace a match, append otherwise.
    Always,
    /// Replace a match, drop the registration otherwise.
    OnlyIfExists,
}

impl Registration {
    /// Registration of `implementation` for the service `S`.
    pub fn of<S: ?Sized + 'static>(implementation: Implementation) -> Self {
        Self::for_service(ServiceType::of::<S>(), implementation)
    }

    /// Registration for an already-built service identity.
    pub fn for_service(service: ServiceType, implementation: Implementation) -> Self {
        let id = RegistrationId::next();
        Self {
            id,
            origin: id,
            service,
            implementation,
            lifetime: None,
            name: None,
            decorator: false,
            conditions: Vec::new(),
            bindings: Vec::new(),
            injection: Vec::new(),
            constructor_override: None,
            constructor_selection: None,
            disposer: None,
            track_disposal: true,
            replace: None,
            specialized_from: None,
        }
    }

    /// Registration of a ready-made instance for its own type.
    pub fn instance<T: Injectable>(value: T) -> Self {
        Self::of::<T>(Implementation::instance(value)).with_lifetime(Lifetime::Singleton)
    }

    /// Decorator for the service `S`.
    ///
    /// A parameter of the constructor requesting `S` receives the plan built
    /// so far for `S`.
    pub fn decorator<S: ?Sized + 'static>(implementation: Implementation) -> Self {
        Self {
            decorator: true,
            ..Self::of::<S>(implementation)
        }
    }

    /// Set the lifetime.
    pub fn with_lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Set the qualifier.
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a selection condition.
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Resolve the parameter called `parameter` with the qualifier `name`.
    pub fn bind_parameter(mut self, parameter: &'static str, name: impl Into<Arc<str>>) -> Self {
        self.bindings.push(DependencyBinding {
            target: BindingTarget::Parameter(parameter),
            name: name.into(),
        });
        self
    }

    /// Resolve every parameter requesting `T` with the qualifier `name`.
    pub fn bind_type<T: ?Sized + 'static>(mut self, name: impl Into<Arc<str>>) -> Self {
        self.bindings.push(DependencyBinding {
            target: BindingTarget::Type(ServiceType::of::<T>()),
            name: name.into(),
        });
        self
    }

    /// Inject `value` into the parameter called `parameter`.
    pub fn with_parameter<T: Injectable>(mut self, parameter: &'static str, value: T) -> Self {
        self.injection.push((parameter, Arc::new(value)));
        self
    }

    /// Override the constructor selection.
    pub fn select_constructor(mut self, selection: ConstructorOverride) -> Self {
        self.constructor_override = Some(selection);
        self
    }

    /// Choose among several satisfiable constructors with `selection` instead
    /// of the container-wide rule.
    pub fn with_constructor_selection(mut self, selection: ConstructorSelection) -> Self {
        self.constructor_selection = Some(selection);
        self
    }

    /// Dispose instances through their [`Dispose`] implementation.
    pub fn disposable<T: Injectable + Dispose>(mut self) -> Self {
        self.disposer = Some(Arc::new(dispose_as::<T>));
        self
    }

    /// Dispose instances with a custom function.
    pub fn with_disposer<T: Injectable>(
        mut self,
        disposer: impl Fn(&T) -> std::result::Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.disposer = Some(Arc::new(move |instance: &AnyArc| {
            match (**instance).downcast_ref::<T>() {
                Some(value) => disposer(value),
                None => Err(format!("instance is not a {}", std::any::type_name::<T>())),
            }
        }));
        self
    }

    /// Instances are owned elsewhere; never dispose them.
    pub fn without_disposal_tracking(mut self) -> Self {
        self.track_disposal = false;
        self
    }

    /// Replace the registration with the same qualifier or implementation
    /// type, whatever the container's duplicate policy.
    pub fn replace_existing(mut self) -> Self {
        self.replace = Some(ReplaceDirective::Always);
        self
    }

    /// Replace the registration with the same qualifier or implementation
    /// type; drop this registration when there is none.
    pub fn replace_only_if_exists(mut self) -> Self {
        self.replace = Some(ReplaceDirective::OnlyIfExists);
        self
    }

    /// The registration id.
    #[inline]
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// The service this registration answers.
    #[inline]
    pub fn service(&self) -> &ServiceType {
        &self.service
    }

    /// The implementation type.
    #[inline]
    pub fn implementation_type(&self) -> &ServiceType {
        self.implementation.ty()
    }

    /// The explicitly requested lifetime, if any.
    #[inline]
    pub fn lifetime(&self) -> Option<&Lifetime> {
        self.lifetime.as_ref()
    }

    /// The qualifier.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub(crate) fn name_arc(&self) -> Option<&Arc<str>> {
        self.name.as_ref()
    }

    #[inline]
    pub fn is_decorator(&self) -> bool {
        self.decorator
    }

    #[inline]
    pub fn is_open_generic(&self) -> bool {
        matches!(self.implementation.kind, Kind::OpenGeneric(_))
    }

    #[inline]
    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    #[inline]
    pub fn tracks_disposal(&self) -> bool {
        self.track_disposal && self.disposer.is_some()
    }

    #[inline]
    pub(crate) fn replace_directive(&self) -> Option<ReplaceDirective> {
        self.replace
    }

    /// Identity of the instances this registration caches. Unlike the id it
    /// is never taken over, so a replacement never sees its predecessor's
    /// cached instances.
    #[inline]
    pub(crate) fn slot_id(&self) -> RegistrationId {
        self.origin
    }

    /// Take over the id, and so the ordering position, of a replaced registration.
    pub(crate) fn taking_over(mut self, replaced: RegistrationId) -> Self {
        self.id = replaced;
        self
    }

    /// The open generic registration this one was specialized from.
    #[inline]
    pub fn specialized_from(&self) -> Option<RegistrationId> {
        self.specialized_from
    }

    pub(crate) fn with_default_lifetime(mut self, lifetime: &Lifetime) -> Self {
        if self.lifetime.is_none() {
            self.lifetime = Some(lifetime.clone());
        }
        self
    }

    /// Lifetime, treating an unset one as transient.
    pub(crate) fn effective_lifetime(&self) -> Lifetime {
        self.lifetime.clone().unwrap_or_default()
    }

    pub(crate) fn discriminator(&self) -> Discriminator {
        match &self.name {
            Some(name) => Discriminator::Qualifier(Arc::clone(name)),
            None => Discriminator::Implementation(*self.implementation.ty()),
        }
    }

    /// Check the registration is consistent before it reaches the store.
    pub(crate) fn validate(&self) -> Result<()> {
        match &self.implementation.kind {
            Kind::Instance(value) => {
                if self.service.id() != Any::type_id(&**value) {
                    return Err(DiError::CreationFailed {
                        type_name: self.service.name(),
                        reason: format!("instance of {} registered", self.implementation.ty()),
                    });
                }
            }
            Kind::Constructors(constructors) => {
                if constructors.is_empty() {
                    return Err(DiError::ConstructorNotFound {
                        type_name: self.implementation.ty().name(),
                        signature: "any".to_owned(),
                    });
                }
                if let Some(wrong) = constructors.iter().find(|c| c.produces != self.service) {
                    return Err(DiError::CreationFailed {
                        type_name: self.service.name(),
                        reason: format!("constructor produces {}", wrong.produces),
                    });
                }
                if let Some(selection) = &self.constructor_override {
                    if selection.select(constructors).is_none() {
                        return Err(DiError::ConstructorNotFound {
                            type_name: self.implementation.ty().name(),
                            signature: selection.describe(),
                        });
                    }
                }
            }
            Kind::OpenGeneric(_) => {}
        }
        Ok(())
    }

    /// Close an open generic registration over `closed`.
    ///
    /// The result keeps the open registration's id, so it orders like it, and
    /// gets cache slots of its own.
    pub(crate) fn specialize(&self, closed: &ServiceType) -> Option<Registration> {
        let Kind::OpenGeneric(specializer) = &self.implementation.kind else {
            return None;
        };
        let implementation = specializer(closed)?;
        let specialized = Registration {
            origin: RegistrationId::next(),
            service: *closed,
            implementation,
            specialized_from: Some(self.id),
            ..self.clone()
        };
        specialized.validate().ok().map(|()| specialized)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("implementation", &self.implementation)
            .field("lifetime", &self.lifetime)
            .field("name", &self.name)
            .field("decorator", &self.decorator)
            .field("conditions", &self.conditions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Database {
        url: String,
    }

    struct Cache;

    struct Repository {
        db: Arc<Database>,
        cache: Option<Arc<Cache>>,
    }

    fn repository_ctor() -> Constructor {
        Constructor::from_fn(|(db, cache): (Arc<Database>, Option<Arc<Cache>>)| Repository {
            db,
            cache,
        })
    }

    #[test]
    fn test_ids_are_monotonic() {
        let a = Registration::instance(1u8);
        let b = Registration::instance(2u8);
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_from_fn_declares_params() {
        let ctor = repository_ctor();
        assert_eq!(
            ctor.signature(),
            vec![ServiceType::of::<Database>(), ServiceType::of::<Cache>()]
        );
        assert!(!ctor.params()[0].request().is_optional());
        assert!(ctor.params()[1].request().is_optional());
        assert_eq!(ctor.produces(), &ServiceType::of::<Repository>());
    }

    #[test]
    fn test_invoke_with_args() {
        let ctor = repository_ctor();
        let db: AnyArc = Arc::new(Database { url: "mem".into() });
        let built = ctor.invoke(Args::new(vec![Some(db), None])).unwrap();
        let repo = built.downcast::<Repository>().ok().unwrap();
        assert_eq!(repo.db.url, "mem");
        assert!(repo.cache.is_none());
    }

    #[test]
    fn test_validate_rejects_unknown_constructor_signature() {
        let registration = Registration::of::<Repository>(Implementation::constructor(
            repository_ctor(),
        ))
        .select_constructor(ConstructorOverride::ParameterTypes(vec![ServiceType::of::<
            Cache,
        >()]));

        assert!(matches!(
            registration.validate(),
            Err(DiError::ConstructorNotFound { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_wrong_product() {
        let registration = Registration::of::<Cache>(Implementation::constructor(
            repository_ctor(),
        ));
        assert!(matches!(
            registration.validate(),
            Err(DiError::CreationFailed { .. })
        ));
    }

    #[test]
    fn test_arguments_override_matches_by_value_types() {
        let ctors = vec![
            Constructor::from_fn(|_: ()| 0u64),
            Constructor::from_fn(|n: Arc<u32>| *n as u64),
        ];
        let by_value = ConstructorOverride::Arguments(vec![Arc::new(5u32) as AnyArc]);
        assert_eq!(by_value.select(&ctors), Some(1));

        let by_rule = ConstructorOverride::rule(|all| Some(all.len()));
        assert_eq!(by_rule.select(&ctors), None);
    }

    #[test]
    fn test_discriminator() {
        let named = Registration::instance(1u8).named("one");
        assert_eq!(
            named.discriminator(),
            Discriminator::Qualifier(Arc::from("one"))
        );

        let unnamed = Registration::instance(1u8);
        assert_eq!(
            unnamed.discriminator(),
            Discriminator::Implementation(ServiceType::of::<u8>())
        );
    }

    #[test]
    fn test_conditions() {
        let service = ServiceType::of::<Database>();
        let parent = ServiceType::of::<Repository>();
        let path = [parent];
        let info = ResolutionInfo {
            service: &service,
            name: None,
            parent: Some(&parent),
            path: &path,
            markers: &[],
            scope_names: &[],
        };

        assert!(Condition::injected_into::<Repository>().holds(&info));
        assert!(!Condition::injected_into::<Cache>().holds(&info));
        assert!(Condition::in_path::<Repository>().holds(&info));
        assert!(!Condition::marked::<Cache>().holds(&info));
        assert!(Condition::predicate(|i| i.name.is_none()).holds(&info));
    }

    #[test]
    fn test_disposable_registration() {
        use std::sync::atomic::AtomicBool;

        struct Socket(AtomicBool);
        impl Dispose for Socket {
            fn dispose(&self) -> std::result::Result<(), String> {
                self.0.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        let registration = Registration::instance(Socket(AtomicBool::new(false))).disposable::<Socket>();
        assert!(registration.tracks_disposal());
        let instance: AnyArc = Arc::new(Socket(AtomicBool::new(false)));
        (registration.disposer.as_ref().unwrap())(&instance).unwrap();
        assert!(instance.downcast_ref::<Socket>().unwrap().0.load(Ordering::SeqCst));

        assert!(!registration.without_disposal_tracking().tracks_disposal());
    }
}
