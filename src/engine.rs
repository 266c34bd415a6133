//! Resolution engine
//!
//! Turns a [`Request`] into a compiled [`Plan`]: overrides and factory
//! parameters first, then the registration picked by the selection rules
//! (specializing open generics on demand), then the wrapper types. Each
//! selected registration has its dependencies compiled recursively behind a
//! circular-dependency barrier, its lifetime strategy applied and its
//! decorators stacked on top. Plans are cached per request shape until the
//! registration store changes.

use crate::config::ContainerConfig;
use crate::key::ServiceType;
use crate::lifetime;
use crate::plan::{Frame, LazyTarget, Plan, Step};
use crate::registration::{
    ConstructorOverride, Kind, Param, Registration, RegistrationId, ResolutionInfo,
};
use crate::request::{Overrides, Request, Wrapper};
use crate::rules::{self, Query};
use crate::scope::ScopeInner;
use crate::storage::RegistrationStore;
use crate::{AnyArc, DiError, Lifetime, Result};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Shape of a request, as far as plan compilation is concerned.
#[derive(Clone, PartialEq, Eq, Hash)]
struct PlanKey {
    service: ServiceType,
    name: Option<Arc<str>>,
    optional: bool,
    markers: Vec<TypeId>,
    scope_names: Arc<[Arc<str>]>,
    parameters: Vec<ServiceType>,
}

impl PlanKey {
    fn new(request: &Request, scope_names: &Arc<[Arc<str>]>, parameters: &[ServiceType]) -> Self {
        Self {
            service: request.service,
            name: request.name.clone(),
            optional: request.optional,
            markers: request.markers.clone(),
            scope_names: Arc::clone(scope_names),
            parameters: parameters.to_vec(),
        }
    }
}

/// A compiled sub-plan and the lifetime it imposes on its consumer.
#[derive(Clone)]
struct Built {
    plan: Plan,
    lifetime: Lifetime,
}

impl Built {
    fn transient(plan: Plan) -> Self {
        Self {
            plan,
            lifetime: Lifetime::Transient,
        }
    }
}

/// A decorator whose own dependencies are being compiled.
struct Decorating {
    service: ServiceType,
    decorator: RegistrationId,
    inner: Built,
}

/// Per-compilation state.
struct BuildContext<'a> {
    scope_names: Arc<[Arc<str>]>,
    /// Factory parameters pending in the current sub-plan.
    parameters: Vec<ServiceType>,
    overrides: &'a Overrides,
    /// Registrations being compiled, outermost first.
    barrier: Vec<RegistrationId>,
    /// Services being compiled, parallel to `barrier`.
    path: Vec<ServiceType>,
    decorating: Vec<Decorating>,
    /// Singletons being compiled; their instances are built in the root scope.
    singletons: Vec<&'static str>,
    /// Compiled registrations whose plan does not depend on where they are injected.
    /// Keyed apart inside singletons, where named-scope dependencies are rejected.
    local: HashMap<(RegistrationId, Vec<ServiceType>, bool), Built, RandomState>,
    /// Set when the sub-plan under construction depended on its injection site.
    sensitive: bool,
}

impl<'a> BuildContext<'a> {
    fn new(scope_names: Arc<[Arc<str>]>, parameters: Vec<ServiceType>, overrides: &'a Overrides) -> Self {
        Self {
            scope_names,
            parameters,
            overrides,
            barrier: Vec::new(),
            path: Vec::new(),
            decorating: Vec::new(),
            singletons: Vec::new(),
            local: HashMap::with_hasher(RandomState::new()),
            sensitive: false,
        }
    }
}

/// A singleton cannot hold an instance living in a named scope: the root
/// scope it is built in has no such scope above it.
fn captive(singleton: &'static str, dependency: &'static str, scope: &str) -> DiError {
    DiError::CreationFailed {
        type_name: singleton,
        reason: format!("depends on {dependency} living in the scope named \"{scope}\""),
    }
}

fn missing(request: &Request) -> DiError {
    DiError::NotFound {
        type_name: request.service.name(),
        type_id: request.service.id(),
        name: request.name().map(str::to_owned),
    }
}

pub(crate) struct Engine {
    config: ContainerConfig,
    store: RegistrationStore,
    plans: DashMap<PlanKey, Option<Plan>, RandomState>,
    /// Closed registrations keyed by (open registration slot, closed type).
    specializations: DashMap<(RegistrationId, TypeId), Option<Arc<Registration>>, RandomState>,
    generation: AtomicU64,
    root: Arc<ScopeInner>,
    disposed: AtomicBool,
}

impl Engine {
    pub(crate) fn new(config: ContainerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            store: RegistrationStore::new(),
            plans: DashMap::with_hasher(RandomState::new()),
            specializations: DashMap::with_hasher(RandomState::new()),
            generation: AtomicU64::new(0),
            root: ScopeInner::root(),
            disposed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub(crate) fn config(&self) -> &ContainerConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn store(&self) -> &RegistrationStore {
        &self.store
    }

    #[inline]
    pub(crate) fn root(&self) -> &Arc<ScopeInner> {
        &self.root
    }

    #[inline]
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Forget every compiled plan; the registration store changed.
    pub(crate) fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let _dropped = self.plans.len();
        self.plans.clear();

        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_resolver",
            plans = _dropped,
            "Plan cache invalidated"
        );
    }

    pub(crate) fn begin_scope(
        &self,
        parent: &Arc<ScopeInner>,
        name: Option<&str>,
    ) -> Result<Arc<ScopeInner>> {
        if self.is_disposed() || parent.is_disposed() {
            return Err(DiError::Disposed);
        }
        let child = ScopeInner::child(parent, name);

        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_resolver",
            scope_id = child.id().id(),
            parent_id = parent.id().id(),
            depth = child.depth(),
            name = ?name,
            "Scope created"
        );

        Ok(child)
    }

    /// Tear the container down: the root scope, and with it every singleton.
    pub(crate) fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_resolver",
            registrations = self.store.len(),
            "Disposing container"
        );

        self.plans.clear();
        self.root.dispose()
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve `request` in `scope`. `Ok(None)` only for optional requests.
    pub(crate) fn resolve(
        self: &Arc<Self>,
        scope: &Arc<ScopeInner>,
        request: &Request,
        overrides: &Overrides,
    ) -> Result<Option<AnyArc>> {
        if self.is_disposed() || scope.is_disposed() {
            return Err(DiError::Disposed);
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "dependency_resolver",
            service = request.service.name(),
            name = ?request.name(),
            scope_id = scope.id().id(),
            overrides = !overrides.is_empty(),
            "Resolving service"
        );

        let plan = if overrides.is_empty() {
            self.plan_for(request, scope.names(), &[])?
        } else {
            self.compile(request, scope.names(), &[], overrides)?
        };

        match plan {
            Some(plan) => plan
                .execute(&Frame::new(Arc::clone(self), Arc::clone(scope)))
                .map(Some),
            None => Ok(None),
        }
    }

    /// Compile and run a deferred `Lazy<T>` target inside the frame it was
    /// created in. Overrides of the originating call compile a private plan.
    pub(crate) fn resolve_deferred(
        &self,
        frame: &Frame,
        request: &Request,
        parameters: &[ServiceType],
        overrides: Option<&Overrides>,
    ) -> Result<AnyArc> {
        let plan = match overrides {
            Some(overrides) => self.compile(request, frame.scope.names(), parameters, overrides)?,
            None => self.plan_for(request, frame.scope.names(), parameters)?,
        }
        .ok_or_else(|| missing(request))?;
        plan.execute(frame)
    }

    fn plan_for(
        &self,
        request: &Request,
        scope_names: &Arc<[Arc<str>]>,
        parameters: &[ServiceType],
    ) -> Result<Option<Plan>> {
        let key = PlanKey::new(request, scope_names, parameters);
        if let Some(plan) = self.plans.get(&key) {
            return Ok(plan.value().clone());
        }

        let generation = self.generation.load(Ordering::Acquire);
        let plan = self.compile(request, scope_names, parameters, &Overrides::new())?;

        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_resolver",
            service = request.service.name(),
            name = ?request.name(),
            resolvable = plan.is_some(),
            "Plan compiled"
        );

        self.plans.insert(key.clone(), plan.clone());
        if self.generation.load(Ordering::Acquire) != generation {
            self.plans.remove(&key);
        }
        Ok(plan)
    }

    fn compile(
        &self,
        request: &Request,
        scope_names: &Arc<[Arc<str>]>,
        parameters: &[ServiceType],
        overrides: &Overrides,
    ) -> Result<Option<Plan>> {
        let mut ctx = BuildContext::new(Arc::clone(scope_names), parameters.to_vec(), overrides);
        Ok(self.build(request, &mut ctx)?.map(|built| built.plan))
    }

    // =========================================================================
    // Compilation
    // =========================================================================

    fn build(&self, request: &Request, ctx: &mut BuildContext<'_>) -> Result<Option<Built>> {
        if let Some(value) = ctx
            .overrides
            .find(&request.service, request.name())
            .and_then(|index| ctx.overrides.get(index))
        {
            return Ok(Some(Built::transient(Plan::constant(Arc::clone(value)))));
        }

        if request.name.is_none() {
            if let Some(index) = ctx.parameters.iter().rposition(|p| *p == request.service) {
                return Ok(Some(Built::transient(Plan::parameter(index))));
            }
        }

        if let Some(inner) = self.decorated_inner(request, ctx)? {
            return Ok(Some(inner));
        }

        if let Some(registration) = self.select(request, ctx) {
            return self.build_registration(&registration, request, ctx).map(Some);
        }

        if let Some(wrapper) = &request.wrapper {
            return self.build_wrapper(wrapper, ctx).map(Some);
        }

        if request.optional {
            Ok(None)
        } else {
            Err(missing(request))
        }
    }

    fn require(&self, request: &Request, ctx: &mut BuildContext<'_>) -> Result<Built> {
        self.build(request, ctx)?.ok_or_else(|| missing(request))
    }

    /// While a decorator's dependencies compile, a request for the decorated
    /// service from the decorator itself gets the plan built so far. Anyone
    /// else asking for it would decorate the service with itself.
    fn decorated_inner(&self, request: &Request, ctx: &BuildContext<'_>) -> Result<Option<Built>> {
        let Some(entry) = ctx
            .decorating
            .iter()
            .rev()
            .find(|d| d.service == request.service)
        else {
            return Ok(None);
        };
        if ctx.barrier.last() == Some(&entry.decorator) {
            Ok(Some(entry.inner.clone()))
        } else {
            Err(DiError::DecoratorCycle {
                type_name: request.service.name(),
            })
        }
    }

    fn query<'q>(&self, request: &'q Request, ctx: &'q BuildContext<'_>, enumerating: bool) -> Query<'q> {
        Query {
            info: ResolutionInfo {
                service: &request.service,
                name: request.name(),
                parent: ctx.path.last(),
                path: &ctx.path,
                markers: &request.markers,
                scope_names: &ctx.scope_names,
            },
            unnamed_resolves_named: self.config.unnamed_resolves_named,
            enumerating,
        }
    }

    fn select(&self, request: &Request, ctx: &mut BuildContext<'_>) -> Option<Arc<Registration>> {
        let candidates = self.lookup(&request.service, false);
        if candidates.is_empty() {
            return None;
        }
        if candidates.iter().any(|r| r.has_conditions()) {
            ctx.sensitive = true;
        }
        let query = self.query(request, ctx, false);
        rules::select(&candidates, &query).cloned()
    }

    /// Registrations (or decorators) for `service`; for a closed generic
    /// without any, the specializations of its open definition's.
    fn lookup(&self, service: &ServiceType, decorators: bool) -> Vec<Arc<Registration>> {
        let exact: Vec<Arc<Registration>> = self
            .store
            .candidates(service)
            .map(|all| {
                all.iter()
                    .filter(|r| r.is_decorator() == decorators)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if !exact.is_empty() {
            return exact;
        }

        let Some(definition) = service.definition() else {
            return exact;
        };
        let Some(open) = self.store.candidates(&definition) else {
            return exact;
        };
        open.iter()
            .filter(|r| r.is_decorator() == decorators)
            .filter_map(|r| self.specialize(r, service))
            .collect()
    }

    fn specialize(&self, open: &Arc<Registration>, closed: &ServiceType) -> Option<Arc<Registration>> {
        let key = (open.slot_id(), closed.id());
        if let Some(memo) = self.specializations.get(&key) {
            return memo.value().clone();
        }

        let specialized = open.specialize(closed).map(Arc::new);

        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_resolver",
            open = open.service().name(),
            closed = closed.name(),
            compatible = specialized.is_some(),
            "Open generic specialized"
        );

        self.specializations
            .entry(key)
            .or_insert(specialized)
            .value()
            .clone()
    }

    fn build_registration(
        &self,
        registration: &Arc<Registration>,
        request: &Request,
        ctx: &mut BuildContext<'_>,
    ) -> Result<Built> {
        let slot = registration.slot_id();
        if ctx.barrier.contains(&slot) {
            let mut path: Vec<&'static str> = ctx.path.iter().map(|s| s.name()).collect();
            path.push(registration.service().name());
            return Err(DiError::circular(registration.service(), path));
        }

        let declared = registration.effective_lifetime();
        if let (Lifetime::NamedScope(scope), Some(singleton)) = (&declared, ctx.singletons.last()) {
            return Err(captive(*singleton, registration.service().name(), scope));
        }

        let local_key = (slot, ctx.parameters.clone(), ctx.singletons.is_empty());
        if !registration.is_decorator() {
            if let Some(built) = ctx.local.get(&local_key) {
                return Ok(built.clone());
            }
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "dependency_resolver",
            service = registration.service().name(),
            registration_id = registration.id().as_u64(),
            depth = ctx.barrier.len(),
            "Compiling registration"
        );

        let outer_sensitive = std::mem::replace(&mut ctx.sensitive, false);

        let root_bound = declared == Lifetime::Singleton;
        if root_bound {
            ctx.singletons.push(registration.service().name());
        }
        ctx.barrier.push(slot);
        ctx.path.push(*registration.service());
        let raw = self.build_raw(registration, ctx);
        ctx.barrier.pop();
        ctx.path.pop();
        if root_bound {
            ctx.singletons.pop();
        }

        let built = raw.and_then(|(plan, dependencies)| {
            let lifetime = match declared {
                Lifetime::Auto(boundary) => lifetime::derive_auto(
                    &boundary,
                    &dependencies,
                    self.config.auto_tie_break,
                    registration.service().name(),
                )?,
                other => other,
            };
            if lifetime == Lifetime::Singleton {
                if let Some(Lifetime::NamedScope(scope)) = dependencies
                    .iter()
                    .find(|d| matches!(d, Lifetime::NamedScope(_)))
                {
                    return Err(captive(registration.service().name(), "an instance", scope));
                }
            }
            let plan = lifetime::apply(&lifetime, plan, registration, &self.config);
            Ok(Built { plan, lifetime })
        });
        let built = match built {
            Ok(built) if !registration.is_decorator() => {
                self.decorate(registration, request, built, ctx)
            }
            other => other,
        };

        let sensitive = ctx.sensitive;
        ctx.sensitive = outer_sensitive || sensitive;

        let built = built?;
        if !registration.is_decorator() && !sensitive {
            ctx.local.insert(local_key, built.clone());
        }
        Ok(built)
    }

    /// The construction plan of a registration, before lifetime and
    /// decorators, plus the lifetimes its dependencies impose.
    fn build_raw(
        &self,
        registration: &Registration,
        ctx: &mut BuildContext<'_>,
    ) -> Result<(Plan, Vec<Lifetime>)> {
        let constructors = match &registration.implementation.kind {
            Kind::Instance(value) => return Ok((Plan::constant(Arc::clone(value)), Vec::new())),
            Kind::OpenGeneric(_) => {
                return Err(DiError::Internal(format!(
                    "open generic registration {} reached compilation unspecialized",
                    registration.id()
                )));
            }
            Kind::Constructors(constructors) => constructors,
        };

        let mut literal = None;
        let order = match &registration.constructor_override {
            Some(selection) => {
                let index = selection.select(constructors).ok_or_else(|| {
                    DiError::ConstructorNotFound {
                        type_name: registration.implementation_type().name(),
                        signature: format!("{selection:?}"),
                    }
                })?;
                if let ConstructorOverride::Arguments(values) = selection {
                    literal = Some(values);
                }
                vec![index]
            }
            None => rules::constructor_order(
                constructors,
                registration
                    .constructor_selection
                    .unwrap_or(self.config.constructor_selection),
                &ctx.parameters,
            ),
        };

        let mut last_error = None;
        for index in order {
            let constructor = &constructors[index];
            let attempt: Result<(Vec<Option<Plan>>, Vec<Lifetime>)> = match literal {
                Some(values) => Ok((
                    values
                        .iter()
                        .map(|value| Some(Plan::constant(Arc::clone(value))))
                        .collect(),
                    Vec::new(),
                )),
                None => self.build_args(registration, constructor.params(), ctx),
            };

            match attempt {
                Ok((args, mut dependencies)) => {
                    let mut initializers = Vec::with_capacity(registration.implementation.initializers.len());
                    for initializer in &registration.implementation.initializers {
                        let (plans, more) = self.build_args(registration, initializer.params(), ctx)?;
                        dependencies.extend(more);
                        initializers.push((initializer.clone(), plans));
                    }
                    let plan = Plan::new(Step::Construct {
                        constructor: constructor.clone(),
                        args,
                        initializers,
                    });
                    return Ok((plan, dependencies));
                }
                Err(err) if err.is_not_found() => last_error = Some(err),
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| DiError::ConstructorNotFound {
            type_name: registration.implementation_type().name(),
            signature: "any".to_owned(),
        }))
    }

    fn build_args(
        &self,
        registration: &Registration,
        params: &[Param],
        ctx: &mut BuildContext<'_>,
    ) -> Result<(Vec<Option<Plan>>, Vec<Lifetime>)> {
        let mut plans = Vec::with_capacity(params.len());
        let mut lifetimes = Vec::with_capacity(params.len());

        for param in params {
            let injected = param.name().and_then(|name| {
                registration
                    .injection
                    .iter()
                    .rev()
                    .find(|(target, _)| *target == name)
            });
            if let Some((_, value)) = injected {
                plans.push(Some(Plan::constant(Arc::clone(value))));
                continue;
            }

            let mut request = param.request().clone();
            if let Some(binding) = registration.bindings.iter().rev().find(|b| b.applies(param)) {
                request.name = Some(Arc::clone(&binding.name));
            }

            match self.build(&request, ctx)? {
                Some(built) => {
                    lifetimes.push(built.lifetime);
                    plans.push(Some(built.plan));
                }
                None => plans.push(None),
            }
        }

        Ok((plans, lifetimes))
    }

    /// Stack the decorators of the service on `base`, last registered outermost.
    fn decorate(
        &self,
        registration: &Registration,
        request: &Request,
        base: Built,
        ctx: &mut BuildContext<'_>,
    ) -> Result<Built> {
        let candidates = self.lookup(registration.service(), true);
        if candidates.is_empty() {
            return Ok(base);
        }
        if candidates.iter().any(|d| d.has_conditions()) {
            ctx.sensitive = true;
        }
        let applicable: Vec<Arc<Registration>> = {
            let query = self.query(request, ctx, false);
            rules::decorators(&candidates, &query)
                .into_iter()
                .cloned()
                .collect()
        };

        let mut current = base;
        for decorator in applicable {
            if ctx.decorating.iter().any(|d| d.decorator == decorator.slot_id()) {
                return Err(DiError::DecoratorCycle {
                    type_name: registration.service().name(),
                });
            }

            #[cfg(feature = "logging")]
            trace!(
                target: "dependency_resolver",
                service = registration.service().name(),
                decorator = decorator.implementation_type().name(),
                registration_id = decorator.id().as_u64(),
                "Applying decorator"
            );

            ctx.decorating.push(Decorating {
                service: *registration.service(),
                decorator: decorator.slot_id(),
                inner: current.clone(),
            });
            let result = self.build_registration(&decorator, request, ctx);
            ctx.decorating.pop();
            current = result?;
        }
        Ok(current)
    }

    // =========================================================================
    // Wrapper resolvers
    // =========================================================================

    fn build_wrapper(&self, wrapper: &Wrapper, ctx: &mut BuildContext<'_>) -> Result<Built> {
        let step = match wrapper {
            Wrapper::Lazy { inner, wrap } => {
                let target = match self.decorated_inner(inner, ctx)? {
                    // a decorator's own Lazy<S> wraps the plan beneath it
                    Some(entry) => LazyTarget::Ready(entry.plan),
                    None if self.config.lazy_circular_dependencies => LazyTarget::Deferred {
                        request: inner.clone(),
                        parameters: ctx.parameters.clone(),
                        overrides: (!ctx.overrides.is_empty()).then(|| ctx.overrides.clone()),
                    },
                    None => LazyTarget::Ready(self.require(inner, ctx)?.plan),
                };
                Step::Lazy {
                    target,
                    wrap: *wrap,
                }
            }

            Wrapper::Factory {
                inner,
                parameters,
                wrap,
            } => {
                let pending = std::mem::replace(&mut ctx.parameters, parameters.clone());
                let built = self.require(inner, ctx);
                ctx.parameters = pending;
                Step::Factory {
                    inner: built?.plan,
                    wrap: *wrap,
                }
            }

            Wrapper::Enumerable { item, wrap } => {
                let candidates = self.lookup(&item.service, false);
                if candidates.iter().any(|r| r.has_conditions()) {
                    ctx.sensitive = true;
                }
                let selected: Vec<Arc<Registration>> = {
                    let query = self.query(item, ctx, true);
                    rules::select_all(&candidates, &query, self.config.enumerable_order)
                        .into_iter()
                        .cloned()
                        .collect()
                };

                let mut items = Vec::with_capacity(selected.len());
                let mut widest = Lifetime::Transient;
                for registration in &selected {
                    let built = self.build_registration(registration, item, ctx)?;
                    if built.lifetime.rank() > widest.rank() {
                        widest = built.lifetime.clone();
                    }
                    items.push(built.plan);
                }
                return Ok(Built {
                    plan: Plan::new(Step::Enumerable { items, wrap: *wrap }),
                    lifetime: widest,
                });
            }

            Wrapper::Keyed { item, wrap } => Step::Keyed {
                item: *item,
                wrap: *wrap,
            },

            Wrapper::Owned { inner, wrap } => Step::Owned {
                inner: self.require(inner, ctx)?.plan,
                wrap: *wrap,
            },
        };
        Ok(Built::transient(Plan::new(step)))
    }
}
