//! Construction plans
//!
//! A [`Plan`] is the compiled recipe for one request: a tree of steps
//! (construct, run initializers, wrap with a cache, build a wrapper value)
//! produced once by the engine and interpreted on every resolve.

use crate::engine::Engine;
use crate::key::ServiceType;
use crate::lifetime::CacheStrategy;
use crate::registration::{Args, Constructor, Disposer, Initializer};
use crate::request::{FactoryFn, KeyedFn, Overrides, Request, Thunk};
use crate::scope::{Scope, ScopeId, ScopeInner, SlotKey};
use crate::{AnyArc, DiError, Result};
use ahash::RandomState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::trace;

/// Compiled construction plan. Cloning shares the step tree.
#[derive(Clone)]
pub(crate) struct Plan(Arc<Step>);

/// The target of a `Lazy<T>`.
pub(crate) enum LazyTarget {
    /// Plan compiled together with the enclosing one.
    Ready(Plan),
    /// Plan compiled on first evaluation, with the factory parameters that
    /// were pending where the wrapper was requested.
    Deferred {
        request: Request,
        parameters: Vec<ServiceType>,
        overrides: Option<Overrides>,
    },
}

pub(crate) enum Step {
    Constant(AnyArc),
    /// Call-time factory parameter.
    Parameter(usize),
    Construct {
        constructor: Constructor,
        args: Vec<Option<Plan>>,
        initializers: Vec<(Initializer, Vec<Option<Plan>>)>,
    },
    Cached {
        strategy: CacheStrategy,
        slot: SlotKey,
        inner: Plan,
        disposer: Option<Disposer>,
        service: &'static str,
    },
    /// Transient instance owned by the resolving scope.
    Tracked {
        inner: Plan,
        disposer: Disposer,
        service: &'static str,
    },
    Lazy {
        target: LazyTarget,
        wrap: fn(Thunk) -> AnyArc,
    },
    Factory {
        inner: Plan,
        wrap: fn(FactoryFn) -> AnyArc,
    },
    Enumerable {
        items: Vec<Plan>,
        wrap: fn(Vec<AnyArc>) -> Result<AnyArc>,
    },
    Keyed {
        item: ServiceType,
        wrap: fn(KeyedFn) -> AnyArc,
    },
    Owned {
        inner: Plan,
        wrap: fn(AnyArc, Scope) -> Result<AnyArc>,
    },
}

impl Plan {
    #[inline]
    pub(crate) fn new(step: Step) -> Self {
        Self(Arc::new(step))
    }

    #[inline]
    pub(crate) fn constant(value: AnyArc) -> Self {
        Self::new(Step::Constant(value))
    }

    #[inline]
    pub(crate) fn parameter(index: usize) -> Self {
        Self::new(Step::Parameter(index))
    }

    #[inline]
    pub(crate) fn step(&self) -> &Step {
        &self.0
    }

    /// Produce an instance.
    pub(crate) fn execute(&self, frame: &Frame) -> Result<AnyArc> {
        match self.step() {
            Step::Constant(value) => Ok(Arc::clone(value)),

            Step::Parameter(index) => frame.parameters.get(*index).cloned().ok_or_else(|| {
                DiError::Internal(format!(
                    "factory parameter {index} missing, {} supplied",
                    frame.parameters.len()
                ))
            }),

            Step::Construct {
                constructor,
                args,
                initializers,
            } => {
                #[cfg(feature = "logging")]
                trace!(
                    target: "dependency_resolver",
                    service = constructor.produces().name(),
                    scope_id = frame.scope.id().id(),
                    "Constructing instance"
                );

                let instance = constructor.invoke(Args::new(arguments(args, frame)?))?;
                for (initializer, params) in initializers {
                    initializer.run(&instance, Args::new(arguments(params, frame)?))?;
                }
                Ok(instance)
            }

            Step::Cached {
                strategy,
                slot,
                inner,
                disposer,
                service,
            } => strategy.execute(*slot, inner, disposer.as_ref(), *service, frame),

            Step::Tracked {
                inner,
                disposer,
                service,
            } => {
                let value = inner.execute(frame)?;
                frame
                    .scope
                    .track(Arc::clone(&value), Arc::clone(disposer), *service);
                Ok(value)
            }

            Step::Lazy { target, wrap } => {
                let engine = Arc::downgrade(&frame.engine);
                let scope = Arc::downgrade(&frame.scope);
                let parameters = Arc::clone(&frame.parameters);
                let request = frame.request.clone();

                let thunk: Thunk = match target {
                    LazyTarget::Ready(plan) => {
                        let plan = plan.clone();
                        Arc::new(move || {
                            let frame = revive(&engine, &scope, Arc::clone(&parameters), request.clone())?;
                            plan.execute(&frame)
                        })
                    }
                    LazyTarget::Deferred {
                        request: inner,
                        parameters: types,
                        overrides,
                    } => {
                        let inner = inner.clone();
                        let types = types.clone();
                        let overrides = overrides.clone();
                        Arc::new(move || {
                            let frame = revive(&engine, &scope, Arc::clone(&parameters), request.clone())?;
                            let engine = Arc::clone(&frame.engine);
                            engine.resolve_deferred(&frame, &inner, &types, overrides.as_ref())
                        })
                    }
                };
                Ok(wrap(thunk))
            }

            Step::Factory { inner, wrap } => {
                let engine = Arc::downgrade(&frame.engine);
                let scope = Arc::downgrade(&frame.scope);
                let plan = inner.clone();
                let invoke: FactoryFn = Arc::new(move |values: Vec<AnyArc>| {
                    let frame = revive(&engine, &scope, Arc::from(values), RequestCache::default())?;
                    plan.execute(&frame)
                });
                Ok(wrap(invoke))
            }

            Step::Enumerable { items, wrap } => {
                let values = items
                    .iter()
                    .map(|item| item.execute(frame))
                    .collect::<Result<Vec<_>>>()?;
                wrap(values)
            }

            Step::Keyed { item, wrap } => {
                let engine = Arc::downgrade(&frame.engine);
                let scope = Arc::downgrade(&frame.scope);
                let item = *item;
                let resolve: KeyedFn = Arc::new(move |name: &str| {
                    let frame = revive(&engine, &scope, Arc::from(Vec::new()), RequestCache::default())?;
                    let request = Request::for_type(item).named(name);
                    frame
                        .engine
                        .resolve(&frame.scope, &request, &Overrides::new())?
                        .ok_or_else(|| DiError::NotFound {
                            type_name: item.name(),
                            type_id: item.id(),
                            name: Some(name.to_owned()),
                        })
                });
                Ok(wrap(resolve))
            }

            Step::Owned { inner, wrap } => {
                let child = frame.engine.begin_scope(&frame.scope, None)?;
                let value = inner.execute(&frame.with_scope(Arc::clone(&child)))?;
                wrap(value, Scope::new(Arc::clone(&frame.engine), child))
            }
        }
    }
}

fn arguments(args: &[Option<Plan>], frame: &Frame) -> Result<Vec<Option<AnyArc>>> {
    args.iter()
        .map(|arg| arg.as_ref().map(|plan| plan.execute(frame)).transpose())
        .collect()
}

/// Rebuild an execution frame from the weak references a wrapper value holds.
fn revive(
    engine: &Weak<Engine>,
    scope: &Weak<ScopeInner>,
    parameters: Arc<[AnyArc]>,
    request: RequestCache,
) -> Result<Frame> {
    let engine = engine.upgrade().ok_or(DiError::Disposed)?;
    let scope = scope.upgrade().ok_or(DiError::Disposed)?;
    if engine.is_disposed() || scope.is_disposed() {
        return Err(DiError::Disposed);
    }
    Ok(Frame {
        engine,
        scope,
        parameters,
        request,
    })
}

// =============================================================================
// Execution frame
// =============================================================================

type RequestKey = (SlotKey, Option<ScopeId>);

/// Instances shared for the duration of one top-level resolve.
#[derive(Clone, Default)]
pub(crate) struct RequestCache(Arc<Mutex<HashMap<RequestKey, AnyArc, RandomState>>>);

impl RequestCache {
    pub(crate) fn get(&self, key: &RequestKey) -> Option<AnyArc> {
        self.0.lock().get(key).cloned()
    }

    /// Store `value` unless another one got there first. Returns the stored
    /// instance and whether it is `value`.
    pub(crate) fn insert(&self, key: RequestKey, value: AnyArc) -> (AnyArc, bool) {
        let mut entries = self.0.lock();
        match entries.get(&key) {
            Some(existing) => (Arc::clone(existing), false),
            None => {
                entries.insert(key, Arc::clone(&value));
                (value, true)
            }
        }
    }
}

/// Runtime state a plan executes against.
pub(crate) struct Frame {
    pub(crate) engine: Arc<Engine>,
    pub(crate) scope: Arc<ScopeInner>,
    pub(crate) parameters: Arc<[AnyArc]>,
    pub(crate) request: RequestCache,
}

impl Frame {
    pub(crate) fn new(engine: Arc<Engine>, scope: Arc<ScopeInner>) -> Self {
        Self {
            engine,
            scope,
            parameters: Arc::from(Vec::new()),
            request: RequestCache::default(),
        }
    }

    /// Same call, different scope.
    pub(crate) fn with_scope(&self, scope: Arc<ScopeInner>) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            scope,
            parameters: Arc::clone(&self.parameters),
            request: self.request.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::RegistrationId;

    #[test]
    fn test_request_cache_first_insert_wins() {
        let cache = RequestCache::default();
        let key = (SlotKey(RegistrationId::next()), None);
        assert!(cache.get(&key).is_none());

        let (first, fresh) = cache.insert(key, Arc::new(1u8));
        assert!(fresh);
        let (second, fresh) = cache.insert(key, Arc::new(2u8));
        assert!(!fresh);
        assert!(Arc::ptr_eq(&first, &second));

        let shared = cache.clone();
        assert!(shared.get(&key).is_some());
    }

    #[test]
    fn test_request_cache_keys_by_scope() {
        let cache = RequestCache::default();
        let slot = SlotKey(RegistrationId::next());
        let a = ScopeInner::root();
        let b = ScopeInner::root();
        cache.insert((slot, Some(a.id())), Arc::new(1u8));
        assert!(cache.get(&(slot, Some(b.id()))).is_none());
        assert!(cache.get(&(slot, None)).is_none());
    }

    #[test]
    fn test_revive_fails_once_dropped() {
        let engine: Weak<Engine> = Weak::new();
        let scope = ScopeInner::root();
        let result = revive(
            &engine,
            &Arc::downgrade(&scope),
            Arc::from(Vec::new()),
            RequestCache::default(),
        );
        assert!(matches!(result, Err(DiError::Disposed)));
    }
}
