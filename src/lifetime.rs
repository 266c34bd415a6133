//! Lifetime strategies
//!
//! At plan-build time a registration's [`Lifetime`] decides how its raw
//! construction plan is wrapped: not at all (transient), or with a cache slot
//! looked up in the root scope, the resolving scope, the nearest named scope
//! or the per-call request cache. `Auto` lifetimes are first turned into one
//! of those from the lifetimes of the dependencies.

use crate::config::{AutoTieBreak, ContainerConfig};
use crate::plan::{Frame, Plan, Step};
use crate::registration::{Disposer, Kind, Registration};
use crate::scope::{ScopeInner, SlotKey};
use crate::{AnyArc, DiError, Lifetime, Result};
use std::sync::Arc;

/// Where a cached lifetime keeps its instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CacheStrategy {
    /// Root scope.
    Singleton,
    /// Resolving scope.
    Scoped,
    /// Request cache, shared across every scope the call reaches.
    PerRequest,
    /// Request cache, one entry per scope.
    PerScopedRequest,
    /// Nearest enclosing scope carrying the name.
    NamedScope(Arc<str>),
}

impl CacheStrategy {
    /// The strategy of a lifetime, `None` when nothing is cached.
    pub(crate) fn for_lifetime(lifetime: &Lifetime) -> Option<Self> {
        match lifetime {
            Lifetime::Transient | Lifetime::Auto(_) => None,
            Lifetime::Singleton => Some(Self::Singleton),
            Lifetime::Scoped => Some(Self::Scoped),
            Lifetime::PerRequest => Some(Self::PerRequest),
            Lifetime::PerScopedRequest => Some(Self::PerScopedRequest),
            Lifetime::NamedScope(name) => Some(Self::NamedScope(Arc::clone(name))),
        }
    }

    /// Look the instance up, constructing it on a miss.
    pub(crate) fn execute(
        &self,
        slot: SlotKey,
        inner: &Plan,
        disposer: Option<&Disposer>,
        service: &'static str,
        frame: &Frame,
    ) -> Result<AnyArc> {
        match self {
            CacheStrategy::Singleton => {
                let root = Arc::clone(frame.engine.root());
                in_scope(&root, slot, inner, disposer, service, frame)
            }
            CacheStrategy::Scoped => {
                let scope = Arc::clone(&frame.scope);
                in_scope(&scope, slot, inner, disposer, service, frame)
            }
            CacheStrategy::NamedScope(name) => {
                let target = frame.scope.find_named(name)?.ok_or_else(|| DiError::CreationFailed {
                    type_name: service,
                    reason: format!("no enclosing scope named \"{name}\""),
                })?;
                in_scope(&target, slot, inner, disposer, service, frame)
            }
            CacheStrategy::PerRequest => per_request((slot, None), inner, disposer, service, frame),
            CacheStrategy::PerScopedRequest => per_request(
                (slot, Some(frame.scope.id())),
                inner,
                disposer,
                service,
                frame,
            ),
        }
    }
}

/// Scope-held slot; the instance is built in, and owned by, `target`.
fn in_scope(
    target: &Arc<ScopeInner>,
    slot: SlotKey,
    inner: &Plan,
    disposer: Option<&Disposer>,
    service: &'static str,
    frame: &Frame,
) -> Result<AnyArc> {
    target.get_or_create(slot, service, || {
        let value = inner.execute(&frame.with_scope(Arc::clone(target)))?;
        if let Some(disposer) = disposer {
            target.track(Arc::clone(&value), Arc::clone(disposer), service);
        }
        Ok(value)
    })
}

fn per_request(
    key: (SlotKey, Option<crate::scope::ScopeId>),
    inner: &Plan,
    disposer: Option<&Disposer>,
    service: &'static str,
    frame: &Frame,
) -> Result<AnyArc> {
    if let Some(value) = frame.request.get(&key) {
        return Ok(value);
    }
    let (value, fresh) = frame.request.insert(key, inner.execute(frame)?);
    if fresh {
        if let Some(disposer) = disposer {
            frame
                .scope
                .track(Arc::clone(&value), Arc::clone(disposer), service);
        }
    }
    Ok(value)
}

/// Wrap the raw plan of `registration` according to `lifetime`.
///
/// Ready-made instances are returned as they are; they are owned by the root
/// scope from registration on.
pub(crate) fn apply(
    lifetime: &Lifetime,
    raw: Plan,
    registration: &Registration,
    config: &ContainerConfig,
) -> Plan {
    if matches!(registration.implementation.kind, Kind::Instance(_)) {
        return raw;
    }

    let disposer = if registration.tracks_disposal() {
        registration.disposer.clone()
    } else {
        None
    };
    let service = registration.service().name();

    match CacheStrategy::for_lifetime(lifetime) {
        Some(strategy) => Plan::new(Step::Cached {
            strategy,
            slot: SlotKey(registration.slot_id()),
            inner: raw,
            disposer,
            service,
        }),
        None => match disposer {
            Some(disposer) if config.track_transient_disposables => Plan::new(Step::Tracked {
                inner: raw,
                disposer,
                service,
            }),
            _ => raw,
        },
    }
}

/// Concrete lifetime of an `Auto` registration.
///
/// The widest lifetime among `dependencies`, capped at `boundary`; transient
/// when nothing imposes more. Two different named scopes cannot be ordered, so
/// `tie_break` decides between them.
pub(crate) fn derive_auto(
    boundary: &Lifetime,
    dependencies: &[Lifetime],
    tie_break: AutoTieBreak,
    service: &'static str,
) -> Result<Lifetime> {
    let boundary = match boundary {
        Lifetime::Auto(inner) => inner.as_ref(),
        other => other,
    };

    let mut widest = Lifetime::Transient;
    for dependency in dependencies {
        let dependency = match dependency {
            Lifetime::Auto(inner) => inner.as_ref(),
            other => other,
        };
        let conflicting = matches!(
            (&widest, dependency),
            (Lifetime::NamedScope(a), Lifetime::NamedScope(b)) if a != b
        );
        if conflicting {
            match tie_break {
                AutoTieBreak::FirstWins => {}
                AutoTieBreak::LastWins => widest = dependency.clone(),
                AutoTieBreak::Fail => {
                    return Err(DiError::CreationFailed {
                        type_name: service,
                        reason: format!(
                            "auto lifetime cannot choose between {widest} and {dependency}"
                        ),
                    });
                }
            }
        } else if dependency.rank() > widest.rank() {
            widest = dependency.clone();
        }
    }

    if widest.rank() > boundary.rank() {
        Ok(boundary.clone())
    } else {
        Ok(widest)
    }
}
