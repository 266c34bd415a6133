//! Injectable marker trait and lifetime policies
//!
//! These define what types can be resolved and how long resolved instances live.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased, shareable instance as produced by construction plans.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Marker trait for types that can be injected via the DI container.
///
/// This is automatically implemented for all types that are `Send + Sync + 'static`.
/// You never need to implement this manually.
///
/// # Examples
///
/// ```rust
/// // Any type that is Send + Sync + 'static works automatically
/// struct MyService {
///     name: String,
/// }
///
/// // No impl needed - it just works!
/// ```
pub trait Injectable: Send + Sync + 'static {}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: Send + Sync + 'static> Injectable for T {}

/// Service lifetime specification.
///
/// The lifetime decides, when a construction plan is compiled, whether and
/// where the produced instance is cached.
///
/// | Lifetime | Shared by |
/// |---|---|
/// | `Transient` | nobody, every resolve constructs |
/// | `Singleton` | the whole container, owned by the root scope |
/// | `Scoped` | every resolve made from the same scope |
/// | `PerRequest` | one top-level resolve call, across scope boundaries |
/// | `PerScopedRequest` | one top-level resolve call within one scope |
/// | `NamedScope` | the nearest enclosing scope carrying the name |
/// | `Auto` | derived from the dependencies, capped at a boundary |
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Lifetime {
    /// New instance created on every resolve
    #[default]
    Transient,

    /// Single instance shared across all resolves, created on first access
    Singleton,

    /// One instance per scope
    Scoped,

    /// One instance per top-level resolve call
    PerRequest,

    /// One instance per top-level resolve call and scope
    PerScopedRequest,

    /// Scoped to the nearest enclosing scope with the given name
    NamedScope(Arc<str>),

    /// Adopts the longest-lived lifetime among the resolved dependencies,
    /// capped at the boundary
    Auto(Arc<Lifetime>),
}

impl Lifetime {
    /// Create a named-scope lifetime.
    #[inline]
    pub fn named_scope(name: impl Into<Arc<str>>) -> Self {
        Lifetime::NamedScope(name.into())
    }

    /// Create an auto lifetime capped at `boundary`.
    #[inline]
    pub fn auto(boundary: Lifetime) -> Self {
        Lifetime::Auto(Arc::new(boundary))
    }

    /// Returns `true` if this lifetime caches instances somewhere.
    #[inline]
    pub fn is_cached(&self) -> bool {
        !matches!(self, Lifetime::Transient | Lifetime::Auto(_))
    }

    /// Ordering value used when comparing lifetimes (higher = longer lived).
    ///
    /// `Auto` never reaches a compiled plan, it ranks as its boundary.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Lifetime::Transient => 0,
            Lifetime::PerRequest => 1,
            Lifetime::PerScopedRequest => 2,
            Lifetime::Scoped => 3,
            Lifetime::NamedScope(_) => 4,
            Lifetime::Singleton => 5,
            Lifetime::Auto(boundary) => boundary.rank(),
        }
    }

    /// Short label used in log output.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Lifetime::Transient => "transient",
            Lifetime::Singleton => "singleton",
            Lifetime::Scoped => "scoped",
            Lifetime::PerRequest => "per_request",
            Lifetime::PerScopedRequest => "per_scoped_request",
            Lifetime::NamedScope(_) => "named_scope",
            Lifetime::Auto(_) => "auto",
        }
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::Transient => f.write_str("Transient"),
            Lifetime::Singleton => f.write_str("Singleton"),
            Lifetime::Scoped => f.write_str("Scoped"),
            Lifetime::PerRequest => f.write_str("PerRequest"),
            Lifetime::PerScopedRequest => f.write_str("PerScopedRequest"),
            Lifetime::NamedScope(name) => write!(f, "NamedScope({name})"),
            Lifetime::Auto(boundary) => write!(f, "Auto(<= {boundary})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifetime_ordering() {
        assert!(Lifetime::Singleton.rank() > Lifetime::named_scope("db").rank());
        assert!(Lifetime::named_scope("db").rank() > Lifetime::Scoped.rank());
        assert!(Lifetime::Scoped.rank() > Lifetime::PerScopedRequest.rank());
        assert!(Lifetime::PerScopedRequest.rank() > Lifetime::PerRequest.rank());
        assert!(Lifetime::PerRequest.rank() > Lifetime::Transient.rank());
        assert_eq!(Lifetime::auto(Lifetime::Scoped).rank(), Lifetime::Scoped.rank());
    }

    #[test]
    fn test_is_cached() {
        assert!(!Lifetime::Transient.is_cached());
        assert!(!Lifetime::auto(Lifetime::Singleton).is_cached());
        assert!(Lifetime::Singleton.is_cached());
        assert!(Lifetime::PerRequest.is_cached());
    }

    #[test]
    fn test_display() {
        assert_eq!(Lifetime::Scoped.to_string(), "Scoped");
        assert_eq!(Lifetime::named_scope("tx").to_string(), "NamedScope(tx)");
        assert_eq!(
            Lifetime::auto(Lifetime::Singleton).to_string(),
            "Auto(<= Singleton)"
        );
    }
}
