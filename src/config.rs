//! Container configuration

use crate::Lifetime;

/// What happens when a registration arrives whose discriminator (qualifier,
/// or implementation type when unqualified) matches an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Keep both; every registration is distinguished by its id.
    #[default]
    PreserveDuplications,
    /// The new registration replaces the existing one.
    ReplaceExisting,
    /// The new registration is dropped.
    SkipDuplications,
    /// Fail with [`DiError::AlreadyRegistered`](crate::DiError::AlreadyRegistered).
    ThrowOnDuplicate,
}

/// Which constructor wins when several are satisfiable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConstructorSelection {
    #[default]
    MostParameters,
    LeastParameters,
}

/// Order of the items produced for `Vec<Arc<T>>` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumerableOrder {
    /// Registration order.
    #[default]
    Registration,
    /// Most recent registration first.
    Reverse,
}

/// How an `Auto` lifetime resolves dependencies imposing different named
/// scopes, which cannot be ordered against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoTieBreak {
    /// The first such dependency in parameter order wins.
    #[default]
    FirstWins,
    /// The last such dependency wins.
    LastWins,
    /// Registration-time style failure at plan compilation.
    Fail,
}

/// Container-wide behavior switches.
///
/// # Examples
///
/// ```rust
/// use dependency_resolver::{Container, ContainerConfig, DuplicatePolicy, Lifetime};
///
/// let container = Container::with_config(
///     ContainerConfig::new()
///         .duplicates(DuplicatePolicy::ReplaceExisting)
///         .default_lifetime(Lifetime::Scoped)
///         .lazy_circular_dependencies(true),
/// );
/// assert_eq!(container.config().default_lifetime, Lifetime::Scoped);
/// ```
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub duplicates: DuplicatePolicy,
    /// Unqualified requests may select qualified registrations.
    pub unnamed_resolves_named: bool,
    /// `Lazy<T>` defers compiling the plan of `T`, so it can break cycles.
    pub lazy_circular_dependencies: bool,
    pub constructor_selection: ConstructorSelection,
    pub enumerable_order: EnumerableOrder,
    pub auto_tie_break: AutoTieBreak,
    /// Lifetime for registrations that do not set one.
    pub default_lifetime: Lifetime,
    /// Track disposable transient instances in the resolving scope.
    pub track_transient_disposables: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            duplicates: DuplicatePolicy::default(),
            unnamed_resolves_named: false,
            lazy_circular_dependencies: false,
            constructor_selection: ConstructorSelection::default(),
            enumerable_order: EnumerableOrder::default(),
            auto_tie_break: AutoTieBreak::default(),
            default_lifetime: Lifetime::Transient,
            track_transient_disposables: true,
        }
    }
}

impl ContainerConfig {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn unnamed_resolves_named(mut self, enabled: bool) -> Self {
        self.unnamed_resolves_named = enabled;
        self
    }

    pub fn lazy_circular_dependencies(mut self, enabled: bool) -> Self {
        self.lazy_circular_dependencies = enabled;
        self
    }

    pub fn constructor_selection(mut self, selection: ConstructorSelection) -> Self {
        self.constructor_selection = selection;
        self
    }

    pub fn enumerable_order(mut self, order: EnumerableOrder) -> Self {
        self.enumerable_order = order;
        self
    }

    pub fn auto_tie_break(mut self, tie_break: AutoTieBreak) -> Self {
        self.auto_tie_break = tie_break;
        self
    }

    pub fn default_lifetime(mut self, lifetime: Lifetime) -> Self {
        self.default_lifetime = lifetime;
        self
    }

    pub fn track_transient_disposables(mut self, enabled: bool) -> Self {
        self.track_transient_disposables = enabled;
        self
    }
}
