//! # dependency-resolver
//!
//! An in-process dependency-resolution engine: registrations in, compiled
//! construction plans out.
//!
//! ## Features
//!
//! - **Compiled plans** - each request shape is compiled once into a plan tree
//!   and cached until the registrations change
//! - **Lifetimes** - transient, singleton, scoped, per-request, per-scoped-request,
//!   named-scope and auto (derived from the dependencies)
//! - **Scopes** - hierarchical, named, disposing owned instances in reverse order
//! - **Selection rules** - qualifiers, conditions on the consumer or the resolution path,
//!   named-scope visibility, last registration wins
//! - **Decorators** - stacked in registration order, conditional like registrations
//! - **Wrappers** - `Option<Arc<T>>`, `Vec<Arc<T>>`, [`Lazy`], [`Factory`],
//!   [`Factory1`], [`Keyed`], [`Owned`] and open generics through [`Generic`]
//! - **Observable** - optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use dependency_resolver::{Constructor, Container, Implementation, Lifetime, Registration};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! let container = Container::new();
//!
//! container.singleton(Database { url: "postgres://localhost".into() }).unwrap();
//! container
//!     .register(
//!         Registration::of::<UserService>(Implementation::constructor(
//!             Constructor::from_fn(|db| UserService { db }),
//!         ))
//!         .with_lifetime(Lifetime::Scoped),
//!     )
//!     .unwrap();
//!
//! let request = container.begin_scope(Some("request")).unwrap();
//! let users = request.get::<UserService>().unwrap();
//! assert_eq!(users.db.url, "postgres://localhost");
//! request.dispose().unwrap();
//! ```
//!
//! ## Wrappers
//!
//! ```rust
//! use dependency_resolver::{Container, Factory, Lazy};
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! static COUNTER: AtomicU64 = AtomicU64::new(0);
//!
//! struct RequestId(u64);
//!
//! let container = Container::new();
//! container
//!     .transient(|| RequestId(COUNTER.fetch_add(1, Ordering::SeqCst)))
//!     .unwrap();
//!
//! let lazy = container.resolve::<Lazy<RequestId>>().unwrap();
//! assert!(!lazy.is_evaluated());
//!
//! let ids = container.resolve::<Factory<RequestId>>().unwrap();
//! assert_ne!(ids.create().unwrap().0, ids.create().unwrap().0);
//! ```
//!
//! ## Decorators
//!
//! ```rust
//! use dependency_resolver::{Constructor, Container, Implementation, Registration};
//! use std::sync::Arc;
//!
//! struct Greeting(String);
//!
//! let container = Container::new();
//! container.singleton(Greeting("hello".into())).unwrap();
//! container
//!     .register(Registration::decorator::<Greeting>(Implementation::constructor(
//!         Constructor::from_fn(|inner: Arc<Greeting>| Greeting(format!("{}!", inner.0))),
//!     )))
//!     .unwrap();
//!
//! assert_eq!(container.get::<Greeting>().unwrap().0, "hello!");
//! ```

mod config;
mod container;
mod engine;
mod error;
mod key;
mod lifetime;
#[cfg(feature = "logging")]
pub mod logging;
mod plan;
mod provider;
mod registration;
mod request;
mod rules;
mod scope;
mod storage;

pub use config::*;
pub use container::*;
pub use error::*;
pub use key::*;
pub use provider::*;
pub use registration::{
    Args, BindingTarget, Condition, Constructor, ConstructorOverride, Dependencies,
    DependencyBinding, Dispose, Implementation, Initializer, Param, Registration, RegistrationId,
    ResolutionInfo, Service, Specializer,
};
pub use request::{Factory, Factory1, Generic, Keyed, Lazy, Overrides, Owned, Request, Resolvable};
pub use scope::{Scope, ScopeId};

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CompositionRoot, Condition, Constructor, Container, ContainerConfig, DiError, Factory,
        Factory1, Implementation, Injectable, Keyed, Lazy, Lifetime, Overrides, Owned,
        Registration, Result, Scope, Service,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Database {
        url: String,
    }

    struct UserService {
        db: Arc<Database>,
    }

    fn user_service() -> Implementation {
        Implementation::constructor(Constructor::from_fn(|db| UserService { db }))
    }

    #[test]
    fn test_singleton_registration() {
        let container = Container::new();
        container.singleton(Database { url: "test".into() }).unwrap();

        let db = container.get::<Database>().unwrap();
        assert_eq!(db.url, "test");
    }

    #[test]
    fn test_multiple_resolve_same_instance() {
        let container = Container::new();
        container.singleton(Database { url: "test".into() }).unwrap();

        let db1 = container.get::<Database>().unwrap();
        let db2 = container.get::<Database>().unwrap();

        assert!(Arc::ptr_eq(&db1, &db2));
    }

    #[test]
    fn test_constructor_injection() {
        let container = Container::new();
        container.singleton(Database { url: "test".into() }).unwrap();
        container
            .register(Registration::of::<UserService>(user_service()))
            .unwrap();

        let users = container.get::<UserService>().unwrap();
        assert!(Arc::ptr_eq(&users.db, &container.get::<Database>().unwrap()));
    }

    #[test]
    fn test_lazy_singleton() {
        static CREATED: AtomicU32 = AtomicU32::new(0);

        struct LazyService;

        let container = Container::new();
        container
            .lazy(|| {
                CREATED.fetch_add(1, Ordering::SeqCst);
                LazyService
            })
            .unwrap();

        assert_eq!(CREATED.load(Ordering::SeqCst), 0);

        let _ = container.get::<LazyService>().unwrap();
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);

        let _ = container.get::<LazyService>().unwrap();
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_request_scopes() {
        let root = Container::new();
        root.singleton(Database { url: "root".into() }).unwrap();
        root.register(Registration::of::<UserService>(user_service()).with_lifetime(Lifetime::Scoped))
            .unwrap();

        let first = root.begin_scope(Some("request")).unwrap();
        let second = root.begin_scope(Some("request")).unwrap();

        let a = first.get::<UserService>().unwrap();
        assert!(Arc::ptr_eq(&a, &first.get::<UserService>().unwrap()));
        assert!(!Arc::ptr_eq(&a, &second.get::<UserService>().unwrap()));
        assert!(Arc::ptr_eq(&a.db, &second.get::<UserService>().unwrap().db));
    }

    #[test]
    fn test_not_found_error() {
        let container = Container::new();
        let result = container.get::<Database>();
        assert!(matches!(result, Err(DiError::NotFound { .. })));
    }

    #[test]
    fn test_override_per_call() {
        let root = Container::new();
        root.singleton(Database {
            url: "production".into(),
        })
        .unwrap();
        root.register(Registration::of::<UserService>(user_service()))
            .unwrap();

        let test_users = root
            .resolve_with::<Arc<UserService>>(Overrides::new().with(Database { url: "test".into() }))
            .unwrap();
        assert_eq!(test_users.db.url, "test");
        assert_eq!(root.get::<UserService>().unwrap().db.url, "production");
    }

    #[test]
    fn test_prelude_covers_common_use() {
        use crate::prelude::*;

        let container = Container::with_config(ContainerConfig::new());
        container.singleton(7u8).unwrap();
        let value: Arc<u8> = container.get().unwrap();
        assert_eq!(*value, 7);
    }
}
