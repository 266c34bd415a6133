//! Example demonstrating logging capabilities
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use dependency_resolver::{
    Constructor, Container, Implementation, Lifetime, Overrides, Registration,
};
use std::sync::Arc;

// Example services
#[allow(dead_code)]
struct Database {
    url: String,
}

#[allow(dead_code)]
struct UserService {
    db: Arc<Database>,
}

#[allow(dead_code)]
struct RequestContext {
    request_id: String,
}

struct AuditedUsers(Arc<UserService>);

fn main() {
    // Initialize logging - uses JSON if logging-json feature enabled,
    // pretty if logging-pretty enabled
    dependency_resolver::logging::builder()
        .trace()
        .di_only()
        .pretty()
        .init();

    println!("=== Dependency Resolver Logging Demo ===\n");

    // logs: "Creating new root container"
    let container = Container::new();

    // logs: "Registering service", "Registration stored", "Plan cache invalidated"
    container
        .singleton(Database {
            url: "postgres://localhost/mydb".into(),
        })
        .unwrap();
    container
        .register(
            Registration::of::<UserService>(Implementation::constructor(Constructor::from_fn(
                |db| UserService { db },
            )))
            .with_lifetime(Lifetime::Scoped),
        )
        .unwrap();
    container
        .register(Registration::of::<RequestContext>(Implementation::constructor(
            Constructor::from_fn(|_: ()| {
                println!("  [App] Request context being created...");
                RequestContext {
                    request_id: "req-12345".into(),
                }
            }),
        ))
        .with_lifetime(Lifetime::named_scope("request")))
        .unwrap();

    // logs: "Registering service" for a decorator, cached per scope like the service
    container
        .register(Registration::decorator::<UserService>(Implementation::constructor(
            Constructor::from_fn(|inner: Arc<UserService>| {
                println!("  [App] Wrapping user service...");
                UserService {
                    db: Arc::clone(&inner.db),
                }
            }),
        ))
        .with_lifetime(Lifetime::Scoped))
        .unwrap();

    // logs: "Resolving service", "Plan compiled", "Compiling registration"
    let _db = container.get::<Database>().unwrap();

    // logs: "Scope created"
    let request = container.begin_scope(Some("request")).unwrap();

    // logs: "Applying decorator", then "Constructing instance" per construction step
    let users = request.get::<UserService>().unwrap();
    let _ctx = request.get::<RequestContext>().unwrap();

    // The second resolve hits the compiled plan and the scope slot
    let again = request.get::<UserService>().unwrap();
    assert!(Arc::ptr_eq(&users, &again));

    // Missing service: the plan is compiled as unresolvable and cached
    assert!(request.try_get::<AuditedUsers>().is_none());

    // Overrides bypass the plan cache
    let _with_override = request
        .resolve_with::<Arc<UserService>>(Overrides::new().with(Database {
            url: "sqlite::memory:".into(),
        }))
        .unwrap();

    // logs: "Disposing scope"
    request.dispose().unwrap();

    // logs: "Disposing container"
    container.dispose().unwrap();

    println!("\n=== Demo Complete ===");
    println!("Check the log output above to see structured logging in action!");
    println!("\nTip: Use --features logging-json for production (JSON output)");
    println!("     Use --features logging-pretty for development (colorful output)");
}
