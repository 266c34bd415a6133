//! Benchmarks for the resolution engine

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use dependency_resolver::{
    Constructor, Container, Factory, Implementation, Lazy, Lifetime, Overrides, Registration,
};
use std::hint::black_box;
use std::sync::Arc;

#[allow(dead_code)]
struct SmallService {
    value: i32,
}

#[allow(dead_code)]
struct MediumService {
    name: String,
    values: Vec<i32>,
}

#[allow(dead_code)]
struct LargeService {
    data: Vec<u8>,
}

// A three-level dependency graph
#[allow(dead_code)]
struct Repository {
    small: Arc<SmallService>,
}

#[allow(dead_code)]
struct Handler {
    repository: Arc<Repository>,
    medium: Arc<MediumService>,
}

fn graph(handler_lifetime: Lifetime) -> Container {
    let container = Container::new();
    container.singleton(SmallService { value: 42 }).unwrap();
    container
        .singleton(MediumService {
            name: "test".to_string(),
            values: vec![1, 2, 3, 4, 5],
        })
        .unwrap();
    container
        .register(Registration::of::<Repository>(Implementation::constructor(
            Constructor::from_fn(|small| Repository { small }),
        )))
        .unwrap();
    container
        .register(
            Registration::of::<Handler>(Implementation::constructor(Constructor::from_fn(
                |(repository, medium)| Handler { repository, medium },
            )))
            .with_lifetime(handler_lifetime),
        )
        .unwrap();
    container
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    group.bench_function("singleton_small", |b| {
        b.iter(|| {
            let container = Container::new();
            container.singleton(SmallService { value: 42 }).unwrap();
            black_box(container)
        })
    });

    group.bench_function("lazy", |b| {
        b.iter(|| {
            let container = Container::new();
            container.lazy(|| SmallService { value: 42 }).unwrap();
            black_box(container)
        })
    });

    group.bench_function("transient", |b| {
        b.iter(|| {
            let container = Container::new();
            container.transient(|| SmallService { value: 42 }).unwrap();
            black_box(container)
        })
    });

    group.bench_function("graph_4_services", |b| {
        b.iter(|| black_box(graph(Lifetime::Transient)))
    });

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    group.throughput(Throughput::Elements(1));

    let container = graph(Lifetime::Transient);
    // Compile the plans outside the measurement
    let _ = container.get::<Handler>().unwrap();

    group.bench_function("get_singleton", |b| {
        b.iter(|| {
            let service = container.get::<SmallService>().unwrap();
            black_box(service)
        })
    });

    group.bench_function("get_transient_graph", |b| {
        b.iter(|| {
            let service = container.get::<Handler>().unwrap();
            black_box(service)
        })
    });

    group.bench_function("contains_check", |b| {
        b.iter(|| {
            let exists = container.contains::<SmallService>();
            black_box(exists)
        })
    });

    group.bench_function("try_get_not_found", |b| {
        b.iter(|| {
            let service = container.try_get::<LargeService>();
            black_box(service)
        })
    });

    group.bench_function("get_all", |b| {
        b.iter(|| {
            let all = container.get_all::<SmallService>().unwrap();
            black_box(all)
        })
    });

    group.bench_function("with_overrides", |b| {
        b.iter(|| {
            let service = container
                .resolve_with::<Arc<Handler>>(
                    Overrides::new().with(SmallService { value: 7 }),
                )
                .unwrap();
            black_box(service)
        })
    });

    group.finish();
}

fn bench_compilation(c: &mut Criterion) {
    let mut group = c.benchmark_group("compilation");

    group.bench_function("compile_after_invalidation", |b| {
        let container = graph(Lifetime::Transient);
        b.iter(|| {
            // Any registration change clears the plan cache
            container
                .remap(Registration::instance(LargeService { data: vec![0] }))
                .unwrap();
            let service = container.get::<Handler>().unwrap();
            black_box(service)
        })
    });

    group.finish();
}

fn bench_wrappers(c: &mut Criterion) {
    let mut group = c.benchmark_group("wrappers");

    let container = graph(Lifetime::Transient);

    group.bench_function("lazy_get", |b| {
        b.iter(|| {
            let lazy = container.resolve::<Lazy<Handler>>().unwrap();
            black_box(lazy.get().unwrap())
        })
    });

    group.bench_function("factory_create", |b| {
        let factory = container.resolve::<Factory<Handler>>().unwrap();
        b.iter(|| black_box(factory.create().unwrap()))
    });

    group.finish();
}

fn bench_decorators(c: &mut Criterion) {
    let mut group = c.benchmark_group("decorators");

    for depth in [1usize, 4] {
        let container = Container::new();
        container.transient(|| SmallService { value: 0 }).unwrap();
        for _ in 0..depth {
            container
                .register(Registration::decorator::<SmallService>(
                    Implementation::constructor(Constructor::from_fn(
                        |inner: Arc<SmallService>| SmallService {
                            value: inner.value + 1,
                        },
                    )),
                ))
                .unwrap();
        }

        group.bench_function(format!("transient_depth_{depth}"), |b| {
            b.iter(|| black_box(container.get::<SmallService>().unwrap()))
        });
    }

    group.finish();
}

fn bench_scoped(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoped");

    group.bench_function("create_scope", |b| {
        let root = graph(Lifetime::Scoped);

        b.iter(|| {
            let scope = root.begin_scope(None).unwrap();
            black_box(scope)
        })
    });

    group.bench_function("resolve_cached_in_scope", |b| {
        let root = graph(Lifetime::Scoped);
        let child = root.begin_scope(None).unwrap();
        let _ = child.get::<Handler>().unwrap();

        b.iter(|| {
            let service = child.get::<Handler>().unwrap();
            black_box(service)
        })
    });

    group.bench_function("scope_per_request", |b| {
        let root = graph(Lifetime::Scoped);

        b.iter(|| {
            // Simulate typical request: open a scope, resolve, tear down
            let scope = root.begin_scope(Some("request")).unwrap();
            let handler = scope.get::<Handler>().unwrap();
            black_box(handler);
            scope.dispose().unwrap();
        })
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");

    group.bench_function("concurrent_reads_4", |b| {
        let container = Arc::new(graph(Lifetime::Transient));

        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let c = Arc::clone(&container);
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let _ = c.get::<Handler>().unwrap();
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_registration,
    bench_resolution,
    bench_compilation,
    bench_wrappers,
    bench_decorators,
    bench_scoped,
    bench_concurrent,
);

criterion_main!(benches);
