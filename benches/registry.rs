//! Registration registry throughput: add/lookup/rollback on the catalog
//! sizes a single loaded extension realistically produces.

use criterion::{Criterion, criterion_group, criterion_main};
use ext_host::registry::{Registration, RegistrationKind, RegistrationRegistry};
use std::hint::black_box;

fn registration(kind: RegistrationKind, name: &str, extension_id: &str) -> Registration {
    Registration {
        kind,
        name: name.to_string(),
        extension_id: extension_id.to_string(),
        payload: serde_json::json!({"order": 0}),
    }
}

fn bench_add_many_tools(c: &mut Criterion) {
    c.bench_function("registry_add_100_tools", |b| {
        b.iter(|| {
            let mut registry = RegistrationRegistry::new();
            for i in 0..100 {
                registry
                    .add(registration(RegistrationKind::Tool, &format!("tool_{i}"), "demo"))
                    .expect("add");
            }
            black_box(&registry);
        });
    });
}

fn bench_lookup_hit(c: &mut Criterion) {
    let mut registry = RegistrationRegistry::new();
    for i in 0..1000 {
        registry
            .add(registration(RegistrationKind::Command, &format!("cmd_{i}"), "demo"))
            .expect("add");
    }

    c.bench_function("registry_lookup_hit_of_1000", |b| {
        b.iter(|| black_box(registry.lookup(RegistrationKind::Command, "cmd_500")));
    });
}

fn bench_add_handler_no_uniqueness_check(c: &mut Criterion) {
    c.bench_function("registry_add_200_event_handlers", |b| {
        b.iter(|| {
            let mut registry = RegistrationRegistry::new();
            for i in 0..200 {
                registry.add_handler(registration(
                    RegistrationKind::EventHandler,
                    "tool_call",
                    &format!("extension_{i}"),
                ));
            }
            black_box(&registry);
        });
    });
}

fn bench_remove_owned_by(c: &mut Criterion) {
    c.bench_function("registry_remove_owned_by_of_50_extensions", |b| {
        b.iter(|| {
            let mut registry = RegistrationRegistry::new();
            for i in 0..50 {
                let ext = format!("extension_{i}");
                registry
                    .add(registration(RegistrationKind::Command, &format!("run_{i}"), &ext))
                    .expect("add");
                registry
                    .add(registration(RegistrationKind::Tool, &format!("read_{i}"), &ext))
                    .expect("add");
            }
            registry.remove_owned_by("extension_25");
            black_box(&registry);
        });
    });
}

criterion_group!(
    benches,
    bench_add_many_tools,
    bench_lookup_hit,
    bench_add_handler_no_uniqueness_check,
    bench_remove_owned_by
);
criterion_main!(benches);
