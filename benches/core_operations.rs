use chrono::Utc;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use hopper::dependent::{Dependency, Dependent, Tag};
use hopper::download::{SafeArg, expand_safe_args};
use hopper::quarantine::{QUARANTINED_FILE, decode, encode};
use hopper::resolver::{Policy, Resolver};
use hopper::Catalog;

/// Layered graph: every dependent on level n depends on all of level n+1,
/// with a build-only and an optional edge sprinkled in.
fn layered_catalog(levels: usize, width: usize) -> Catalog {
    let mut dependents = Vec::new();
    for level in 0..levels {
        for i in 0..width {
            let mut dep = Dependent::new(format!("d{}_{}", level, i), "1.0");
            if level + 1 < levels {
                for j in 0..width {
                    let edge = Dependency::new(format!("d{}_{}", level + 1, j));
                    dep = dep.depends_on(match j % 3 {
                        1 => edge.tagged([Tag::Build]),
                        2 => edge.tagged([Tag::Optional]),
                        _ => edge,
                    });
                }
            }
            dependents.push(dep);
        }
    }
    Catalog::new(dependents)
}

fn bench_expand_dependencies(c: &mut Criterion) {
    let mut group = c.benchmark_group("expand_dependencies");

    for levels in [4, 8, 16] {
        let catalog = layered_catalog(levels, 6);
        let root = catalog.get("d0_0").unwrap().clone();
        let policy = Policy::from_flags(true, false, true, false);

        group.bench_with_input(BenchmarkId::new("cold", levels), &levels, |b, _| {
            b.iter(|| {
                let resolver = Resolver::new();
                resolver
                    .expand_dependencies(black_box(&catalog), &policy, &root)
                    .unwrap()
            })
        });

        let warm = Resolver::new();
        warm.expand_dependencies(&catalog, &policy, &root).unwrap();
        group.bench_with_input(BenchmarkId::new("memoized", levels), &levels, |b, _| {
            b.iter(|| {
                warm.expand_dependencies(black_box(&catalog), &policy, &root)
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_quarantine_codec(c: &mut Criterion) {
    let now = Utc::now();
    let raw = encode(QUARANTINED_FILE, now, Some("hopper"), Some("5D1C2C5E-0000"));

    c.bench_function("quarantine encode", |b| {
        b.iter(|| encode(black_box(QUARANTINED_FILE), now, Some("hopper"), None))
    });
    c.bench_function("quarantine decode", |b| {
        b.iter(|| decode(black_box(Some(raw.as_slice()))).unwrap())
    });
}

fn bench_expand_safe_args(c: &mut Criterion) {
    let args: Vec<SafeArg> = ["git", "clone", "--depth", "1", "https://example.com/x.git", "/tmp/x"]
        .into_iter()
        .map(SafeArg::from)
        .collect();

    c.bench_function("expand_safe_args", |b| {
        b.iter(|| expand_safe_args(black_box(&args), false))
    });
}

criterion_group!(
    benches,
    bench_expand_dependencies,
    bench_quarantine_codec,
    bench_expand_safe_args
);
criterion_main!(benches);
