//! Benchmarks for non-dominated sorting.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::prelude::*;

use design_optim::archive::{non_dominated_fronts, pareto_mask};

fn random_points(n: usize, n_obj: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..n_obj).map(|_| rng.r#gen::<f64>()).collect())
        .collect()
}

fn bench_non_dominated_fronts(c: &mut Criterion) {
    let mut group = c.benchmark_group("non_dominated_fronts");
    group.sample_size(20);

    for n in [100, 500, 2000] {
        let points = random_points(n, 2, 7);
        group.bench_with_input(BenchmarkId::from_parameter(n), &points, |b, points| {
            b.iter(|| non_dominated_fronts(black_box(points)));
        });
    }

    group.finish();
}

fn bench_pareto_mask_objectives(c: &mut Criterion) {
    let mut group = c.benchmark_group("pareto_mask");
    group.sample_size(20);

    for n_obj in [2, 3, 5] {
        let points = random_points(1000, n_obj, 11);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_objectives", n_obj)),
            &points,
            |b, points| {
                b.iter(|| pareto_mask(black_box(points)));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_non_dominated_fronts, bench_pareto_mask_objectives);
criterion_main!(benches);
