//! Benchmarks for layout evaluation and the mutate-and-select step.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use shape_factory::{
    compute::evolution::{LayoutRng, StepParams, fitness},
    schema::FactoryConfig,
};

fn bench_fitness(c: &mut Criterion) {
    let mut group = c.benchmark_group("fitness");

    for shapes in [8, 32, 49] {
        let mut rng = LayoutRng::new(42);
        let layout = rng.generate(shapes, 49);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_shapes", shapes)),
            &shapes,
            |b, _| {
                b.iter(|| fitness(black_box(&layout)));
            },
        );
    }

    group.finish();
}

fn bench_evolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("evolve");

    for children in [10, 40] {
        let config = FactoryConfig {
            children,
            ..Default::default()
        };
        let params = StepParams::from_config(&config).unwrap();
        let mut rng = LayoutRng::new(7);
        let mut parent = rng.generate(config.shapes, config.spaces);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_children", children)),
            &children,
            |b, _| {
                b.iter(|| {
                    parent = rng.evolve(black_box(&parent), &params).layout;
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_fitness, bench_evolve);
criterion_main!(benches);
