//! Criterion benchmarks for the reservoir engine.
//!
//! Run with:
//!   cargo bench
//!   cargo bench --features parallel,simd
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use plastica::config::ReservoirConfig;
use plastica::dense::ExecutionTier;
use plastica::engine::Engine;
use plastica::network::Network;
use plastica::prng::Prng;
use plastica::spectral;

fn make_engine(size: usize, seed: u64) -> Engine {
    let cfg = ReservoirConfig::with_size(size * 2, size).with_seed(seed);
    match Engine::new(cfg) {
        Ok(e) => e,
        Err(e) => panic!("bench config rejected: {e}"),
    }
}

/// Benchmark step() with varying reservoir sizes.
fn bench_step_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_size");

    for size in [32, 64, 128, 256].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("scalar", size), size, |b, &size| {
            let mut engine = make_engine(size, 42);
            engine.set_execution_tier(ExecutionTier::Scalar);
            let mut t = 0u64;

            b.iter(|| {
                t += 1;
                let x = (0.1 * t as f32).sin();
                let y = (0.1 * (t + 1) as f32).sin();
                black_box(engine.step(x, y).avg_loss)
            });
        });
    }

    group.finish();
}

/// Benchmark step() comparing execution tiers at a fixed size.
fn bench_step_tiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_tier");
    let size = 256;
    group.throughput(Throughput::Elements(size as u64));

    for tier in [ExecutionTier::Scalar, ExecutionTier::Simd, ExecutionTier::Parallel] {
        group.bench_function(format!("{tier:?}_{size}"), |b| {
            let mut engine = make_engine(size, 42);
            engine.set_execution_tier(tier);
            let mut t = 0u64;

            b.iter(|| {
                t += 1;
                black_box(engine.step((0.1 * t as f32).sin(), 0.0).prediction)
            });
        });
    }

    group.finish();
}

/// Benchmark the power-iteration estimate on its own.
fn bench_power_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("power_iteration");

    for size in [64, 256, 512].iter() {
        group.bench_with_input(BenchmarkId::new("estimate", size), size, |b, &size| {
            let cfg = ReservoirConfig::with_size(size, size).with_seed(7);
            let mut rng = Prng::new(7);
            let mut net = Network::new(&cfg, &mut rng);

            b.iter(|| {
                let (sigma, _) =
                    spectral::estimate_sigma(&mut net, 20, &mut rng, ExecutionTier::Scalar);
                black_box(sigma)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_step_sizes,
    bench_step_tiers,
    bench_power_iteration
);
criterion_main!(benches);
