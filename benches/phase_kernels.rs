//! Phase kernel benchmarks across worker counts
//!
//! Each benchmark builds its parallel region once and times one iteration of
//! the kernel body per sample, matching how the orchestrator times phases.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meabo_core::kernels::{ComputeMix, IndirectStream, Palindromes, Reduction, VectorAdd};
use meabo_core::{AffinityBinder, AffinityMask, KernelRunner, Launch, PhaseKernel};

const WORKER_COUNTS: [usize; 4] = [1, 2, 4, 8];
const ARRAY_SIZE: usize = 1 << 18;

fn bench_kernel<K: PhaseKernel>(c: &mut Criterion, group_name: &str, make: impl Fn() -> K) {
    let mut group = c.benchmark_group(group_name);

    for workers in WORKER_COUNTS {
        let runner = KernelRunner::new(AffinityBinder::disabled(workers));
        let mut kernel = make();
        let launch = Launch {
            phase: kernel.phase(),
            threads: workers,
            iterations: 1,
            mask: AffinityMask::Unconstrained,
        };
        let Ok(region) = runner.launch(launch) else {
            continue;
        };

        group.throughput(criterion::Throughput::Bytes(kernel.bytes_per_iteration()));
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, _| {
            b.iter(|| {
                black_box(kernel.execute(&region, None)).ok();
            });
        });
    }

    group.finish();
}

fn ramp(len: usize, scale: f64) -> Vec<f64> {
    (0..len).map(|i| (i % 1024) as f64 * scale).collect()
}

fn benchmark_compute_mix(c: &mut Criterion) {
    bench_kernel(c, "compute_mix", || {
        let ints = (0..ARRAY_SIZE).map(|i| (i % 1024) as i32).collect();
        ComputeMix::new(ramp(ARRAY_SIZE, 0.5), ints, 8).unwrap()
    });
}

fn benchmark_indirect_stream(c: &mut Criterion) {
    bench_kernel(c, "indirect_stream", || {
        let indices = (0..ARRAY_SIZE).map(|i| ((i * 7919) % ARRAY_SIZE) as u32).collect();
        IndirectStream::new(vec![0.0; ARRAY_SIZE], ramp(ARRAY_SIZE, 1.0), ramp(ARRAY_SIZE, 2.0), indices).unwrap()
    });
}

fn benchmark_reduction(c: &mut Criterion) {
    bench_kernel(c, "reduction", || Reduction::new(ramp(ARRAY_SIZE, 0.25)));
}

fn benchmark_vector_add(c: &mut Criterion) {
    bench_kernel(c, "vector_add", || {
        VectorAdd::new(vec![0.0; ARRAY_SIZE], ramp(ARRAY_SIZE, 1.0), ramp(ARRAY_SIZE, 3.0)).unwrap()
    });
}

fn benchmark_palindromes(c: &mut Criterion) {
    bench_kernel(c, "palindromes", || Palindromes::new(1 << 10));
}

criterion_group!(
    benches,
    benchmark_compute_mix,
    benchmark_indirect_stream,
    benchmark_reduction,
    benchmark_vector_add,
    benchmark_palindromes
);
criterion_main!(benches);
