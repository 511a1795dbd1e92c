/// Benchmarks for block size against wall-clock time.
///
/// The reduced output is identical for every budget, so this sweep measures per-block
/// scheduling and copy overhead only.
use std::sync::Arc;

use blockwise::memory_store::{MemoryArraySink, MemoryArraySource};
use blockwise::models::{ReductionKind, ReduceRequest};
use blockwise::planner::{plan, MemoryBudget};
use blockwise::reducer::{Reducer, ReducerConfig};
use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::Array3;

fn criterion_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let rows = 512;
    let data = Array3::from_shape_fn((rows, 64, 4), |(r, c, l)| (r + c + l) as f64);
    let source = Arc::new(MemoryArraySource::new(data).unwrap());
    let descriptor = source.descriptor();
    let bytes_per_row = descriptor.bytes_per_row() as u64;
    for rows_per_block in [1_u64, 8, 64, 512] {
        let budget = MemoryBudget::bytes(bytes_per_row * rows_per_block, 1);
        let block_plan = plan(&descriptor, &budget).unwrap();
        let name = format!("mean({rows} rows, {rows_per_block} rows per block)");
        c.bench_function(&name, |b| {
            b.to_async(&runtime).iter(|| {
                let source = Arc::clone(&source);
                let block_plan = block_plan.clone();
                async move {
                    let sink = Arc::new(MemoryArraySink::<f64>::new(rows, 64));
                    let request = ReduceRequest::new(ReductionKind::Mean);
                    Reducer::new(ReducerConfig::default())
                        .reduce(source, sink, &block_plan, &request)
                        .await
                        .unwrap();
                }
            })
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
