use std::hint::black_box;

use clipsearch::db::FeatureRecord;
use clipsearch::error::StoreError;
use clipsearch::feature::StorageType;
use clipsearch::scanner::{Scanner, top_n_indices};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use futures::executor::block_on;
use futures::stream;
use rand::prelude::*;

const DIM: usize = 512;
const COUNT: usize = 20_000;

fn random_vector(rng: &mut impl Rng) -> Vec<f32> {
    (0..DIM).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("Scan");
    let mut rng = rand::rng();
    let query = random_vector(&mut rng);

    for storage in [StorageType::Float32, StorageType::Float16] {
        let records = (0..COUNT)
            .map(|i| FeatureRecord {
                filename: format!("{}.jpg", i),
                feature: storage.encode(&random_vector(&mut rng)),
            })
            .collect::<Vec<_>>();

        group.throughput(Throughput::Elements(COUNT as u64));
        for batch_size in [256, 8192] {
            let scanner = Scanner::new(DIM, storage, batch_size);
            group.bench_with_input(
                BenchmarkId::new(storage.as_str(), batch_size),
                &batch_size,
                |b, _| {
                    b.iter(|| {
                        let items = records.iter().cloned().map(Ok::<_, StoreError>);
                        block_on(scanner.scan(&query, stream::iter(items), black_box(20))).unwrap()
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_top_n(c: &mut Criterion) {
    let mut rng = rand::rng();
    let scores = (0..1_000_000).map(|_| rng.random::<f32>()).collect::<Vec<_>>();
    c.bench_function("top_n_indices", |b| b.iter(|| top_n_indices(&scores, black_box(100))));
}

criterion_group!(benches, bench_scan, bench_top_n);
criterion_main!(benches);
