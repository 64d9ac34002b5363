//! Benchmarks pour la réparation des libellés et la lecture GeoJSON

use std::ops::ControlFlow;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

const LABELS: &[&str] = &[
    "Chêne décidu pur",
    "ChÃªne dÃ©cidu pur",
    "Forêt fermée à mélange de feuillus",
    "ForÃªt fermÃ©e Ã  mÃ©lange de feuillus",
    "Pin maritime",
    "ChÃƒÂªne",
];

fn bench_repair(c: &mut Criterion) {
    let bytes: usize = LABELS.iter().map(|l| l.len()).sum();

    let mut group = c.benchmark_group("repair_text");
    group.throughput(Throughput::Bytes(bytes as u64));
    group.bench_function("mixed_labels", |b| {
        b.iter(|| {
            for label in LABELS {
                black_box(geosource::repair_text(black_box(label)));
            }
        })
    });
    group.finish();
}

fn build_collection(n: usize) -> String {
    let features: Vec<String> = (0..n)
        .map(|i| {
            let x = 2.0 + i as f64 * 0.001;
            format!(
                r#"{{"type":"Feature","geometry":{{"type":"Polygon","coordinates":[[[{x},48.0],[{x1},48.0],[{x1},48.001],[{x},48.0]]]}},"properties":{{"idu":"75056000AB{i:04}","section":"AB"}}}}"#,
                x1 = x + 0.0005
            )
        })
        .collect();
    format!(r#"{{"type":"FeatureCollection","features":[{}]}}"#, features.join(","))
}

fn bench_stream_geojson(c: &mut Criterion) {
    let collection = build_collection(5_000);

    let mut group = c.benchmark_group("stream_geojson");
    group.throughput(Throughput::Bytes(collection.len() as u64));
    group.bench_function("5000_features", |b| {
        b.iter(|| {
            let stats = geosource::reader::geojson::stream_features(
                black_box(collection.as_bytes()),
                "bench",
                &mut |f| {
                    black_box(f);
                    ControlFlow::Continue(())
                },
            )
            .unwrap();
            black_box(stats)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_repair, bench_stream_geojson);
criterion_main!(benches);
