// SPDX-License-Identifier: Apache-2.0

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use omics_portal_model::{bin_size_for_width, GenomicRange, Table, DEFAULT_RESOLUTION_FACTOR};
use serde_json::json;

fn bench_region_parse(c: &mut Criterion) {
    c.bench_function("region_parse_separators", |b| {
        b.iter(|| GenomicRange::parse(black_box("chr1:1,000,000-2,500,000")).expect("region"))
    });
}

fn bench_bin_size(c: &mut Criterion) {
    c.bench_function("bin_size_for_width", |b| {
        b.iter(|| bin_size_for_width(black_box(1_234_567), DEFAULT_RESOLUTION_FACTOR))
    });
}

fn bench_column_table(c: &mut Criterion) {
    let positions: Vec<u64> = (0..500).map(|i| i * 2000).collect();
    let values: Vec<f64> = (0..500).map(|i| f64::from(i) * 0.01).collect();
    let payload = json!({"position": positions, "value": values});
    c.bench_function("column_table_500_bins", |b| {
        b.iter(|| Table::from_value(black_box(payload.clone())).expect("table"))
    });
}

criterion_group!(benches, bench_region_parse, bench_bin_size, bench_column_table);
criterion_main!(benches);
