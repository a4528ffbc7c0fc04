//! Benchmarks for index evaluation and classification

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use aquasat_algorithms::imagery::{classify, compute_index, Expr, QualityThresholds, WaterMask};
use aquasat_core::{BandStack, GeoTransform, Raster};

fn create_band(size: usize, base: f64) -> Raster<f64> {
    let mut r = Raster::new(size, size);
    r.set_transform(GeoTransform::new(0.0, size as f64 * 0.001, 0.001, -0.001));
    for row in 0..size {
        for col in 0..size {
            let v = base + ((row * 7 + col * 13) % 200) as f64 / 1000.0;
            r.set(row, col, v).unwrap();
        }
    }
    r
}

fn sentinel2_stack(size: usize) -> BandStack {
    let mut stack = BandStack::new();
    for (name, base) in [
        ("red", 0.05),
        ("green", 0.08),
        ("nir", 0.04),
        ("red_edge1", 0.06),
        ("red_edge3", 0.07),
    ] {
        stack.insert(name, create_band(size, base)).unwrap();
    }
    stack
}

fn bench_ndwi(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/ndwi");
    let ndwi = Expr::nd(Expr::band("green"), Expr::band("nir"));
    for size in [256, 512, 1024, 2048] {
        let stack = sentinel2_stack(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| compute_index(black_box(&stack), black_box(&ndwi)).unwrap())
        });
    }
    group.finish();
}

fn bench_algal_blend(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/algal_blend");
    let formula = Expr::parse(
        "0.5 * nd(red_edge1, red) + 0.3 * (red_edge3 / red_edge1 - 1) \
         + 0.2 * ((red_edge1 - red) - 0.2 * (red_edge1 - green)) * (red_edge1 / red)",
    )
    .unwrap();
    for size in [256, 512, 1024] {
        let stack = sentinel2_stack(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| compute_index(black_box(&stack), black_box(&formula)).unwrap())
        });
    }
    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/classify");
    let thresholds = QualityThresholds::default();
    for size in [512, 2048] {
        let index = create_band(size, -0.05);
        let mask = WaterMask::from_index(&index, thresholds.water);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| classify(black_box(&index), &mask, None, &thresholds).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ndwi, bench_algal_blend, bench_classify);
criterion_main!(benches);
