// SPDX-License-Identifier: MIT OR Apache-2.0
//! Benchmarks for the local validator lane across a few representative
//! image sizes.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use image::{DynamicImage, Rgb, RgbImage};
use imgpipe_config::PipelineConfig;
use imgpipe_core::{SceneType, Stage};
use imgpipe_store::StructuralMaskCache;

use imgpipe_validate::run_local_validators;

fn checkerboard(size: u32, seed: u8) -> Vec<u8> {
    let mut img = RgbImage::new(size, size);
    for (x, y, px) in img.enumerate_pixels_mut() {
        let on = ((x / 8) + (y / 8) + u32::from(seed)) % 2 == 0;
        *px = if on { Rgb([220, 220, 220]) } else { Rgb([30, 30, 30]) };
    }
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn bench_run_local_validators(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("run_local_validators");
    let config = PipelineConfig::default();

    for size in [64u32, 256, 512] {
        let baseline = checkerboard(size, 0);
        let candidate = checkerboard(size, 1);
        let cache = StructuralMaskCache::new();
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                rt.block_on(run_local_validators(
                    black_box(&baseline),
                    black_box(&candidate),
                    black_box(Stage::OneB),
                    black_box(SceneType::Interior),
                    black_box(&config),
                    black_box(&cache),
                ))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_run_local_validators);
criterion_main!(benches);
