//! Benchmarks for the hot paths: cached tile reads, rectangle writes, and
//! sub-pixel sampling.

use criterion::{Criterion, criterion_group, criterion_main};
use rastiles_buffer::{Buffer, BufferOptions, RepeatMode, Sampler, SamplerKind};
use rastiles_core::{PixelFormat, PixelRect, TileSize};
use std::hint::black_box;

fn bench_buffer(c: &mut Criterion) {
	let buffer = Buffer::with_options(BufferOptions {
		extent: Some(PixelRect::new(0, 0, 1024, 1024)),
		format: Some(PixelFormat::RGBA_U8),
		tile_size: Some(TileSize::new(128, 64)),
		..BufferOptions::default()
	})
	.unwrap();
	let pixels = vec![128u8; 256 * 256 * 4];
	buffer
		.set(PixelRect::new(0, 0, 256, 256), 0, None, &pixels, None)
		.unwrap();

	let mut read = vec![0u8; 256 * 256 * 4];
	c.bench_function("get_256x256_cached", |b| {
		b.iter(|| {
			buffer
				.get(
					black_box(PixelRect::new(0, 0, 256, 256)),
					0,
					None,
					&mut read,
					None,
					RepeatMode::None,
				)
				.unwrap();
		});
	});

	c.bench_function("set_256x256", |b| {
		b.iter(|| {
			buffer
				.set(black_box(PixelRect::new(0, 0, 256, 256)), 0, None, &pixels, None)
				.unwrap();
		});
	});

	c.bench_function("get_pixel_hot_tile", |b| {
		let mut pixel = [0u8; 4];
		b.iter(|| {
			buffer
				.get_pixel(black_box(100), black_box(100), PixelFormat::RGBA_U8, &mut pixel, RepeatMode::None)
				.unwrap();
		});
	});

	c.bench_function("sample_linear", |b| {
		let mut sampler = Sampler::new(buffer.clone(), SamplerKind::Linear, PixelFormat::RGBA_U8, RepeatMode::Clamp);
		let mut out = [0u8; 4];
		let mut t = 0.0f64;
		b.iter(|| {
			t += 0.37;
			let x = 10.0 + (t % 200.0);
			sampler.sample(black_box(x), black_box(x * 0.5), 1.0, &mut out).unwrap();
		});
	});
}

criterion_group!(benches, bench_buffer);
criterion_main!(benches);
