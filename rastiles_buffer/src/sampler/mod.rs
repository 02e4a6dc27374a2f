//! Reconstruction filters reading a buffer at sub-pixel coordinates.
//!
//! A [`Sampler`] owns per-caller state: the buffer handle, the output format,
//! the abyss policy, and a cached window of RGBA f32 pixels that amortizes
//! neighbor lookups across nearby sample points. Samplers are not shared
//! between threads; create one per caller.
//!
//! Pixel centers sit at integer coordinates. All filters read level 0; the
//! `scale` argument only shapes the lohalo footprint (and is the reciprocal
//! of the downscaling factor: sampling a half-size result passes 0.5).

use crate::{Buffer, RepeatMode};
use anyhow::Result;
use rastiles_core::{PixelFormat, PixelRect};

/// Which reconstruction filter a sampler applies.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SamplerKind {
	/// Nearest pixel, one read.
	Nearest,
	/// 2x2 bilinear interpolation.
	#[default]
	Linear,
	/// 4x4 separable Catmull-Rom.
	Cubic,
	/// Minmod-limited bilinear reconstruction; avoids overshoot halos.
	Nohalo,
	/// Elliptical weighted average under downscaling; cubic otherwise.
	Lohalo,
}

impl SamplerKind {
	/// Neighborhood radius read around the sample point.
	fn support(&self, scale: f64) -> i32 {
		match self {
			SamplerKind::Nearest => 0,
			SamplerKind::Linear => 1,
			SamplerKind::Cubic => 2,
			SamplerKind::Nohalo => 2,
			SamplerKind::Lohalo => {
				if scale >= 1.0 {
					2
				} else {
					((1.0 / scale).ceil() as i32 + 1).min(16)
				}
			}
		}
	}
}

/// Margin added around the requested neighborhood when (re)fetching the
/// cached window, so runs of nearby samples hit the same window.
const WINDOW_MARGIN: i32 = 8;

struct Window {
	rect: PixelRect,
	pixels: Vec<[f32; 4]>,
}

pub struct Sampler {
	buffer: Buffer,
	kind: SamplerKind,
	format: PixelFormat,
	repeat: RepeatMode,
	window: Option<Window>,
}

impl Sampler {
	pub fn new(buffer: Buffer, kind: SamplerKind, format: PixelFormat, repeat: RepeatMode) -> Sampler {
		Sampler {
			buffer,
			kind,
			format,
			repeat,
			window: None,
		}
	}

	/// Samples the buffer at `(x, y)` and writes one `format` pixel into
	/// `out`.
	pub fn sample(&mut self, x: f64, y: f64, scale: f64, out: &mut [u8]) -> Result<()> {
		let support = self.kind.support(scale);
		let cx = x.floor() as i32;
		let cy = y.floor() as i32;
		let needed = PixelRect::new(
			cx - support - 1,
			cy - support - 1,
			2 * support + 3,
			2 * support + 3,
		);
		self.ensure_window(needed)?;

		let rgba = match self.kind {
			SamplerKind::Nearest => self.pixel(x.round() as i32, y.round() as i32),
			SamplerKind::Linear => self.sample_linear(x, y),
			SamplerKind::Cubic => self.sample_cubic(x, y),
			SamplerKind::Nohalo => self.sample_nohalo(x, y),
			SamplerKind::Lohalo => {
				if scale >= 1.0 {
					self.sample_cubic(x, y)
				} else {
					self.sample_lohalo(x, y, scale)
				}
			}
		};
		self.format.encode_pixel(rgba, out);
		Ok(())
	}

	fn ensure_window(&mut self, needed: PixelRect) -> Result<()> {
		if let Some(window) = &self.window {
			if window.rect.contains_rect(&needed) {
				return Ok(());
			}
		}
		let rect = PixelRect::new(
			needed.x - WINDOW_MARGIN,
			needed.y - WINDOW_MARGIN,
			needed.width + 2 * WINDOW_MARGIN,
			needed.height + 2 * WINDOW_MARGIN,
		);
		let mut bytes = vec![0u8; rect.area() as usize * 16];
		self
			.buffer
			.get(rect, 0, Some(PixelFormat::RGBA_F32), &mut bytes, None, self.repeat)?;
		let pixels = bytes
			.chunks_exact(4)
			.map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
			.collect::<Vec<f32>>()
			.chunks_exact(4)
			.map(|p| [p[0], p[1], p[2], p[3]])
			.collect();
		self.window = Some(Window { rect, pixels });
		Ok(())
	}

	/// One window pixel; the window always covers the kernel neighborhood.
	fn pixel(&self, x: i32, y: i32) -> [f32; 4] {
		let window = self.window.as_ref().expect("window fetched before sampling");
		let rect = window.rect;
		let cx = x.clamp(rect.x, rect.x2() - 1);
		let cy = y.clamp(rect.y, rect.y2() - 1);
		window.pixels[(cy - rect.y) as usize * rect.width as usize + (cx - rect.x) as usize]
	}

	fn sample_linear(&self, x: f64, y: f64) -> [f32; 4] {
		let ix = x.floor() as i32;
		let iy = y.floor() as i32;
		let fx = (x - ix as f64) as f32;
		let fy = (y - iy as f64) as f32;

		let mut rgba = [0f32; 4];
		for (dx, dy, w) in [
			(0, 0, (1.0 - fx) * (1.0 - fy)),
			(1, 0, fx * (1.0 - fy)),
			(0, 1, (1.0 - fx) * fy),
			(1, 1, fx * fy),
		] {
			let p = self.pixel(ix + dx, iy + dy);
			for (acc, value) in rgba.iter_mut().zip(p) {
				*acc += w * value;
			}
		}
		rgba
	}

	fn sample_cubic(&self, x: f64, y: f64) -> [f32; 4] {
		let ix = x.floor() as i32;
		let iy = y.floor() as i32;
		let fx = (x - ix as f64) as f32;
		let fy = (y - iy as f64) as f32;

		let wx: Vec<f32> = (-1..=2).map(|i| catmull_rom(i as f32 - fx)).collect();
		let wy: Vec<f32> = (-1..=2).map(|j| catmull_rom(j as f32 - fy)).collect();

		let mut rgba = [0f32; 4];
		for (j, wyj) in wy.iter().enumerate() {
			for (i, wxi) in wx.iter().enumerate() {
				let w = wxi * wyj;
				if w == 0.0 {
					continue;
				}
				let p = self.pixel(ix + i as i32 - 1, iy + j as i32 - 1);
				for (acc, value) in rgba.iter_mut().zip(p) {
					*acc += w * value;
				}
			}
		}
		rgba
	}

	/// Level-1 minmod scheme: each of the four surrounding pixels
	/// extrapolates with slope-limited gradients, clamped to its
	/// neighborhood, and the four reconstructions blend bilinearly. The
	/// limiter keeps the result inside the local value range, so edges stay
	/// free of overshoot halos.
	fn sample_nohalo(&self, x: f64, y: f64) -> [f32; 4] {
		let ix = x.floor() as i32;
		let iy = y.floor() as i32;
		let fx = (x - ix as f64) as f32;
		let fy = (y - iy as f64) as f32;

		let mut rgba = [0f32; 4];
		for (dx, dy, w) in [
			(0, 0, (1.0 - fx) * (1.0 - fy)),
			(1, 0, fx * (1.0 - fy)),
			(0, 1, (1.0 - fx) * fy),
			(1, 1, fx * fy),
		] {
			if w == 0.0 {
				continue;
			}
			let px = ix + dx;
			let py = iy + dy;
			let center = self.pixel(px, py);
			let left = self.pixel(px - 1, py);
			let right = self.pixel(px + 1, py);
			let up = self.pixel(px, py - 1);
			let down = self.pixel(px, py + 1);

			let off_x = (x - px as f64) as f32;
			let off_y = (y - py as f64) as f32;
			for c in 0..4 {
				let slope_x = minmod(right[c] - center[c], center[c] - left[c]);
				let slope_y = minmod(down[c] - center[c], center[c] - up[c]);
				let value = center[c] + slope_x * off_x + slope_y * off_y;
				let lo = center[c].min(left[c]).min(right[c]).min(up[c]).min(down[c]);
				let hi = center[c].max(left[c]).max(right[c]).max(up[c]).max(down[c]);
				rgba[c] += w * value.clamp(lo, hi);
			}
		}
		rgba
	}

	/// Circular weighted average whose radius follows the reciprocal scale,
	/// with a tent profile. Every source pixel under the footprint
	/// contributes, so downscaling picks up no aliasing halos.
	fn sample_lohalo(&self, x: f64, y: f64, scale: f64) -> [f32; 4] {
		let radius = (1.0 / scale).max(1.0);
		let reach = radius.ceil() as i32;
		let cx = x.floor() as i32;
		let cy = y.floor() as i32;

		let mut rgba = [0f32; 4];
		let mut total = 0f32;
		for dy in -reach..=reach {
			for dx in -reach..=reach {
				let px = cx + dx;
				let py = cy + dy;
				let dist = ((px as f64 - x).powi(2) + (py as f64 - y).powi(2)).sqrt();
				let w = (1.0 - dist / radius).max(0.0) as f32;
				if w == 0.0 {
					continue;
				}
				let p = self.pixel(px, py);
				for (acc, value) in rgba.iter_mut().zip(p) {
					*acc += w * value;
				}
				total += w;
			}
		}
		if total > 0.0 {
			for acc in &mut rgba {
				*acc /= total;
			}
		}
		rgba
	}
}

/// Catmull-Rom weight (cubic with b = 0, c = 0.5).
fn catmull_rom(x: f32) -> f32 {
	let x = x.abs();
	if x < 1.0 {
		1.5 * x * x * x - 2.5 * x * x + 1.0
	} else if x < 2.0 {
		-0.5 * x * x * x + 2.5 * x * x - 4.0 * x + 2.0
	} else {
		0.0
	}
}

/// Slope limiter: zero across extrema, the smaller slope elsewhere.
fn minmod(a: f32, b: f32) -> f32 {
	if a * b <= 0.0 {
		0.0
	} else if a.abs() < b.abs() {
		a
	} else {
		b
	}
}

impl Buffer {
	/// One-shot sampling; callers looping over many points should hold a
	/// [`Sampler`] to reuse its window.
	pub fn sample(
		&self,
		x: f64,
		y: f64,
		scale: f64,
		format: PixelFormat,
		repeat: RepeatMode,
		kind: SamplerKind,
		out: &mut [u8],
	) -> Result<()> {
		Sampler::new(self.clone(), kind, format, repeat).sample(x, y, scale, out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rastiles_core::PixelRect;

	/// A 16x16 gray f32 buffer whose value at (x, y) is x.
	fn ramp_buffer() -> Buffer {
		let buffer = Buffer::new(PixelRect::new(0, 0, 16, 16), PixelFormat::GRAY_F32).unwrap();
		for y in 0..16 {
			for x in 0..16 {
				buffer
					.set_pixel(x, y, PixelFormat::GRAY_F32, &(x as f32).to_le_bytes())
					.unwrap();
			}
		}
		buffer
	}

	/// Samples and returns the red channel; the ramp replicates gray into
	/// RGB, so red carries the value without a luma round trip.
	fn sample_gray(sampler: &mut Sampler, x: f64, y: f64, scale: f64) -> f32 {
		let mut out = [0u8; 16];
		sampler.sample(x, y, scale, &mut out).unwrap();
		PixelFormat::RGBA_F32.decode_pixel(&out)[0]
	}

	#[test]
	fn nearest_picks_the_containing_pixel() {
		let mut sampler = Sampler::new(
			ramp_buffer(),
			SamplerKind::Nearest,
			PixelFormat::RGBA_F32,
			RepeatMode::None,
		);
		assert_eq!(sample_gray(&mut sampler, 5.0, 5.0, 1.0), 5.0);
		assert_eq!(sample_gray(&mut sampler, 5.4, 5.0, 1.0), 5.0);
		assert_eq!(sample_gray(&mut sampler, 5.9, 5.0, 1.0), 6.0);
	}

	#[test]
	fn linear_interpolates_the_ramp_exactly() {
		let mut sampler = Sampler::new(
			ramp_buffer(),
			SamplerKind::Linear,
			PixelFormat::RGBA_F32,
			RepeatMode::None,
		);
		assert!((sample_gray(&mut sampler, 5.5, 5.0, 1.0) - 5.5).abs() < 1e-5);
		assert!((sample_gray(&mut sampler, 7.25, 8.75, 1.0) - 7.25).abs() < 1e-5);
	}

	#[test]
	fn cubic_is_exact_on_linear_data_and_at_pixel_centers() {
		let mut sampler = Sampler::new(
			ramp_buffer(),
			SamplerKind::Cubic,
			PixelFormat::RGBA_F32,
			RepeatMode::None,
		);
		assert!((sample_gray(&mut sampler, 5.0, 5.0, 1.0) - 5.0).abs() < 1e-5);
		// Catmull-Rom reproduces linear ramps
		assert!((sample_gray(&mut sampler, 5.5, 5.0, 1.0) - 5.5).abs() < 1e-4);
	}

	#[test]
	fn nohalo_stays_inside_the_local_value_range() {
		// step edge: 0 left of x=8, 1 from x=8 on
		let buffer = Buffer::new(PixelRect::new(0, 0, 16, 16), PixelFormat::GRAY_F32).unwrap();
		for y in 0..16 {
			for x in 0..16 {
				let v: f32 = if x >= 8 { 1.0 } else { 0.0 };
				buffer.set_pixel(x, y, PixelFormat::GRAY_F32, &v.to_le_bytes()).unwrap();
			}
		}
		let mut sampler = Sampler::new(buffer, SamplerKind::Nohalo, PixelFormat::RGBA_F32, RepeatMode::None);
		for step in 0..20 {
			let x = 6.0 + step as f64 * 0.2;
			let v = sample_gray(&mut sampler, x, 8.0, 1.0);
			assert!((0.0..=1.0).contains(&v), "overshoot at {x}: {v}");
		}
	}

	#[test]
	fn lohalo_averages_under_downscaling() {
		let mut sampler = Sampler::new(
			ramp_buffer(),
			SamplerKind::Lohalo,
			PixelFormat::RGBA_F32,
			RepeatMode::Clamp,
		);
		// footprint centered on the ramp averages back to its center
		let v = sample_gray(&mut sampler, 8.0, 8.0, 0.25);
		assert!((v - 8.0).abs() < 0.5, "got {v}");
	}

	#[test]
	fn sampling_honors_the_abyss_policy() {
		let buffer = Buffer::new(PixelRect::new(0, 0, 4, 4), PixelFormat::RGBA_F32).unwrap();
		buffer
			.set_color(PixelRect::new(0, 0, 4, 4), PixelFormat::RGBA_F32, &encode([0.5, 0.5, 0.5, 1.0]))
			.unwrap();

		let mut out = [0u8; 16];
		buffer
			.sample(100.0, 100.0, 1.0, PixelFormat::RGBA_F32, RepeatMode::Black, SamplerKind::Linear, &mut out)
			.unwrap();
		let rgba = PixelFormat::RGBA_F32.decode_pixel(&out);
		assert_eq!(rgba, [0.0, 0.0, 0.0, 1.0]);

		buffer
			.sample(100.0, 100.0, 1.0, PixelFormat::RGBA_F32, RepeatMode::Clamp, SamplerKind::Linear, &mut out)
			.unwrap();
		let rgba = PixelFormat::RGBA_F32.decode_pixel(&out);
		assert!((rgba[0] - 0.5).abs() < 1e-5);
	}

	fn encode(rgba: [f32; 4]) -> [u8; 16] {
		let mut out = [0u8; 16];
		PixelFormat::RGBA_F32.encode_pixel(rgba, &mut out);
		out
	}
}
