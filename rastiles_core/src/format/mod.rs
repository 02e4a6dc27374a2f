//! Pixel format descriptions and on-demand conversion between them.
//!
//! A [`PixelFormat`] pairs a [`ColorModel`] (which channels exist) with a
//! [`ChannelKind`] (how each channel is encoded). Conversion between any two
//! formats goes through a normalized RGBA `f32` intermediate: integer channels
//! map linearly onto `[0.0, 1.0]`, gray decodes by replicating the value into
//! RGB, and encoding to gray takes Rec.709 luma.
//!
//! Two formats are *storage compatible* when their `bytes_per_pixel()` agree;
//! a buffer may present such a format as its soft format while the tiles stay
//! in the storage format.
//!
//! # Examples
//!
//! ```
//! use rastiles_core::{PixelFormat, convert_span};
//!
//! let src = [255u8, 0, 0, 255]; // one RGBA u8 pixel, pure red
//! let mut dst = vec![0u8; 16];
//! convert_span(PixelFormat::RGBA_U8, &src, PixelFormat::RGBA_F32, &mut dst, 1).unwrap();
//! assert_eq!(PixelFormat::RGBA_F32.decode_pixel(&dst), [1.0, 0.0, 0.0, 1.0]);
//! ```

use anyhow::{Result, bail, ensure};
use std::fmt::{self, Debug};

/// Rec.709 luma coefficients, used when collapsing RGB to gray.
const LUMA_R: f32 = 0.2126;
const LUMA_G: f32 = 0.7152;
const LUMA_B: f32 = 0.0722;

/// Which channels a pixel carries.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ColorModel {
	Gray,
	GrayAlpha,
	Rgb,
	Rgba,
}

impl ColorModel {
	pub fn channels(&self) -> usize {
		match self {
			ColorModel::Gray => 1,
			ColorModel::GrayAlpha => 2,
			ColorModel::Rgb => 3,
			ColorModel::Rgba => 4,
		}
	}

	pub fn has_alpha(&self) -> bool {
		matches!(self, ColorModel::GrayAlpha | ColorModel::Rgba)
	}
}

/// How one channel is encoded.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ChannelKind {
	U8,
	U16,
	F32,
}

impl ChannelKind {
	pub fn bytes(&self) -> usize {
		match self {
			ChannelKind::U8 => 1,
			ChannelKind::U16 => 2,
			ChannelKind::F32 => 4,
		}
	}
}

/// A pixel encoding: color model plus channel kind.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct PixelFormat {
	pub model: ColorModel,
	pub channel: ChannelKind,
}

impl PixelFormat {
	pub const GRAY_U8: PixelFormat = PixelFormat::new(ColorModel::Gray, ChannelKind::U8);
	pub const GRAY_F32: PixelFormat = PixelFormat::new(ColorModel::Gray, ChannelKind::F32);
	pub const RGB_U8: PixelFormat = PixelFormat::new(ColorModel::Rgb, ChannelKind::U8);
	pub const RGBA_U8: PixelFormat = PixelFormat::new(ColorModel::Rgba, ChannelKind::U8);
	pub const RGBA_U16: PixelFormat = PixelFormat::new(ColorModel::Rgba, ChannelKind::U16);
	pub const RGBA_F32: PixelFormat = PixelFormat::new(ColorModel::Rgba, ChannelKind::F32);

	pub const fn new(model: ColorModel, channel: ChannelKind) -> PixelFormat {
		PixelFormat { model, channel }
	}

	pub fn channels(&self) -> usize {
		self.model.channels()
	}

	pub fn bytes_per_channel(&self) -> usize {
		self.channel.bytes()
	}

	pub fn bytes_per_pixel(&self) -> usize {
		self.channels() * self.bytes_per_channel()
	}

	pub fn has_alpha(&self) -> bool {
		self.model.has_alpha()
	}

	/// Whether a buffer may present `other` on top of tiles stored in `self`.
	pub fn storage_compatible(&self, other: &PixelFormat) -> bool {
		self.bytes_per_pixel() == other.bytes_per_pixel()
	}

	/// One-byte encoding used by the swap-file header.
	pub fn descriptor(&self) -> u8 {
		let model = match self.model {
			ColorModel::Gray => 0x0,
			ColorModel::GrayAlpha => 0x1,
			ColorModel::Rgb => 0x2,
			ColorModel::Rgba => 0x3,
		};
		let channel = match self.channel {
			ChannelKind::U8 => 0x0,
			ChannelKind::U16 => 0x1,
			ChannelKind::F32 => 0x2,
		};
		(model << 4) | channel
	}

	pub fn from_descriptor(value: u8) -> Result<PixelFormat> {
		let model = match value >> 4 {
			0x0 => ColorModel::Gray,
			0x1 => ColorModel::GrayAlpha,
			0x2 => ColorModel::Rgb,
			0x3 => ColorModel::Rgba,
			v => bail!("unknown color model value: {v}"),
		};
		let channel = match value & 0x0F {
			0x0 => ChannelKind::U8,
			0x1 => ChannelKind::U16,
			0x2 => ChannelKind::F32,
			v => bail!("unknown channel kind value: {v}"),
		};
		Ok(PixelFormat::new(model, channel))
	}

	/// Decodes one pixel at the start of `src` into normalized RGBA.
	///
	/// Gray replicates into RGB; missing alpha decodes as 1.0.
	pub fn decode_pixel(&self, src: &[u8]) -> [f32; 4] {
		let mut ch = [0f32; 4];
		let n = self.channels();
		for (i, slot) in ch.iter_mut().enumerate().take(n) {
			let off = i * self.bytes_per_channel();
			*slot = match self.channel {
				ChannelKind::U8 => src[off] as f32 / 255.0,
				ChannelKind::U16 => u16::from_le_bytes([src[off], src[off + 1]]) as f32 / 65535.0,
				ChannelKind::F32 => f32::from_le_bytes([src[off], src[off + 1], src[off + 2], src[off + 3]]),
			};
		}
		match self.model {
			ColorModel::Gray => [ch[0], ch[0], ch[0], 1.0],
			ColorModel::GrayAlpha => [ch[0], ch[0], ch[0], ch[1]],
			ColorModel::Rgb => [ch[0], ch[1], ch[2], 1.0],
			ColorModel::Rgba => ch,
		}
	}

	/// Encodes a normalized RGBA pixel into the start of `dst`.
	pub fn encode_pixel(&self, rgba: [f32; 4], dst: &mut [u8]) {
		let mut ch = [0f32; 4];
		let n = self.channels();
		match self.model {
			ColorModel::Gray => ch[0] = luma(rgba),
			ColorModel::GrayAlpha => {
				ch[0] = luma(rgba);
				ch[1] = rgba[3];
			}
			ColorModel::Rgb => ch[..3].copy_from_slice(&rgba[..3]),
			ColorModel::Rgba => ch = rgba,
		}
		for (i, value) in ch.iter().enumerate().take(n) {
			let off = i * self.bytes_per_channel();
			match self.channel {
				ChannelKind::U8 => dst[off] = (value.clamp(0.0, 1.0) * 255.0 + 0.5) as u8,
				ChannelKind::U16 => {
					let v = (value.clamp(0.0, 1.0) * 65535.0 + 0.5) as u16;
					dst[off..off + 2].copy_from_slice(&v.to_le_bytes());
				}
				ChannelKind::F32 => dst[off..off + 4].copy_from_slice(&value.to_le_bytes()),
			}
		}
	}
}

fn luma(rgba: [f32; 4]) -> f32 {
	rgba[0] * LUMA_R + rgba[1] * LUMA_G + rgba[2] * LUMA_B
}

impl Debug for PixelFormat {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!("{:?}:{:?}", &self.model, &self.channel))
	}
}

/// Converts `pixel_count` pixels from `src_format` in `src` to `dst_format`
/// in `dst`. Identical formats degrade to a copy.
pub fn convert_span(
	src_format: PixelFormat,
	src: &[u8],
	dst_format: PixelFormat,
	dst: &mut [u8],
	pixel_count: usize,
) -> Result<()> {
	let src_len = pixel_count * src_format.bytes_per_pixel();
	let dst_len = pixel_count * dst_format.bytes_per_pixel();
	ensure!(
		src.len() >= src_len,
		"source span too short: {} < {src_len} bytes",
		src.len()
	);
	ensure!(
		dst.len() >= dst_len,
		"destination span too short: {} < {dst_len} bytes",
		dst.len()
	);

	if src_format == dst_format {
		dst[..dst_len].copy_from_slice(&src[..src_len]);
		return Ok(());
	}

	let sbpp = src_format.bytes_per_pixel();
	let dbpp = dst_format.bytes_per_pixel();
	for i in 0..pixel_count {
		let rgba = src_format.decode_pixel(&src[i * sbpp..]);
		dst_format.encode_pixel(rgba, &mut dst[i * dbpp..]);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[test]
	fn sizes_and_compatibility() {
		assert_eq!(PixelFormat::RGBA_F32.bytes_per_pixel(), 16);
		assert_eq!(PixelFormat::RGBA_U8.bytes_per_pixel(), 4);
		assert_eq!(PixelFormat::GRAY_U8.bytes_per_pixel(), 1);
		// rgba u8 and gray f32 are both 4 bytes per pixel
		assert!(PixelFormat::RGBA_U8.storage_compatible(&PixelFormat::GRAY_F32));
		assert!(!PixelFormat::RGBA_U8.storage_compatible(&PixelFormat::RGBA_F32));
	}

	#[rstest]
	#[case(PixelFormat::GRAY_U8)]
	#[case(PixelFormat::GRAY_F32)]
	#[case(PixelFormat::RGB_U8)]
	#[case(PixelFormat::RGBA_U8)]
	#[case(PixelFormat::RGBA_U16)]
	#[case(PixelFormat::RGBA_F32)]
	fn descriptor_round_trip(#[case] format: PixelFormat) {
		assert_eq!(PixelFormat::from_descriptor(format.descriptor()).unwrap(), format);
	}

	#[test]
	fn descriptor_rejects_garbage() {
		assert!(PixelFormat::from_descriptor(0xFF).is_err());
	}

	#[test]
	fn u8_to_f32_is_exact_for_full_and_zero() {
		let src = [0u8, 128, 255, 255];
		let mut dst = vec![0u8; 16];
		convert_span(PixelFormat::RGBA_U8, &src, PixelFormat::RGBA_F32, &mut dst, 1).unwrap();
		let p = PixelFormat::RGBA_F32.decode_pixel(&dst);
		assert_eq!(p[0], 0.0);
		assert!((p[1] - 128.0 / 255.0).abs() < 1e-6);
		assert_eq!(p[2], 1.0);
		assert_eq!(p[3], 1.0);
	}

	#[test]
	fn f32_to_u8_rounds_to_nearest() {
		let mut src = vec![0u8; 16];
		PixelFormat::RGBA_F32.encode_pixel([0.5, 1.5, -0.25, 1.0], &mut src);
		let mut dst = vec![0u8; 4];
		convert_span(PixelFormat::RGBA_F32, &src, PixelFormat::RGBA_U8, &mut dst, 1).unwrap();
		assert_eq!(dst, [128, 255, 0, 255]);
	}

	#[test]
	fn gray_decodes_by_replication_and_encodes_by_luma() {
		let gray = [100u8];
		let rgba = PixelFormat::GRAY_U8.decode_pixel(&gray);
		assert_eq!(rgba[0], rgba[1]);
		assert_eq!(rgba[1], rgba[2]);
		assert_eq!(rgba[3], 1.0);

		let mut out = [0u8; 1];
		PixelFormat::GRAY_U8.encode_pixel([1.0, 1.0, 1.0, 1.0], &mut out);
		assert_eq!(out[0], 255);
		PixelFormat::GRAY_U8.encode_pixel([0.0, 1.0, 0.0, 1.0], &mut out);
		// pure green collapses to its Rec.709 luma
		assert_eq!(out[0], (0.7152f32 * 255.0 + 0.5) as u8);
	}

	#[test]
	fn same_format_conversion_is_a_copy() {
		let src: Vec<u8> = (0..32).collect();
		let mut dst = vec![0u8; 32];
		convert_span(PixelFormat::RGBA_U8, &src, PixelFormat::RGBA_U8, &mut dst, 8).unwrap();
		assert_eq!(src, dst);
	}

	#[test]
	fn span_length_is_checked() {
		let src = [0u8; 4];
		let mut dst = [0u8; 4];
		assert!(convert_span(PixelFormat::RGBA_U8, &src, PixelFormat::RGBA_U8, &mut dst, 2).is_err());
	}
}
