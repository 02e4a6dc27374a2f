//! Pixel access: reading, writing, filling, clearing and copying rectangles
//! of a buffer.
//!
//! Requests are decomposed into per-tile spans by the storage's tile
//! iterator. Writes lock each touched tile (copy-on-write on shared
//! payloads), re-announce it to the chain, and emit `changed` once the locks
//! are released. Reads clip to the abyss and fill the remainder according to
//! the caller's [`RepeatMode`].

use super::{Buffer, RepeatMode};
use anyhow::{Context, Result, ensure};
use rastiles_core::{PixelFormat, PixelRect, TileAddress, convert_span};

/// Largest bytes-per-pixel of any supported format (RGBA f32).
const MAX_BPP: usize = 16;

impl Buffer {
	/// Reads `rect` pixels at `level` into `dst`, converting to `format`
	/// (the soft format when `None`). `stride` is the destination row pitch
	/// in bytes, defaulting to a packed layout. Pixels outside the abyss are
	/// produced per `repeat`.
	pub fn get(
		&self,
		rect: PixelRect,
		level: u8,
		format: Option<PixelFormat>,
		dst: &mut [u8],
		stride: Option<usize>,
		repeat: RepeatMode,
	) -> Result<()> {
		if rect.is_empty() {
			return Ok(());
		}
		let out_format = format.unwrap_or_else(|| self.format());
		let interpret = self.format();
		let out_bpp = out_format.bytes_per_pixel();
		let in_bpp = interpret.bytes_per_pixel();
		let row_bytes = rect.width as usize * out_bpp;
		let stride = stride.unwrap_or(row_bytes);
		ensure!(stride >= row_bytes, "stride {stride} is below the row width {row_bytes}");
		let needed = (rect.height as usize - 1) * stride + row_bytes;
		ensure!(
			dst.len() >= needed,
			"destination holds {} bytes, request needs {needed}",
			dst.len()
		);

		let (shift_x, shift_y) = self.shift();
		let (shift_x, shift_y) = (shift_x >> level, shift_y >> level);
		let abyss = self.abyss().scaled_down(level);
		let defined = rect.intersection(&abyss);

		if !defined.is_empty() {
			let tile_size = self.tile_size();
			let storage_rect = defined.translated(shift_x, shift_y);
			for (address, span) in self.storage().tile_iter(storage_rect, level) {
				let tile = self.storage().get_tile(address)?;
				let data = tile.read();
				let tile_rect = address.pixel_rect(tile_size);
				for row in 0..span.height {
					let t_off = ((span.y - tile_rect.y + row) as usize * tile_size.width as usize
						+ (span.x - tile_rect.x) as usize)
						* in_bpp;
					let d_off = (span.y + row - shift_y - rect.y) as usize * stride
						+ (span.x - shift_x - rect.x) as usize * out_bpp;
					convert_span(
						interpret,
						&data[t_off..],
						out_format,
						&mut dst[d_off..],
						span.width as usize,
					)?;
				}
			}
		}

		if defined == rect || repeat == RepeatMode::None {
			return Ok(());
		}
		self.fill_abyss(rect, level, abyss, defined, out_format, dst, stride, repeat)
	}

	/// Fills the part of `rect` outside `defined` according to `repeat`.
	#[allow(clippy::too_many_arguments)]
	fn fill_abyss(
		&self,
		rect: PixelRect,
		level: u8,
		abyss: PixelRect,
		defined: PixelRect,
		out_format: PixelFormat,
		dst: &mut [u8],
		stride: usize,
		repeat: RepeatMode,
	) -> Result<()> {
		let out_bpp = out_format.bytes_per_pixel();

		// constant fills; Clamp and Loop with an empty abyss have no source
		// pixel and degrade to transparent zero
		let mut constant = [0u8; MAX_BPP];
		let use_constant = match repeat {
			RepeatMode::Black => {
				out_format.encode_pixel([0.0, 0.0, 0.0, 1.0], &mut constant);
				true
			}
			RepeatMode::White => {
				out_format.encode_pixel([1.0, 1.0, 1.0, 1.0], &mut constant);
				true
			}
			RepeatMode::Clamp | RepeatMode::Loop if abyss.is_empty() => {
				out_format.encode_pixel([0.0, 0.0, 0.0, 0.0], &mut constant);
				true
			}
			_ => false,
		};

		let mut pixel = [0u8; MAX_BPP];
		for vy in rect.y..rect.y2() {
			let in_defined_rows = !defined.is_empty() && vy >= defined.y && vy < defined.y2();
			let spans: [(i32, i32); 2] = if in_defined_rows {
				[(rect.x, defined.x), (defined.x2(), rect.x2())]
			} else {
				[(rect.x, rect.x2()), (0, 0)]
			};
			for (from, to) in spans {
				for vx in from..to {
					let d_off = (vy - rect.y) as usize * stride + (vx - rect.x) as usize * out_bpp;
					if use_constant {
						dst[d_off..d_off + out_bpp].copy_from_slice(&constant[..out_bpp]);
						continue;
					}
					let (sx, sy) = match repeat {
						RepeatMode::Clamp => (
							vx.clamp(abyss.x, abyss.x2() - 1),
							vy.clamp(abyss.y, abyss.y2() - 1),
						),
						RepeatMode::Loop => (
							abyss.x + (vx - abyss.x).rem_euclid(abyss.width),
							abyss.y + (vy - abyss.y).rem_euclid(abyss.height),
						),
						_ => unreachable!("constant modes are handled above"),
					};
					self.read_view_pixel(sx, sy, level, out_format, &mut pixel)?;
					dst[d_off..d_off + out_bpp].copy_from_slice(&pixel[..out_bpp]);
				}
			}
		}
		Ok(())
	}

	/// Reads one view pixel (assumed inside the abyss) into `out`. The
	/// storage's hot-tile slot amortizes runs of neighboring reads.
	fn read_view_pixel(
		&self,
		vx: i32,
		vy: i32,
		level: u8,
		out_format: PixelFormat,
		out: &mut [u8],
	) -> Result<()> {
		let (shift_x, shift_y) = self.shift();
		let px = vx + (shift_x >> level);
		let py = vy + (shift_y >> level);
		let tile_size = self.tile_size();
		let interpret = self.format();

		let address = TileAddress::for_pixel(px, py, level, tile_size);
		let tile = self.storage().get_tile(address)?;
		let data = tile.read();
		let tile_rect = address.pixel_rect(tile_size);
		let offset = ((py - tile_rect.y) as usize * tile_size.width as usize + (px - tile_rect.x) as usize)
			* interpret.bytes_per_pixel();
		convert_span(interpret, &data[offset..], out_format, out, 1)
	}

	/// Writes `rect` pixels at `level` from `src`, converting from `format`
	/// (the soft format when `None`). Writes outside the abyss are dropped.
	/// Emits `changed` after all touched tiles are unlocked.
	pub fn set(
		&self,
		rect: PixelRect,
		level: u8,
		format: Option<PixelFormat>,
		src: &[u8],
		stride: Option<usize>,
	) -> Result<()> {
		if rect.is_empty() {
			return Ok(());
		}
		let in_format = format.unwrap_or_else(|| self.format());
		let interpret = self.format();
		let in_bpp = in_format.bytes_per_pixel();
		let tile_bpp = interpret.bytes_per_pixel();
		let row_bytes = rect.width as usize * in_bpp;
		let stride = stride.unwrap_or(row_bytes);
		ensure!(stride >= row_bytes, "stride {stride} is below the row width {row_bytes}");
		let needed = (rect.height as usize - 1) * stride + row_bytes;
		ensure!(
			src.len() >= needed,
			"source holds {} bytes, request needs {needed}",
			src.len()
		);

		let (shift_x, shift_y) = self.shift();
		let (shift_x, shift_y) = (shift_x >> level, shift_y >> level);
		let defined = rect.intersection(&self.abyss().scaled_down(level));
		if defined.is_empty() {
			return Ok(());
		}

		let tile_size = self.tile_size();
		let storage_rect = defined.translated(shift_x, shift_y);
		for (address, span) in self.storage().tile_iter(storage_rect, level) {
			let tile = self.storage().get_tile(address)?;
			{
				let mut guard = tile.lock_write();
				let data = guard.data_mut();
				let tile_rect = address.pixel_rect(tile_size);
				for row in 0..span.height {
					let t_off = ((span.y - tile_rect.y + row) as usize * tile_size.width as usize
						+ (span.x - tile_rect.x) as usize)
						* tile_bpp;
					let s_off = (span.y + row - shift_y - rect.y) as usize * stride
						+ (span.x - shift_x - rect.x) as usize * in_bpp;
					convert_span(
						in_format,
						&src[s_off..],
						interpret,
						&mut data[t_off..],
						span.width as usize,
					)?;
				}
			}
			self.storage().set_tile(address, &tile)?;
		}

		self.notify_storage_change(storage_rect, level);
		Ok(())
	}

	/// Reads one pixel at view coordinates `(x, y)`.
	pub fn get_pixel(
		&self,
		x: i32,
		y: i32,
		format: PixelFormat,
		out: &mut [u8],
		repeat: RepeatMode,
	) -> Result<()> {
		self.get(PixelRect::new(x, y, 1, 1), 0, Some(format), out, None, repeat)
	}

	/// Writes one pixel at view coordinates `(x, y)`.
	pub fn set_pixel(&self, x: i32, y: i32, format: PixelFormat, pixel: &[u8]) -> Result<()> {
		self.set(PixelRect::new(x, y, 1, 1), 0, Some(format), pixel, None)
	}

	/// Fills `rect` with one pixel value given in `format`. An all-zero
	/// fill degrades to [`Buffer::clear`], voiding covered tiles instead of
	/// storing them.
	pub fn set_color(&self, rect: PixelRect, format: PixelFormat, pixel: &[u8]) -> Result<()> {
		let interpret = self.format();
		let tile_bpp = interpret.bytes_per_pixel();
		ensure!(
			pixel.len() >= format.bytes_per_pixel(),
			"pixel value is shorter than one {format:?} pixel"
		);
		let mut fill = [0u8; MAX_BPP];
		convert_span(format, pixel, interpret, &mut fill, 1)?;
		if fill[..tile_bpp].iter().all(|&b| b == 0) {
			return self.clear(rect);
		}

		let defined = rect.intersection(&self.abyss());
		if defined.is_empty() {
			return Ok(());
		}
		let (shift_x, shift_y) = self.shift();
		let tile_size = self.tile_size();
		let storage_rect = defined.translated(shift_x, shift_y);
		for (address, span) in self.storage().tile_iter(storage_rect, 0) {
			let tile = self.storage().get_tile(address)?;
			{
				let mut guard = tile.lock_write();
				let data = guard.data_mut();
				let tile_rect = address.pixel_rect(tile_size);
				let (x0, y0, x1, y1) = if span == tile_rect {
					(0, 0, tile_size.width as i32, tile_size.height as i32)
				} else {
					(
						span.x - tile_rect.x,
						span.y - tile_rect.y,
						span.x2() - tile_rect.x,
						span.y2() - tile_rect.y,
					)
				};
				for row in y0..y1 {
					for col in x0..x1 {
						let off = (row as usize * tile_size.width as usize + col as usize) * tile_bpp;
						data[off..off + tile_bpp].copy_from_slice(&fill[..tile_bpp]);
					}
				}
			}
			self.storage().set_tile(address, &tile)?;
		}
		self.notify_storage_change(storage_rect, 0);
		Ok(())
	}

	/// Writes zeros into `rect`. Tiles fully covered by the request are
	/// voided in the backend instead of stored.
	pub fn clear(&self, rect: PixelRect) -> Result<()> {
		let defined = rect.intersection(&self.abyss());
		if defined.is_empty() {
			return Ok(());
		}
		let (shift_x, shift_y) = self.shift();
		let tile_size = self.tile_size();
		let tile_bpp = self.format().bytes_per_pixel();
		let storage_rect = defined.translated(shift_x, shift_y);
		for (address, span) in self.storage().tile_iter(storage_rect, 0) {
			let tile_rect = address.pixel_rect(tile_size);
			if span == tile_rect {
				self.storage().void_tile(address)?;
				continue;
			}
			let tile = self.storage().get_tile(address)?;
			{
				let mut guard = tile.lock_write();
				let data = guard.data_mut();
				for row in 0..span.height {
					let off = ((span.y - tile_rect.y + row) as usize * tile_size.width as usize
						+ (span.x - tile_rect.x) as usize)
						* tile_bpp;
					data[off..off + span.width as usize * tile_bpp].fill(0);
				}
			}
			self.storage().set_tile(address, &tile)?;
		}
		self.notify_storage_change(storage_rect, 0);
		Ok(())
	}

	/// Copies `src_rect` from `source` to `(dst_x, dst_y)` in this buffer.
	///
	/// When the storages agree on format and tile size and both regions are
	/// tile-aligned inside their abysses, tiles are duplicated by payload
	/// reference; otherwise pixels are staged row by row through `get`/`set`
	/// with `repeat` applied to out-of-abyss source pixels.
	pub fn copy_from(
		&self,
		source: &Buffer,
		src_rect: PixelRect,
		dst_x: i32,
		dst_y: i32,
	) -> Result<()> {
		self.copy_from_with_repeat(source, src_rect, dst_x, dst_y, RepeatMode::None)
	}

	pub fn copy_from_with_repeat(
		&self,
		source: &Buffer,
		src_rect: PixelRect,
		dst_x: i32,
		dst_y: i32,
		repeat: RepeatMode,
	) -> Result<()> {
		if src_rect.is_empty() {
			return Ok(());
		}
		let dst_rect = PixelRect::new(dst_x, dst_y, src_rect.width, src_rect.height);

		if self.tile_copy_possible(source, src_rect, dst_rect) {
			return self.tile_copy(source, src_rect, dst_rect);
		}

		// staging path, one row at a time to bound memory
		let format = self.format();
		let mut row = vec![0u8; src_rect.width as usize * format.bytes_per_pixel()];
		for y in 0..src_rect.height {
			let src_row = PixelRect::new(src_rect.x, src_rect.y + y, src_rect.width, 1);
			if repeat == RepeatMode::None {
				// only defined source pixels are transferred
				let defined = src_row.intersection(&source.abyss());
				if defined.is_empty() {
					continue;
				}
				source.get(defined, 0, Some(format), &mut row, None, RepeatMode::None)?;
				self.set(
					PixelRect::new(
						dst_x + (defined.x - src_rect.x),
						dst_y + (defined.y - src_rect.y),
						defined.width,
						1,
					),
					0,
					Some(format),
					&row,
					None,
				)?;
			} else {
				source.get(src_row, 0, Some(format), &mut row, None, repeat)?;
				self.set(
					PixelRect::new(dst_x, dst_y + y, src_rect.width, 1),
					0,
					Some(format),
					&row,
					None,
				)?;
			}
		}
		Ok(())
	}

	fn tile_copy_possible(&self, source: &Buffer, src_rect: PixelRect, dst_rect: PixelRect) -> bool {
		if source.storage_format() != self.storage_format()
			|| source.format() != self.format()
			|| source.tile_size() != self.tile_size()
		{
			return false;
		}
		if !source.abyss().contains_rect(&src_rect) || !self.abyss().contains_rect(&dst_rect) {
			return false;
		}
		let tile_size = self.tile_size();
		let (tw, th) = (tile_size.width as i32, tile_size.height as i32);
		let (s_shift_x, s_shift_y) = source.shift();
		let (d_shift_x, d_shift_y) = self.shift();
		let src = src_rect.translated(s_shift_x, s_shift_y);
		let dst = dst_rect.translated(d_shift_x, d_shift_y);
		src.x.rem_euclid(tw) == 0
			&& src.y.rem_euclid(th) == 0
			&& dst.x.rem_euclid(tw) == 0
			&& dst.y.rem_euclid(th) == 0
			&& src.width % tw == 0
			&& src.height % th == 0
	}

	/// Pure tile-reference duplication; byte copies are deferred to the
	/// next write on either side.
	fn tile_copy(&self, source: &Buffer, src_rect: PixelRect, dst_rect: PixelRect) -> Result<()> {
		let tile_size = self.tile_size();
		let (s_shift_x, s_shift_y) = source.shift();
		let (d_shift_x, d_shift_y) = self.shift();
		let src_storage = src_rect.translated(s_shift_x, s_shift_y);
		let dst_storage = dst_rect.translated(d_shift_x, d_shift_y);
		let delta_tx = (dst_storage.x - src_storage.x) / tile_size.width as i32;
		let delta_ty = (dst_storage.y - src_storage.y) / tile_size.height as i32;

		for (address, _) in source.storage().tile_iter(src_storage, 0) {
			let tile = source.storage().get_tile(address)?;
			let target = TileAddress::new(address.x + delta_tx, address.y + delta_ty, 0);
			let copy = tile.share_payload(target);
			copy.mark_modified();
			self
				.storage()
				.set_tile(target, &copy)
				.with_context(|| format!("copying {address:?} to {target:?}"))?;
		}
		self.notify_storage_change(dst_storage, 0);
		Ok(())
	}

	/// Emits the changed signal in level-0 storage coordinates, after all
	/// tile locks are released.
	fn notify_storage_change(&self, storage_rect: PixelRect, level: u8) {
		let rect = if level == 0 {
			storage_rect
		} else {
			PixelRect::new(
				storage_rect.x << level,
				storage_rect.y << level,
				storage_rect.width << level,
				storage_rect.height << level,
			)
		};
		self.storage().notify_changed(rect);
	}
}
