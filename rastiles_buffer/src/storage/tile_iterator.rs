//! Lazy iteration over the tiles intersecting a pixel rectangle.

use rastiles_core::{PixelRect, TileAddress, TileSize};

/// Yields `(tile_address, intersection)` for every tile a rectangle touches
/// at one level, row-major: left to right, top to bottom. Consumed
/// incrementally; not restartable.
pub struct TileIterator {
	tile_size: TileSize,
	rect: PixelRect,
	z: u8,
	tx_first: i32,
	tx_last: i32,
	ty_last: i32,
	tx: i32,
	ty: i32,
}

impl TileIterator {
	pub fn new(rect: PixelRect, z: u8, tile_size: TileSize) -> TileIterator {
		let (tx_first, ty_first, tx_last, ty_last) = if rect.is_empty() {
			// ranges chosen so the iterator is immediately exhausted
			(0, 1, -1, 0)
		} else {
			let tw = tile_size.width as i32;
			let th = tile_size.height as i32;
			(
				rect.x.div_euclid(tw),
				rect.y.div_euclid(th),
				(rect.x2() - 1).div_euclid(tw),
				(rect.y2() - 1).div_euclid(th),
			)
		};
		TileIterator {
			tile_size,
			rect,
			z,
			tx_first,
			tx_last,
			ty_last,
			tx: tx_first,
			ty: ty_first,
		}
	}
}

impl Iterator for TileIterator {
	type Item = (TileAddress, PixelRect);

	fn next(&mut self) -> Option<(TileAddress, PixelRect)> {
		if self.ty > self.ty_last {
			return None;
		}
		let address = TileAddress::new(self.tx, self.ty, self.z);
		let intersection = address.pixel_rect(self.tile_size).intersection(&self.rect);

		self.tx += 1;
		if self.tx > self.tx_last {
			self.tx = self.tx_first;
			self.ty += 1;
		}
		Some((address, intersection))
	}
}
