//! Empty handler: fabricates zero-filled tiles for addresses nothing below
//! it knows about.
//!
//! The zero payload is allocated once per storage and shared by reference;
//! copy-on-write defers the byte copy until a fabricated tile is first
//! written. Untouched regions of a buffer therefore cost one tile allocation
//! total, regardless of image size, and are never persisted.

use crate::{source::TileSource, tile::Tile};
use anyhow::Result;
use rastiles_core::TileAddress;
use std::sync::Arc;

pub struct EmptyHandler {
	next: Arc<dyn TileSource>,
	zero: Arc<Vec<u8>>,
}

impl EmptyHandler {
	pub fn new(next: Arc<dyn TileSource>, tile_bytes: usize) -> EmptyHandler {
		EmptyHandler {
			next,
			zero: Arc::new(vec![0u8; tile_bytes]),
		}
	}
}

impl TileSource for EmptyHandler {
	fn get(&self, address: TileAddress) -> Result<Option<Tile>> {
		match self.next.get(address)? {
			Some(tile) => Ok(Some(tile)),
			None => Ok(Some(Tile::new(address, self.zero.clone()))),
		}
	}

	fn set(&self, address: TileAddress, tile: &Tile) -> Result<()> {
		self.next.set(address, tile)
	}

	fn exist(&self, address: TileAddress) -> Result<bool> {
		self.next.exist(address)
	}

	fn is_cached(&self, address: TileAddress) -> bool {
		self.next.is_cached(address)
	}

	fn void(&self, address: TileAddress) -> Result<()> {
		self.next.void(address)
	}

	fn flush(&self) -> Result<()> {
		self.next.flush()
	}

	fn reinit(&self) -> Result<()> {
		self.next.reinit()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::{RamBackend, TileLayout};
	use rastiles_core::{PixelFormat, TileSize};

	#[test]
	fn fabricates_shared_zero_tiles() {
		let layout = TileLayout::new(PixelFormat::RGBA_U8, TileSize::new(2, 2));
		let backend = Arc::new(RamBackend::new(layout));
		let handler = EmptyHandler::new(backend.clone(), layout.tile_bytes());

		let a = handler.get(TileAddress::new(0, 0, 0)).unwrap().unwrap();
		let b = handler.get(TileAddress::new(5, 5, 0)).unwrap().unwrap();
		assert_eq!(a.read().as_slice(), &[0u8; 16]);
		// both tiles share the one zero payload
		assert!(Arc::ptr_eq(&a.read(), &b.read()));
		// fabricated tiles do not exist downstream
		assert!(!handler.exist(TileAddress::new(0, 0, 0)).unwrap());
	}

	#[test]
	fn writing_a_fabricated_tile_leaves_the_zero_payload_intact() {
		let layout = TileLayout::new(PixelFormat::RGBA_U8, TileSize::new(2, 2));
		let backend = Arc::new(RamBackend::new(layout));
		let handler = EmptyHandler::new(backend, layout.tile_bytes());

		let addr = TileAddress::new(0, 0, 0);
		let tile = handler.get(addr).unwrap().unwrap();
		let mut guard = tile.lock_write();
		guard.data_mut()[0] = 9;
		drop(guard);

		let fresh = handler.get(TileAddress::new(1, 1, 0)).unwrap().unwrap();
		assert_eq!(fresh.read().as_slice(), &[0u8; 16]);
	}
}
