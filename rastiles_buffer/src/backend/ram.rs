//! In-memory tile backend: a hash map from address to payload under a mutex.
//!
//! GET hands out tiles sharing the stored payload; copy-on-write protects the
//! stored bytes from subsequent writers. FLUSH and REINIT are no-ops, since
//! the map itself is the persisted state.

use super::{TileBackend, TileLayout};
use crate::{source::TileSource, tile::Tile};
use anyhow::{Result, ensure};
use parking_lot::Mutex;
use rastiles_core::{PixelRect, TileAddress};
use std::{collections::HashMap, sync::Arc};

pub struct RamBackend {
	layout: TileLayout,
	state: Mutex<RamState>,
}

struct RamState {
	tiles: HashMap<TileAddress, Arc<Vec<u8>>>,
	extent: Option<PixelRect>,
}

impl RamBackend {
	pub fn new(layout: TileLayout) -> RamBackend {
		RamBackend {
			layout,
			state: Mutex::new(RamState {
				tiles: HashMap::new(),
				extent: None,
			}),
		}
	}

	/// Number of persisted tiles, for tests and diagnostics.
	pub fn tile_count(&self) -> usize {
		self.state.lock().tiles.len()
	}
}

impl TileSource for RamBackend {
	fn get(&self, address: TileAddress) -> Result<Option<Tile>> {
		let state = self.state.lock();
		Ok(state.tiles.get(&address).map(|payload| Tile::new(address, payload.clone())))
	}

	fn set(&self, address: TileAddress, tile: &Tile) -> Result<()> {
		let payload = tile.read();
		ensure!(
			payload.len() == self.layout.tile_bytes(),
			"tile payload is {} bytes, backend expects {}",
			payload.len(),
			self.layout.tile_bytes()
		);
		self.state.lock().tiles.insert(address, payload);
		tile.mark_stored();
		Ok(())
	}

	fn exist(&self, address: TileAddress) -> Result<bool> {
		Ok(self.state.lock().tiles.contains_key(&address))
	}

	fn void(&self, address: TileAddress) -> Result<()> {
		self.state.lock().tiles.remove(&address);
		Ok(())
	}

	fn flush(&self) -> Result<()> {
		Ok(())
	}

	fn reinit(&self) -> Result<()> {
		Ok(())
	}
}

impl TileBackend for RamBackend {
	fn layout(&self) -> TileLayout {
		self.layout
	}

	fn extent(&self) -> Option<PixelRect> {
		self.state.lock().extent
	}

	fn set_extent(&self, extent: PixelRect) {
		self.state.lock().extent = Some(extent);
	}
}
