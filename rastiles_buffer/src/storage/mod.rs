//! Tile storage: a handler chain paired with the bookkeeping shared by every
//! buffer built on it.
//!
//! The storage owns the chain (cache over empty over backend, optionally
//! traced), the hot-tile one-slot shortcut consulted before the chain on
//! every fetch, and the changed-signal observer list. Buffers hold the
//! storage through an `Arc`; dropping any buffer drops the hot tile, and
//! tiles fetched through the storage carry a weak back-reference used to
//! write back a dirty payload if every other holder forgets it.

mod tile_iterator;

pub use tile_iterator::TileIterator;

use crate::{
	backend::{BackendHandles, TileLayout},
	handler::{CacheCapacity, CacheHandler, EmptyHandler, LogHandler},
	source::TileSource,
	tile::{Tile, TileWriteBack},
};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rastiles_core::{PixelRect, TileAddress, TileSize};
use std::sync::{Arc, Weak};

/// Tuning knobs for a storage's chain.
#[derive(Clone, Debug, Default)]
pub struct StorageOptions {
	/// Per-cache limits on top of the process-wide byte budget.
	pub cache_capacity: CacheCapacity,
	/// Install a tracing handler above the cache, logging every command
	/// under this name.
	pub trace: Option<String>,
}

type ChangeListener = Box<dyn Fn(PixelRect) + Send + Sync>;

pub struct TileStorage {
	layout: TileLayout,
	backend: Arc<dyn crate::backend::TileBackend>,
	chain: Arc<dyn TileSource>,
	cache: Arc<CacheHandler>,
	hot: Mutex<Option<(TileAddress, Tile)>>,
	listeners: Mutex<Vec<(u64, ChangeListener)>>,
	next_listener: Mutex<u64>,
	weak_self: Weak<TileStorage>,
}

impl TileStorage {
	/// Builds a storage over the given backend, assembling the chain bottom
	/// to top: backend, empty, cache, optional log.
	pub fn new(handles: BackendHandles, options: StorageOptions) -> Arc<TileStorage> {
		let layout = handles.backend.layout();
		let tile_bytes = layout.tile_bytes();

		let empty = Arc::new(EmptyHandler::new(handles.source, tile_bytes));
		let cache = Arc::new(CacheHandler::new(empty, tile_bytes, options.cache_capacity));
		let chain: Arc<dyn TileSource> = match options.trace {
			Some(name) => Arc::new(LogHandler::new(cache.clone(), name)),
			None => cache.clone(),
		};

		Arc::new_cyclic(|weak_self| TileStorage {
			layout,
			backend: handles.backend,
			chain,
			cache,
			hot: Mutex::new(None),
			listeners: Mutex::new(Vec::new()),
			next_listener: Mutex::new(0),
			weak_self: weak_self.clone(),
		})
	}

	pub fn layout(&self) -> TileLayout {
		self.layout
	}

	pub fn tile_size(&self) -> TileSize {
		self.layout.tile_size
	}

	pub fn format(&self) -> rastiles_core::PixelFormat {
		self.layout.format
	}

	/// The extent recorded on the backend, if any.
	pub fn backend_extent(&self) -> Option<PixelRect> {
		self.backend.extent()
	}

	pub fn set_backend_extent(&self, extent: PixelRect) {
		self.backend.set_extent(extent);
	}

	/// Fetches the tile at `address`, consulting the hot-tile slot before
	/// the chain. The chain's empty handler guarantees a tile for every
	/// address, so a missing tile is an error.
	pub fn get_tile(&self, address: TileAddress) -> Result<Tile> {
		{
			let hot = self.hot.lock();
			if let Some((hot_address, tile)) = hot.as_ref() {
				if *hot_address == address {
					return Ok(tile.clone());
				}
			}
		}
		let tile = self
			.chain
			.get(address)?
			.with_context(|| format!("chain produced no tile for {address:?}"))?;
		tile.attach_write_back(self.weak_self.clone() as Weak<dyn TileWriteBack>);
		*self.hot.lock() = Some((address, tile.clone()));
		Ok(tile)
	}

	/// Re-announces a tile to the chain after a write, keeping the cache
	/// entry and the hot slot fresh.
	pub fn set_tile(&self, address: TileAddress, tile: &Tile) -> Result<()> {
		*self.hot.lock() = Some((address, tile.clone()));
		self.chain.set(address, tile)
	}

	/// Deletes any contents at `address`, dropping the hot tile if it
	/// matches.
	pub fn void_tile(&self, address: TileAddress) -> Result<()> {
		{
			let mut hot = self.hot.lock();
			if let Some((hot_address, tile)) = hot.as_ref() {
				if *hot_address == address {
					tile.void();
					*hot = None;
				}
			}
		}
		self.chain.void(address)
	}

	pub fn tile_exists(&self, address: TileAddress) -> Result<bool> {
		self.chain.exist(address)
	}

	pub fn tile_is_cached(&self, address: TileAddress) -> bool {
		self.chain.is_cached(address)
	}

	pub fn flush(&self) -> Result<()> {
		self.chain.flush()
	}

	/// Discards all volatile state, the hot tile included.
	pub fn reinit(&self) -> Result<()> {
		self.drop_hot_tile();
		self.chain.reinit()
	}

	/// Clears the one-slot MRU; called whenever a buffer on this storage is
	/// disposed.
	pub fn drop_hot_tile(&self) {
		*self.hot.lock() = None;
	}

	/// Number of tiles in this storage's cache, for tests and diagnostics.
	pub fn cached_tiles(&self) -> usize {
		self.cache.len()
	}

	/// Lazy row-major iteration over the tiles `rect` touches at level `z`,
	/// in storage coordinates.
	pub fn tile_iter(&self, rect: PixelRect, z: u8) -> TileIterator {
		TileIterator::new(rect, z, self.layout.tile_size)
	}

	/// Registers a change listener; returns its registration id. Listeners
	/// run with the observer list locked and must not re-enter the writing
	/// API.
	pub fn add_listener(&self, listener: ChangeListener) -> u64 {
		let mut next = self.next_listener.lock();
		let id = *next;
		*next += 1;
		drop(next);
		self.listeners.lock().push((id, listener));
		id
	}

	pub fn remove_listener(&self, id: u64) {
		self.listeners.lock().retain(|(lid, _)| *lid != id);
	}

	/// Emits `changed(rect)` (storage coordinates) to every listener. Call
	/// after the written tiles' locks are released.
	pub fn notify_changed(&self, rect: PixelRect) {
		for (_, listener) in self.listeners.lock().iter() {
			listener(rect);
		}
	}
}

impl TileWriteBack for TileStorage {
	/// Last-resort persistence for a dirty tile every cache forgot: write the
	/// payload straight to the backend. Errors are logged, not propagated;
	/// this runs from a destructor.
	fn write_back(&self, address: TileAddress, payload: Arc<Vec<u8>>) {
		let tile = Tile::new(address, payload);
		if let Err(e) = self.backend.set(address, &tile) {
			log::warn!("write-back of {address:?} failed: {e:#}");
		}
	}
}

impl std::fmt::Debug for TileStorage {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TileStorage")
			.field("layout", &self.layout)
			.field("cached_tiles", &self.cached_tiles())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::{BackendKind, create_backend};
	use rastiles_core::PixelFormat;

	fn ram_storage() -> Arc<TileStorage> {
		let layout = TileLayout::new(PixelFormat::RGBA_U8, TileSize::new(4, 4));
		let handles = create_backend(&BackendKind::Ram, layout).unwrap();
		TileStorage::new(handles, StorageOptions::default())
	}

	#[test]
	fn get_tile_always_yields_a_tile() {
		let storage = ram_storage();
		let tile = storage.get_tile(TileAddress::new(7, -3, 0)).unwrap();
		assert_eq!(tile.read().as_slice(), &[0u8; 64]);
	}

	#[test]
	fn hot_tile_shortcut_returns_the_same_instance() {
		let storage = ram_storage();
		let addr = TileAddress::new(0, 0, 0);
		let a = storage.get_tile(addr).unwrap();
		let b = storage.get_tile(addr).unwrap();
		assert!(Arc::ptr_eq(&a.read(), &b.read()));

		storage.drop_hot_tile();
		// still served by the cache after the hot slot is dropped
		let c = storage.get_tile(addr).unwrap();
		assert!(Arc::ptr_eq(&a.read(), &c.read()));
	}

	#[test]
	fn void_invalidates_the_hot_tile() {
		let storage = ram_storage();
		let addr = TileAddress::new(1, 1, 0);
		assert!(!storage.tile_exists(addr).unwrap());
		assert!(!storage.tile_is_cached(addr));

		let tile = storage.get_tile(addr).unwrap();
		assert!(storage.tile_is_cached(addr));

		let mut guard = tile.lock_write();
		guard.data_mut()[0] = 5;
		drop(guard);

		storage.void_tile(addr).unwrap();
		assert!(!storage.tile_is_cached(addr));
		assert!(!storage.tile_exists(addr).unwrap());
		let fresh = storage.get_tile(addr).unwrap();
		assert_eq!(fresh.read()[0], 0);
	}

	#[test]
	fn listeners_receive_change_rects() {
		let storage = ram_storage();
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = seen.clone();
		let id = storage.add_listener(Box::new(move |rect| sink.lock().push(rect)));

		storage.notify_changed(PixelRect::new(1, 2, 3, 4));
		assert_eq!(seen.lock().as_slice(), &[PixelRect::new(1, 2, 3, 4)]);

		storage.remove_listener(id);
		storage.notify_changed(PixelRect::new(0, 0, 1, 1));
		assert_eq!(seen.lock().len(), 1);
	}

	#[test]
	fn forgotten_dirty_tiles_write_back_to_the_backend() {
		let layout = TileLayout::new(PixelFormat::RGBA_U8, TileSize::new(4, 4));
		let handles = create_backend(&BackendKind::Ram, layout).unwrap();
		let backend = handles.backend.clone();
		let storage = TileStorage::new(handles, StorageOptions::default());

		let addr = TileAddress::new(2, 2, 0);
		let tile = storage.get_tile(addr).unwrap();
		let mut guard = tile.lock_write();
		guard.data_mut()[0] = 11;
		drop(guard);
		drop(tile);

		// reinit clears the cache and hot slot without flushing; the dirty
		// payload's last holder writes it back on drop
		storage.reinit().unwrap();
		assert_eq!(backend.get(addr).unwrap().unwrap().read()[0], 11);
	}
}
