//! Cache handler: a bounded LRU of recently touched tiles.
//!
//! The cache is the write-back layer of a chain: SET inserts or updates an
//! entry without forwarding, FLUSH pushes every dirty entry downstream in
//! least-recently-used-first order. Concurrent GETs for the same missing
//! address collapse onto a single downstream fetch through a pending set and
//! a condvar.
//!
//! Two limits apply: an optional per-cache capacity (tiles or bytes) and the
//! process-wide byte budget from the configuration, tracked across all caches
//! by one atomic counter. Either limit being exceeded evicts
//! least-recently-used entries, preferring clean ones; a dirty victim is
//! flushed downstream first, and if that flush fails the entry is retained
//! and the error surfaces to the caller.

use crate::{source::TileSource, tile::Tile};
use anyhow::{Context, Result};
use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use rastiles_core::TileAddress;
use std::{
	collections::HashSet,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
};

/// Bytes currently held by every cache handler in the process.
static CACHED_BYTES: AtomicUsize = AtomicUsize::new(0);

/// Bytes currently held by every cache handler in the process.
pub fn cached_bytes() -> usize {
	CACHED_BYTES.load(Ordering::Relaxed)
}

/// Optional per-cache limits; the process-wide byte budget from the
/// configuration applies regardless.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheCapacity {
	pub max_tiles: Option<usize>,
	pub max_bytes: Option<usize>,
}

struct CacheState {
	lru: LruCache<TileAddress, Tile>,
	pending: HashSet<TileAddress>,
}

pub struct CacheHandler {
	next: Arc<dyn TileSource>,
	tile_bytes: usize,
	capacity: CacheCapacity,
	state: Mutex<CacheState>,
	fetched: Condvar,
}

impl CacheHandler {
	pub fn new(next: Arc<dyn TileSource>, tile_bytes: usize, capacity: CacheCapacity) -> CacheHandler {
		CacheHandler {
			next,
			tile_bytes,
			capacity,
			state: Mutex::new(CacheState {
				lru: LruCache::unbounded(),
				pending: HashSet::new(),
			}),
			fetched: Condvar::new(),
		}
	}

	/// Number of cached tiles, for tests and diagnostics.
	pub fn len(&self) -> usize {
		self.state.lock().lru.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn insert(&self, state: &mut CacheState, address: TileAddress, tile: Tile) {
		if state.lru.push(address, tile).is_none() {
			CACHED_BYTES.fetch_add(self.tile_bytes, Ordering::Relaxed);
		}
	}

	fn remove(&self, state: &mut CacheState, address: TileAddress) -> Option<Tile> {
		let removed = state.lru.pop(&address);
		if removed.is_some() {
			CACHED_BYTES.fetch_sub(self.tile_bytes, Ordering::Relaxed);
		}
		removed
	}

	fn over_capacity(&self, state: &CacheState) -> bool {
		if let Some(max_tiles) = self.capacity.max_tiles {
			if state.lru.len() > max_tiles {
				return true;
			}
		}
		if let Some(max_bytes) = self.capacity.max_bytes {
			if state.lru.len() * self.tile_bytes > max_bytes {
				return true;
			}
		}
		cached_bytes() > rastiles_core::config().cache_size
	}

	/// Evicts least-recently-used entries until the limits hold. Clean
	/// victims drop immediately; dirty victims are flushed downstream first,
	/// and a failed flush retains the entry and surfaces the error.
	fn evict_overflow(&self, state: &mut CacheState) -> Result<()> {
		while self.over_capacity(state) {
			if state.lru.len() <= 1 {
				break;
			}
			let Some((address, tile)) = state.lru.peek_lru().map(|(a, t)| (*a, t.clone())) else {
				break;
			};
			if tile.needs_store() {
				self
					.next
					.set(address, &tile)
					.with_context(|| format!("flushing {address:?} before eviction"))?;
			}
			self.remove(state, address);
			log::debug!("evicted {address:?}, {} tiles cached here", state.lru.len());
		}
		Ok(())
	}
}

impl TileSource for CacheHandler {
	fn get(&self, address: TileAddress) -> Result<Option<Tile>> {
		let mut state = self.state.lock();
		loop {
			if let Some(tile) = state.lru.get(&address) {
				return Ok(Some(tile.clone()));
			}
			if state.pending.contains(&address) {
				// another thread is materializing this address
				self.fetched.wait(&mut state);
				continue;
			}
			state.pending.insert(address);
			break;
		}
		drop(state);

		let fetched = self.next.get(address);

		let mut state = self.state.lock();
		state.pending.remove(&address);
		let result = match fetched {
			Ok(Some(tile)) => {
				self.insert(&mut state, address, tile.clone());
				self.evict_overflow(&mut state).map(|()| Some(tile))
			}
			other => other,
		};
		self.fetched.notify_all();
		result
	}

	fn set(&self, address: TileAddress, tile: &Tile) -> Result<()> {
		let mut state = self.state.lock();
		self.insert(&mut state, address, tile.clone());
		self.evict_overflow(&mut state)
	}

	fn exist(&self, address: TileAddress) -> Result<bool> {
		if self.is_cached(address) {
			return Ok(true);
		}
		self.next.exist(address)
	}

	fn is_cached(&self, address: TileAddress) -> bool {
		self.state.lock().lru.contains(&address)
	}

	fn void(&self, address: TileAddress) -> Result<()> {
		let mut state = self.state.lock();
		if let Some(tile) = self.remove(&mut state, address) {
			tile.void();
		}
		drop(state);
		self.next.void(address)
	}

	fn flush(&self) -> Result<()> {
		let mut state = self.state.lock();
		let dirty: Vec<(TileAddress, Tile)> = state
			.lru
			.iter()
			.rev()
			.filter(|(_, tile)| tile.needs_store())
			.map(|(address, tile)| (*address, tile.clone()))
			.collect();
		for (address, tile) in dirty {
			self
				.next
				.set(address, &tile)
				.with_context(|| format!("flushing {address:?}"))?;
		}
		drop(state);
		self.next.flush()
	}

	fn reinit(&self) -> Result<()> {
		let mut state = self.state.lock();
		let dropped = state.lru.len();
		state.lru.clear();
		CACHED_BYTES.fetch_sub(dropped * self.tile_bytes, Ordering::Relaxed);
		drop(state);
		self.next.reinit()
	}
}

impl Drop for CacheHandler {
	fn drop(&mut self) {
		let state = self.state.get_mut();
		CACHED_BYTES.fetch_sub(state.lru.len() * self.tile_bytes, Ordering::Relaxed);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::{RamBackend, TileLayout};
	use crate::handler::EmptyHandler;
	use rastiles_core::{PixelFormat, TileSize};
	use std::thread;
	use std::time::Duration;

	fn layout() -> TileLayout {
		TileLayout::new(PixelFormat::RGBA_U8, TileSize::new(2, 2))
	}

	fn chain(capacity: CacheCapacity) -> (Arc<RamBackend>, Arc<CacheHandler>) {
		let backend = Arc::new(RamBackend::new(layout()));
		let empty = Arc::new(EmptyHandler::new(backend.clone(), layout().tile_bytes()));
		let cache = Arc::new(CacheHandler::new(empty, layout().tile_bytes(), capacity));
		(backend, cache)
	}

	#[test]
	fn get_hit_returns_the_same_instance() {
		let (_backend, cache) = chain(CacheCapacity::default());
		let addr = TileAddress::new(0, 0, 0);
		let a = cache.get(addr).unwrap().unwrap();
		let b = cache.get(addr).unwrap().unwrap();
		assert!(Arc::ptr_eq(&a.read(), &b.read()));
		assert!(cache.is_cached(addr));
	}

	#[test]
	fn lru_bound_keeps_the_most_recent_tiles() {
		let (_backend, cache) = chain(CacheCapacity {
			max_tiles: Some(16),
			max_bytes: None,
		});
		// touch 64 distinct tiles once each
		for i in 0..64 {
			cache.get(TileAddress::new(i, 0, 0)).unwrap();
		}
		assert_eq!(cache.len(), 16);
		// the last 16 are hits
		for i in 48..64 {
			assert!(cache.is_cached(TileAddress::new(i, 0, 0)), "tile {i} evicted");
		}
		// the first 16 are misses
		for i in 0..16 {
			assert!(!cache.is_cached(TileAddress::new(i, 0, 0)), "tile {i} kept");
		}
	}

	#[test]
	fn dirty_entries_are_flushed_before_eviction() {
		let (backend, cache) = chain(CacheCapacity {
			max_tiles: Some(2),
			max_bytes: None,
		});
		let addr = TileAddress::new(0, 0, 0);
		let tile = cache.get(addr).unwrap().unwrap();
		let mut guard = tile.lock_write();
		guard.data_mut()[0] = 42;
		drop(guard);

		// push the dirty tile out of the cache
		for i in 1..5 {
			cache.get(TileAddress::new(i, 0, 0)).unwrap();
		}
		assert!(!cache.is_cached(addr));
		assert_eq!(backend.get(addr).unwrap().unwrap().read()[0], 42);
	}

	#[test]
	fn flush_persists_dirty_entries() {
		let (backend, cache) = chain(CacheCapacity::default());
		let addr = TileAddress::new(3, 3, 0);
		let tile = cache.get(addr).unwrap().unwrap();
		let mut guard = tile.lock_write();
		guard.data_mut()[7] = 7;
		drop(guard);

		assert!(!backend.exist(addr).unwrap());
		cache.flush().unwrap();
		assert!(backend.exist(addr).unwrap());
		assert!(tile.is_stored());
	}

	#[test]
	fn void_drops_the_entry_everywhere() {
		let (backend, cache) = chain(CacheCapacity::default());
		let addr = TileAddress::new(1, 1, 0);
		let tile = cache.get(addr).unwrap().unwrap();
		let mut guard = tile.lock_write();
		guard.data_mut()[0] = 1;
		drop(guard);
		cache.flush().unwrap();
		assert!(backend.exist(addr).unwrap());

		cache.void(addr).unwrap();
		assert!(!cache.is_cached(addr));
		assert!(!backend.exist(addr).unwrap());
	}

	/// A source that serves zero tiles slowly and counts its GETs.
	struct SlowSource {
		tile_bytes: usize,
		delay: Duration,
		gets: AtomicUsize,
	}

	impl TileSource for SlowSource {
		fn get(&self, address: TileAddress) -> Result<Option<Tile>> {
			self.gets.fetch_add(1, Ordering::SeqCst);
			thread::sleep(self.delay);
			Ok(Some(Tile::new(address, Arc::new(vec![0u8; self.tile_bytes]))))
		}
		fn set(&self, _address: TileAddress, _tile: &Tile) -> Result<()> {
			Ok(())
		}
		fn exist(&self, _address: TileAddress) -> Result<bool> {
			Ok(false)
		}
		fn void(&self, _address: TileAddress) -> Result<()> {
			Ok(())
		}
		fn flush(&self) -> Result<()> {
			Ok(())
		}
		fn reinit(&self) -> Result<()> {
			Ok(())
		}
	}

	#[test]
	fn concurrent_misses_collapse_to_one_fetch() {
		let slow = Arc::new(SlowSource {
			tile_bytes: 16,
			delay: Duration::from_millis(100),
			gets: AtomicUsize::new(0),
		});
		let cache = Arc::new(CacheHandler::new(
			slow.clone(),
			16,
			CacheCapacity::default(),
		));

		let addr = TileAddress::new(0, 0, 0);
		let threads: Vec<_> = (0..32)
			.map(|_| {
				let cache = cache.clone();
				thread::spawn(move || cache.get(addr).unwrap().unwrap())
			})
			.collect();
		let tiles: Vec<Tile> = threads.into_iter().map(|t| t.join().unwrap()).collect();

		assert_eq!(slow.gets.load(Ordering::SeqCst), 1);
		for tile in &tiles {
			assert!(Arc::ptr_eq(&tile.read(), &tiles[0].read()));
		}
	}
}
