//! Tiles: fixed-size blocks of pixels, the unit of caching and persistence.
//!
//! A [`Tile`] is a cheaply clonable handle to one payload of
//! `tile_width * tile_height * bytes_per_pixel` bytes in the storage format.
//! The payload itself is reference-counted and copy-on-write: caches and
//! backends snapshot it by cloning the inner `Arc`, and the first mutable
//! access after such a snapshot clones the bytes. Readers therefore always
//! observe either the pre-write or the post-write payload of a tile, never a
//! torn mix.
//!
//! Mutation is only possible through [`Tile::lock_write`], whose guard keeps
//! the lock counter balanced and bumps the revision when the payload was
//! touched. A tile whose revision is ahead of its persisted revision "needs
//! store"; the cache flushes such tiles downstream before evicting them, and
//! as a last resort a dirty tile writes itself back through a weak storage
//! reference when its final handle is dropped.

use parking_lot::{Mutex, MutexGuard};
use rastiles_core::TileAddress;
use std::sync::{Arc, Weak};

/// Receiver for last-resort write-back of dirty tiles, implemented by the
/// tile storage. The tile holds it weakly; persistence stays owned by the
/// storage and its chain.
pub trait TileWriteBack: Send + Sync {
	fn write_back(&self, address: TileAddress, payload: Arc<Vec<u8>>);
}

struct TileState {
	data: Arc<Vec<u8>>,
	rev: u64,
	stored_rev: u64,
	lock_count: u32,
	write_back: Weak<dyn TileWriteBack>,
}

struct TileInner {
	address: TileAddress,
	state: Mutex<TileState>,
}

/// A handle to one tile. Cloning the handle shares the tile; see
/// [`Tile::share_payload`] for creating a distinct tile over the same bytes.
#[derive(Clone)]
pub struct Tile {
	inner: Arc<TileInner>,
}

impl Tile {
	/// Wraps a payload as a clean tile at `address`.
	pub fn new(address: TileAddress, data: Arc<Vec<u8>>) -> Tile {
		Tile {
			inner: Arc::new(TileInner {
				address,
				state: Mutex::new(TileState {
					data,
					rev: 0,
					stored_rev: 0,
					lock_count: 0,
					write_back: Weak::<NoWriteBack>::new(),
				}),
			}),
		}
	}

	pub fn address(&self) -> TileAddress {
		self.inner.address
	}

	/// Byte length of the payload.
	pub fn size(&self) -> usize {
		self.inner.state.lock().data.len()
	}

	/// Snapshot of the payload. The snapshot is immutable: a subsequent write
	/// copies the bytes before mutating them.
	pub fn read(&self) -> Arc<Vec<u8>> {
		self.inner.state.lock().data.clone()
	}

	/// Locks the tile for writing. The payload copy implied by shared
	/// snapshots is deferred until the guard's first `data_mut` call.
	pub fn lock_write(&self) -> TileWriteGuard<'_> {
		let mut state = self.inner.state.lock();
		state.lock_count += 1;
		TileWriteGuard { state, touched: false }
	}

	/// Creates a new tile at `address` sharing this tile's payload bytes.
	/// The byte copy is deferred to the next write lock on either tile.
	pub fn share_payload(&self, address: TileAddress) -> Tile {
		Tile::new(address, self.read())
	}

	pub fn revision(&self) -> u64 {
		self.inner.state.lock().rev
	}

	/// Whether the persisted revision matches the current one.
	pub fn is_stored(&self) -> bool {
		let state = self.inner.state.lock();
		state.rev == state.stored_rev
	}

	pub fn needs_store(&self) -> bool {
		!self.is_stored()
	}

	/// Marks the current revision as persisted.
	pub fn mark_stored(&self) {
		let mut state = self.inner.state.lock();
		state.stored_rev = state.rev;
	}

	/// Bumps the revision without a write lock; used when a tile adopts a
	/// payload (tile copies) rather than being mutated through a guard.
	pub fn mark_modified(&self) {
		let mut state = self.inner.state.lock();
		state.rev += 1;
	}

	/// Marks the contents as undefined; the tile no longer needs store and
	/// will not write itself back.
	pub fn void(&self) {
		let mut state = self.inner.state.lock();
		state.stored_rev = state.rev;
		state.write_back = Weak::<NoWriteBack>::new();
	}

	/// Current writer lock count; zero at quiescence.
	pub fn lock_count(&self) -> u32 {
		self.inner.state.lock().lock_count
	}

	/// Attaches the storage back-reference used for last-resort write-back.
	pub fn attach_write_back(&self, target: Weak<dyn TileWriteBack>) {
		self.inner.state.lock().write_back = target;
	}
}

impl std::fmt::Debug for Tile {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("Tile")
			.field("address", &self.inner.address)
			.field("rev", &state.rev)
			.field("stored_rev", &state.stored_rev)
			.field("lock_count", &state.lock_count)
			.finish()
	}
}

impl Drop for TileInner {
	fn drop(&mut self) {
		let state = self.state.get_mut();
		if state.rev != state.stored_rev {
			if let Some(target) = state.write_back.upgrade() {
				target.write_back(self.address, state.data.clone());
			}
		}
	}
}

/// Placeholder target for tiles that have no storage attached yet.
struct NoWriteBack;
impl TileWriteBack for NoWriteBack {
	fn write_back(&self, _address: TileAddress, _payload: Arc<Vec<u8>>) {}
}

/// Write access to a tile payload. Dropping the guard releases the lock and
/// bumps the revision if the payload was touched.
pub struct TileWriteGuard<'a> {
	state: MutexGuard<'a, TileState>,
	touched: bool,
}

impl TileWriteGuard<'_> {
	/// Mutable payload access; performs the copy-on-write if the payload is
	/// shared with snapshots or other tiles.
	pub fn data_mut(&mut self) -> &mut [u8] {
		self.touched = true;
		Arc::make_mut(&mut self.state.data).as_mut_slice()
	}
}

impl Drop for TileWriteGuard<'_> {
	fn drop(&mut self) {
		debug_assert!(self.state.lock_count > 0, "unpaired tile unlock");
		self.state.lock_count -= 1;
		if self.touched {
			self.state.rev += 1;
		}
	}
}
