//! The tile command surface shared by handlers and backends.
//!
//! Every link of a handler chain implements [`TileSource`]; handlers hold an
//! `Arc<dyn TileSource>` to their downstream source and forward the commands
//! they do not intercept. The chain ends at a backend.

use crate::tile::Tile;
use anyhow::Result;
use rastiles_core::TileAddress;
use std::sync::Arc;

/// Names of the tile commands, used for tracing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TileCommand {
	Get,
	Set,
	Exist,
	IsCached,
	Void,
	Flush,
	Reinit,
	Copy,
}

/// One link in a handler chain: transforms or intercepts tile commands on
/// their way to the backend.
///
/// A `get` that returns a tile returns it at the requested address. Handlers
/// that retain returned tiles hold references (the payload is copy-on-write)
/// and drop them on `void` and `reinit`.
pub trait TileSource: Send + Sync {
	/// Fetches the tile at `address`, or `None` if this source and everything
	/// below it has no tile there.
	fn get(&self, address: TileAddress) -> Result<Option<Tile>>;

	/// Adopts `tile` as the contents at `address`.
	fn set(&self, address: TileAddress, tile: &Tile) -> Result<()>;

	/// Presence check without materialization.
	fn exist(&self, address: TileAddress) -> Result<bool>;

	/// Whether the tile is held in a cache at or below this source.
	fn is_cached(&self, address: TileAddress) -> bool {
		let _ = address;
		false
	}

	/// Deletes any contents at `address`.
	fn void(&self, address: TileAddress) -> Result<()>;

	/// Persists all in-memory dirty state; synchronous.
	fn flush(&self) -> Result<()>;

	/// Discards all volatile state (used when a shared backend is reopened).
	fn reinit(&self) -> Result<()>;

	/// Copies the tile at `from` into `destination` at `to` by payload
	/// sharing; the byte copy is deferred to the next write lock.
	fn copy(&self, from: TileAddress, destination: &Arc<dyn TileSource>, to: TileAddress) -> Result<bool> {
		match self.get(from)? {
			Some(tile) => {
				destination.set(to, &tile.share_payload(to))?;
				Ok(true)
			}
			None => Ok(false),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use parking_lot::Mutex;
	use std::collections::HashMap;

	/// Minimal in-memory source for exercising the provided `copy`.
	#[derive(Default)]
	struct MapSource {
		tiles: Mutex<HashMap<TileAddress, Tile>>,
	}

	impl TileSource for MapSource {
		fn get(&self, address: TileAddress) -> Result<Option<Tile>> {
			Ok(self.tiles.lock().get(&address).cloned())
		}
		fn set(&self, address: TileAddress, tile: &Tile) -> Result<()> {
			self.tiles.lock().insert(address, tile.clone());
			Ok(())
		}
		fn exist(&self, address: TileAddress) -> Result<bool> {
			Ok(self.tiles.lock().contains_key(&address))
		}
		fn void(&self, address: TileAddress) -> Result<()> {
			self.tiles.lock().remove(&address);
			Ok(())
		}
		fn flush(&self) -> Result<()> {
			Ok(())
		}
		fn reinit(&self) -> Result<()> {
			self.tiles.lock().clear();
			Ok(())
		}
	}

	#[test]
	fn copy_shares_payload_across_sources() {
		let src = Arc::new(MapSource::default());
		let dst: Arc<dyn TileSource> = Arc::new(MapSource::default());

		let a = TileAddress::new(0, 0, 0);
		let b = TileAddress::new(4, 4, 0);
		src
			.set(a, &Tile::new(a, std::sync::Arc::new(vec![7u8; 16])))
			.unwrap();

		assert!(src.copy(a, &dst, b).unwrap());
		let copied = dst.get(b).unwrap().unwrap();
		assert_eq!(copied.address(), b);
		assert_eq!(copied.read().as_slice(), &[7u8; 16]);

		// missing source tile reports false
		assert!(!src.copy(TileAddress::new(9, 9, 0), &dst, b).unwrap());
	}
}
