//! Process-wide configuration for the buffer subsystem.
//!
//! The configuration is a single lazily-initialized value with internal
//! locking. Readers take a cheap snapshot via [`config`]; mutations go through
//! [`update_config`] and affect storages constructed afterwards (existing
//! storages keep the parameters they were built with).
//!
//! # Examples
//!
//! ```
//! use rastiles_core::{config, update_config, TileSize};
//!
//! update_config(|c| c.tile_size = TileSize::new(64, 64));
//! assert_eq!(config().tile_size, TileSize::new(64, 64));
//! # update_config(|c| c.tile_size = rastiles_core::DEFAULT_TILE_SIZE);
//! ```

use crate::{DEFAULT_TILE_SIZE, TileSize};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::{
	path::PathBuf,
	process,
	sync::atomic::{AtomicU64, Ordering},
};

/// Where buffers without an explicit backend keep their tiles.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum SwapMode {
	/// Tiles stay in process memory.
	#[default]
	Ram,
	/// Tiles swap to a packed file under this directory.
	Path(PathBuf),
}

/// Process-wide defaults consulted at storage construction time.
#[derive(Clone, Debug)]
pub struct Config {
	/// Backend selection for buffers constructed without one.
	pub swap: SwapMode,
	/// Tile dimensions for newly constructed storages.
	pub tile_size: TileSize,
	/// Process-wide tile-cache byte budget.
	pub cache_size: usize,
	/// Precision hint for the pixel format adapter.
	pub conversion_tolerance: f64,
}

impl Default for Config {
	fn default() -> Config {
		Config {
			swap: SwapMode::Ram,
			tile_size: DEFAULT_TILE_SIZE,
			cache_size: 128 * 1024 * 1024,
			conversion_tolerance: 1e-7,
		}
	}
}

lazy_static! {
	static ref CONFIG: RwLock<Config> = RwLock::new(Config::default());
}

static SWAP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns a snapshot of the current configuration.
pub fn config() -> Config {
	CONFIG.read().clone()
}

/// Applies a mutation to the process-wide configuration.
pub fn update_config<F: FnOnce(&mut Config)>(f: F) {
	f(&mut CONFIG.write());
}

/// Generates a unique swap file path under `dir` of the shape `<pid>-<n>`.
pub fn next_swap_path(dir: &std::path::Path) -> PathBuf {
	let n = SWAP_COUNTER.fetch_add(1, Ordering::Relaxed);
	dir.join(format!("{}-{}", process::id(), n))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let c = Config::default();
		assert_eq!(c.swap, SwapMode::Ram);
		assert_eq!(c.tile_size, TileSize::new(128, 64));
		assert_eq!(c.cache_size, 128 * 1024 * 1024);
	}

	#[test]
	fn swap_paths_are_unique_and_pid_prefixed() {
		let dir = std::env::temp_dir();
		let a = next_swap_path(&dir);
		let b = next_swap_path(&dir);
		assert_ne!(a, b);
		let name = a.file_name().unwrap().to_string_lossy().into_owned();
		assert!(name.starts_with(&format!("{}-", process::id())));
	}
}
