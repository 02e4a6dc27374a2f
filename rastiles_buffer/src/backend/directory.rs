//! Tile-directory backend: one file per tile.
//!
//! Tiles live at `<root>/<z>/<x>/<y>.tile`; the raw payload is the entire
//! file, there is no header. SET writes through immediately, so FLUSH is a
//! no-op. Negative grid coordinates appear verbatim in the path
//! (`<root>/0/-2/5.tile`).

use super::{TileBackend, TileLayout};
use crate::{source::TileSource, tile::Tile};
use anyhow::{Context, Result, ensure};
use parking_lot::Mutex;
use rastiles_core::{PixelRect, TileAddress};
use std::{
	fs, io,
	path::{Path, PathBuf},
	sync::Arc,
};

pub struct DirectoryBackend {
	dir: PathBuf,
	layout: TileLayout,
	extent: Mutex<Option<PixelRect>>,
}

impl DirectoryBackend {
	/// Opens (creating if necessary) a tile directory rooted at `dir`.
	pub fn new(dir: &Path, layout: TileLayout) -> Result<DirectoryBackend> {
		fs::create_dir_all(dir).with_context(|| format!("creating tile directory {dir:?}"))?;
		ensure!(dir.is_dir(), "path {dir:?} is not a directory");
		Ok(DirectoryBackend {
			dir: dir.to_path_buf(),
			layout,
			extent: Mutex::new(None),
		})
	}

	fn tile_path(&self, address: TileAddress) -> PathBuf {
		self
			.dir
			.join(address.z.to_string())
			.join(address.x.to_string())
			.join(format!("{}.tile", address.y))
	}
}

impl TileSource for DirectoryBackend {
	fn get(&self, address: TileAddress) -> Result<Option<Tile>> {
		let path = self.tile_path(address);
		let payload = match fs::read(&path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e).with_context(|| format!("reading tile file {path:?}")),
		};
		ensure!(
			payload.len() == self.layout.tile_bytes(),
			"tile file {path:?} is {} bytes, expected {}",
			payload.len(),
			self.layout.tile_bytes()
		);
		Ok(Some(Tile::new(address, Arc::new(payload))))
	}

	fn set(&self, address: TileAddress, tile: &Tile) -> Result<()> {
		let payload = tile.read();
		ensure!(
			payload.len() == self.layout.tile_bytes(),
			"tile payload is {} bytes, backend expects {}",
			payload.len(),
			self.layout.tile_bytes()
		);
		let path = self.tile_path(address);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).with_context(|| format!("creating {parent:?}"))?;
		}
		fs::write(&path, payload.as_slice()).with_context(|| format!("writing tile file {path:?}"))?;
		tile.mark_stored();
		Ok(())
	}

	fn exist(&self, address: TileAddress) -> Result<bool> {
		Ok(self.tile_path(address).is_file())
	}

	fn void(&self, address: TileAddress) -> Result<()> {
		let path = self.tile_path(address);
		match fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e).with_context(|| format!("deleting tile file {path:?}")),
		}
	}

	fn flush(&self) -> Result<()> {
		Ok(())
	}

	fn reinit(&self) -> Result<()> {
		Ok(())
	}
}

impl TileBackend for DirectoryBackend {
	fn layout(&self) -> TileLayout {
		self.layout
	}

	fn extent(&self) -> Option<PixelRect> {
		*self.extent.lock()
	}

	fn set_extent(&self, extent: PixelRect) {
		*self.extent.lock() = Some(extent);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rastiles_core::{PixelFormat, TileSize};
	use tempfile::TempDir;

	fn small_layout() -> TileLayout {
		TileLayout::new(PixelFormat::RGBA_U8, TileSize::new(2, 2))
	}

	#[test]
	fn set_get_void_round_trip() {
		let dir = TempDir::new().unwrap();
		let backend = DirectoryBackend::new(dir.path(), small_layout()).unwrap();
		let addr = TileAddress::new(-2, 5, 1);
		let tile = Tile::new(addr, Arc::new(vec![3u8; 16]));

		assert!(backend.get(addr).unwrap().is_none());
		backend.set(addr, &tile).unwrap();
		assert!(dir.path().join("1").join("-2").join("5.tile").is_file());
		assert!(backend.exist(addr).unwrap());
		assert_eq!(backend.get(addr).unwrap().unwrap().read().as_slice(), &[3u8; 16]);

		backend.void(addr).unwrap();
		assert!(!backend.exist(addr).unwrap());
		// voiding an absent tile is fine
		backend.void(addr).unwrap();
	}

	#[test]
	fn survives_reopen() {
		let dir = TempDir::new().unwrap();
		let addr = TileAddress::new(0, 0, 0);
		{
			let backend = DirectoryBackend::new(dir.path(), small_layout()).unwrap();
			backend
				.set(addr, &Tile::new(addr, Arc::new(vec![8u8; 16])))
				.unwrap();
			backend.flush().unwrap();
		}
		let backend = DirectoryBackend::new(dir.path(), small_layout()).unwrap();
		assert_eq!(backend.get(addr).unwrap().unwrap().read().as_slice(), &[8u8; 16]);
	}

	#[test]
	fn rejects_truncated_tile_files() {
		let dir = TempDir::new().unwrap();
		let backend = DirectoryBackend::new(dir.path(), small_layout()).unwrap();
		let path = dir.path().join("0").join("0");
		fs::create_dir_all(&path).unwrap();
		fs::write(path.join("0.tile"), [0u8; 3]).unwrap();
		assert!(backend.get(TileAddress::new(0, 0, 0)).is_err());
	}
}
