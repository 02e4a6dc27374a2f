//! Tile backends: the persistence end of every handler chain.
//!
//! A backend maps tile addresses to persisted payloads. Three variants exist:
//! an in-memory map, a directory with one file per tile, and a single packed
//! swap file with a free list. Within one backend, operations are serialized
//! by its mutex; no ordering is promised across backends.

mod directory;
mod ram;
mod swap;

pub use directory::DirectoryBackend;
pub use ram::RamBackend;
pub use swap::SwapBackend;

use crate::source::TileSource;
use anyhow::Result;
use rastiles_core::{PixelFormat, PixelRect, TileSize};
use std::{path::PathBuf, sync::Arc};

/// Pixel format and tile dimensions shared by a storage and every link of
/// its chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TileLayout {
	pub format: PixelFormat,
	pub tile_size: TileSize,
}

impl TileLayout {
	pub const fn new(format: PixelFormat, tile_size: TileSize) -> TileLayout {
		TileLayout { format, tile_size }
	}

	/// Byte length of one tile payload.
	pub fn tile_bytes(&self) -> usize {
		self.tile_size.bytes_for(self.format)
	}
}

/// Which persistence variant backs a storage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendKind {
	/// Hash map in process memory.
	Ram,
	/// One file per tile under this directory.
	Directory(PathBuf),
	/// Single packed swap file at this path.
	Swap(PathBuf),
}

/// A tile source that persists: the terminal link of a chain.
pub trait TileBackend: TileSource {
	fn layout(&self) -> TileLayout;

	/// The extent recorded for the backing store, if any. `None` means the
	/// infinite plane; addresses are never rejected based on it.
	fn extent(&self) -> Option<PixelRect>;

	/// Records the owning buffer's extent (persisted at the next flush for
	/// on-disk backends).
	fn set_extent(&self, extent: PixelRect);
}

/// The two trait views of one backend: the command surface the chain is
/// built on, and the backend extras (layout, extent).
#[derive(Clone)]
pub struct BackendHandles {
	pub backend: Arc<dyn TileBackend>,
	pub source: Arc<dyn TileSource>,
}

impl BackendHandles {
	pub fn new<B: TileBackend + 'static>(backend: Arc<B>) -> BackendHandles {
		BackendHandles {
			source: backend.clone(),
			backend,
		}
	}
}

/// Constructs a backend of the requested kind.
pub fn create_backend(kind: &BackendKind, layout: TileLayout) -> Result<BackendHandles> {
	Ok(match kind {
		BackendKind::Ram => BackendHandles::new(Arc::new(RamBackend::new(layout))),
		BackendKind::Directory(path) => BackendHandles::new(Arc::new(DirectoryBackend::new(path, layout)?)),
		BackendKind::Swap(path) => BackendHandles::new(SwapBackend::open_or_create(path, layout)?),
	})
}
