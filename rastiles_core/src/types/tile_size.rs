//! This module defines the `TileSize` structure, the fixed pixel dimensions shared by
//! every tile of one storage.

use crate::PixelFormat;
use anyhow::{Result, ensure};
use std::fmt::{self, Debug};

/// Width and height, in pixels, of every tile in a storage.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct TileSize {
	pub width: u32,
	pub height: u32,
}

/// The default tile dimensions for newly constructed storages.
pub const DEFAULT_TILE_SIZE: TileSize = TileSize::new(128, 64);

impl TileSize {
	pub const fn new(width: u32, height: u32) -> TileSize {
		TileSize { width, height }
	}

	/// Validating constructor for sizes coming from configuration or file
	/// headers.
	pub fn checked(width: u32, height: u32) -> Result<TileSize> {
		ensure!(width > 0, "tile width must be > 0");
		ensure!(height > 0, "tile height must be > 0");
		ensure!(
			width <= 8192 && height <= 8192,
			"tile size {width}x{height} is unreasonably large"
		);
		Ok(TileSize { width, height })
	}

	pub fn pixel_count(&self) -> usize {
		self.width as usize * self.height as usize
	}

	/// Byte length of one tile payload in the given format.
	pub fn bytes_for(&self, format: PixelFormat) -> usize {
		self.pixel_count() * format.bytes_per_pixel()
	}
}

impl Debug for TileSize {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!("TileSize({}x{})", &self.width, &self.height))
	}
}
