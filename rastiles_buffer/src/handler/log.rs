//! Log handler: optional tracing of tile commands on their way down a chain.

use crate::{
	source::{TileCommand, TileSource},
	tile::Tile,
};
use anyhow::Result;
use rastiles_core::TileAddress;
use std::sync::Arc;

pub struct LogHandler {
	next: Arc<dyn TileSource>,
	name: String,
}

impl LogHandler {
	pub fn new(next: Arc<dyn TileSource>, name: impl Into<String>) -> LogHandler {
		LogHandler { next, name: name.into() }
	}

	fn trace(&self, command: TileCommand, address: Option<TileAddress>) {
		match address {
			Some(address) => log::trace!("{}: {command:?} {address:?}", self.name),
			None => log::trace!("{}: {command:?}", self.name),
		}
	}
}

impl TileSource for LogHandler {
	fn get(&self, address: TileAddress) -> Result<Option<Tile>> {
		self.trace(TileCommand::Get, Some(address));
		self.next.get(address)
	}

	fn set(&self, address: TileAddress, tile: &Tile) -> Result<()> {
		self.trace(TileCommand::Set, Some(address));
		self.next.set(address, tile)
	}

	fn exist(&self, address: TileAddress) -> Result<bool> {
		self.trace(TileCommand::Exist, Some(address));
		self.next.exist(address)
	}

	fn is_cached(&self, address: TileAddress) -> bool {
		self.trace(TileCommand::IsCached, Some(address));
		self.next.is_cached(address)
	}

	fn void(&self, address: TileAddress) -> Result<()> {
		self.trace(TileCommand::Void, Some(address));
		self.next.void(address)
	}

	fn flush(&self) -> Result<()> {
		self.trace(TileCommand::Flush, None);
		self.next.flush()
	}

	fn reinit(&self) -> Result<()> {
		self.trace(TileCommand::Reinit, None);
		self.next.reinit()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::{RamBackend, TileLayout};
	use rastiles_core::{PixelFormat, TileSize};
	use std::sync::Arc;

	#[test]
	fn commands_pass_through() {
		let layout = TileLayout::new(PixelFormat::RGBA_U8, TileSize::new(2, 2));
		let backend = Arc::new(RamBackend::new(layout));
		let handler = LogHandler::new(backend.clone(), "test");

		let addr = TileAddress::new(0, 0, 0);
		let tile = Tile::new(addr, Arc::new(vec![1u8; 16]));
		handler.set(addr, &tile).unwrap();
		assert!(handler.exist(addr).unwrap());
		assert_eq!(handler.get(addr).unwrap().unwrap().read().as_slice(), &[1u8; 16]);
		handler.void(addr).unwrap();
		assert!(!backend.exist(addr).unwrap());
		handler.flush().unwrap();
		handler.reinit().unwrap();
	}
}
