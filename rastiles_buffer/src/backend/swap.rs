//! Swap-file backend: a single packed file of tile slots.
//!
//! ## File layout
//!
//! ```text
//! offset 0    64-byte header (see below)
//! offset 64   tile slots, `tile_bytes` each
//! slots end   address index, written at FLUSH
//! ```
//!
//! Header, little-endian:
//!
//! ```text
//! magic           12 bytes  "rastiles_v01"
//! tile_width      u32
//! tile_height     u32
//! format          u8        PixelFormat descriptor
//! extent          4 x i32   owning buffer's extent at last flush
//! free_head       u64       first free slot, u64::MAX = none
//! index_offset    u64       where the address index starts (= slots end)
//! index_count     u64       number of index entries
//! padding         zeros up to 64 bytes
//! ```
//!
//! Free slots chain through their first 8 bytes; the chain and the index are
//! written out at FLUSH, which is the durability point. A flushed file can be
//! reopened by a later process. An exclusive advisory lock is held for the
//! backend's lifetime, so header rewrites never race another process; within
//! the process the backend mutex serializes everything.

use super::{TileBackend, TileLayout};
use crate::{source::TileSource, tile::Tile};
use anyhow::{Context, Result, bail, ensure};
use fs2::FileExt;
use parking_lot::Mutex;
use rastiles_core::{
	PixelFormat, PixelRect, TileAddress, TileSize,
	io::{ValueReader, ValueWriter},
};
use std::{
	collections::HashMap,
	fs::{File, OpenOptions},
	io::{Read, Seek, SeekFrom, Write},
	path::{Path, PathBuf},
	sync::Arc,
};

const MAGIC: &[u8; 12] = b"rastiles_v01";
const HEADER_LENGTH: u64 = 64;
const NO_SLOT: u64 = u64::MAX;
const INDEX_ENTRY_LENGTH: u64 = 17; // x i32, y i32, z u8, slot u64

struct SwapHeader {
	tile_size: TileSize,
	format: PixelFormat,
	extent: PixelRect,
	free_head: u64,
	index_offset: u64,
	index_count: u64,
}

impl SwapHeader {
	fn to_bytes(&self) -> Result<Vec<u8>> {
		let mut writer = ValueWriter::new();
		writer.write_slice(MAGIC)?;
		writer.write_u32(self.tile_size.width)?;
		writer.write_u32(self.tile_size.height)?;
		writer.write_u8(self.format.descriptor())?;
		writer.write_i32(self.extent.x)?;
		writer.write_i32(self.extent.y)?;
		writer.write_i32(self.extent.width)?;
		writer.write_i32(self.extent.height)?;
		writer.write_u64(self.free_head)?;
		writer.write_u64(self.index_offset)?;
		writer.write_u64(self.index_count)?;
		writer.pad_to(HEADER_LENGTH)?;
		Ok(writer.into_bytes())
	}

	fn from_bytes(bytes: &[u8]) -> Result<SwapHeader> {
		ensure!(
			bytes.len() as u64 == HEADER_LENGTH,
			"a swap header is {HEADER_LENGTH} bytes, got {}",
			bytes.len()
		);
		let mut reader = ValueReader::new(bytes);
		let magic = reader.read_string(MAGIC.len())?;
		if magic.as_bytes() != MAGIC {
			bail!("not a swap file: bad magic {magic:?}");
		}
		let tile_size = TileSize::checked(reader.read_u32()?, reader.read_u32()?)?;
		let format = PixelFormat::from_descriptor(reader.read_u8()?)?;
		let extent = PixelRect::new(
			reader.read_i32()?,
			reader.read_i32()?,
			reader.read_i32()?,
			reader.read_i32()?,
		);
		Ok(SwapHeader {
			tile_size,
			format,
			extent,
			free_head: reader.read_u64()?,
			index_offset: reader.read_u64()?,
			index_count: reader.read_u64()?,
		})
	}
}

struct SwapState {
	file: File,
	index: HashMap<TileAddress, u64>,
	free: Vec<u64>,
	slot_count: u64,
	extent: Option<PixelRect>,
}

pub struct SwapBackend {
	layout: TileLayout,
	path: PathBuf,
	state: Mutex<SwapState>,
}

impl SwapBackend {
	/// Opens the swap file at `path` if it exists (validating its layout
	/// against the requested one), otherwise creates it.
	pub fn open_or_create(path: &Path, layout: TileLayout) -> Result<Arc<SwapBackend>> {
		if path.exists() {
			let backend = SwapBackend::open(path)?;
			ensure!(
				backend.layout == layout,
				"swap file {path:?} holds {:?} tiles, requested {:?}",
				backend.layout,
				layout
			);
			Ok(backend)
		} else {
			SwapBackend::create(path, layout)
		}
	}

	/// Creates a fresh swap file, failing if one already exists.
	pub fn create(path: &Path, layout: TileLayout) -> Result<Arc<SwapBackend>> {
		ensure!(
			layout.tile_bytes() >= 8,
			"tile payloads of {} bytes cannot hold a free-list link",
			layout.tile_bytes()
		);
		let mut file = OpenOptions::new()
			.read(true)
			.write(true)
			.create_new(true)
			.open(path)
			.with_context(|| format!("creating swap file {path:?}"))?;
		file
			.try_lock_exclusive()
			.with_context(|| format!("locking swap file {path:?}"))?;
		log::debug!("created swap file {path:?}");

		let header = SwapHeader {
			tile_size: layout.tile_size,
			format: layout.format,
			extent: PixelRect::zero(),
			free_head: NO_SLOT,
			index_offset: HEADER_LENGTH,
			index_count: 0,
		};
		file.write_all(&header.to_bytes()?)?;
		file.sync_all()?;

		Ok(Arc::new(SwapBackend {
			layout,
			path: path.to_path_buf(),
			state: Mutex::new(SwapState {
				file,
				index: HashMap::new(),
				free: Vec::new(),
				slot_count: 0,
				extent: None,
			}),
		}))
	}

	/// Opens an existing, previously flushed swap file; tile size and format
	/// come from its header.
	pub fn open(path: &Path) -> Result<Arc<SwapBackend>> {
		let mut file = OpenOptions::new()
			.read(true)
			.write(true)
			.open(path)
			.with_context(|| format!("opening swap file {path:?}"))?;
		file
			.try_lock_exclusive()
			.with_context(|| format!("locking swap file {path:?}"))?;

		let (header, layout, state) = SwapBackend::load(&mut file, path)?;
		Ok(Arc::new(SwapBackend {
			layout,
			path: path.to_path_buf(),
			state: Mutex::new(SwapState {
				file,
				index: state.0,
				free: state.1,
				slot_count: state.2,
				extent: if header.extent.is_empty() {
					None
				} else {
					Some(header.extent)
				},
			}),
		}))
	}

	#[allow(clippy::type_complexity)]
	fn load(
		file: &mut File,
		path: &Path,
	) -> Result<(SwapHeader, TileLayout, (HashMap<TileAddress, u64>, Vec<u64>, u64))> {
		let mut bytes = vec![0u8; HEADER_LENGTH as usize];
		file.seek(SeekFrom::Start(0))?;
		file
			.read_exact(&mut bytes)
			.with_context(|| format!("reading swap header of {path:?}"))?;
		let header = SwapHeader::from_bytes(&bytes)?;
		let layout = TileLayout::new(header.format, header.tile_size);
		let tile_bytes = layout.tile_bytes() as u64;

		ensure!(
			header.index_offset >= HEADER_LENGTH && (header.index_offset - HEADER_LENGTH) % tile_bytes == 0,
			"swap file {path:?} has a corrupt index offset"
		);
		let slot_count = (header.index_offset - HEADER_LENGTH) / tile_bytes;

		// address index
		let mut index = HashMap::with_capacity(header.index_count as usize);
		file.seek(SeekFrom::Start(header.index_offset))?;
		let mut entries = vec![0u8; (header.index_count * INDEX_ENTRY_LENGTH) as usize];
		file
			.read_exact(&mut entries)
			.with_context(|| format!("reading swap index of {path:?}"))?;
		let mut reader = ValueReader::new(&entries);
		for _ in 0..header.index_count {
			let x = reader.read_i32()?;
			let y = reader.read_i32()?;
			let z = reader.read_u8()?;
			let slot = reader.read_u64()?;
			ensure!(slot < slot_count, "swap index entry points past the slot region");
			index.insert(TileAddress::new(x, y, z), slot);
		}

		// free-list chain; bounded by the slot count so a corrupt chain
		// cannot loop forever
		let mut free = Vec::new();
		let mut next = header.free_head;
		while next != NO_SLOT {
			ensure!(next < slot_count, "swap free list points past the slot region");
			ensure!(
				free.len() as u64 <= slot_count,
				"swap free list of {path:?} is cyclic"
			);
			free.push(next);
			let mut link = [0u8; 8];
			file.seek(SeekFrom::Start(HEADER_LENGTH + next * tile_bytes))?;
			file.read_exact(&mut link)?;
			next = u64::from_le_bytes(link);
		}

		Ok((header, layout, (index, free, slot_count)))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn slot_offset(&self, slot: u64) -> u64 {
		HEADER_LENGTH + slot * self.layout.tile_bytes() as u64
	}
}

impl TileSource for SwapBackend {
	fn get(&self, address: TileAddress) -> Result<Option<Tile>> {
		let mut state = self.state.lock();
		let Some(&slot) = state.index.get(&address) else {
			return Ok(None);
		};
		let offset = self.slot_offset(slot);
		let mut payload = vec![0u8; self.layout.tile_bytes()];
		state.file.seek(SeekFrom::Start(offset))?;
		state
			.file
			.read_exact(&mut payload)
			.with_context(|| format!("reading {address:?} from swap file {:?}", self.path))?;
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
		let mut state = self.state.lock();
		let slot = match state.index.get(&address).copied() {
			Some(slot) => slot,
			None => {
				let slot = match state.free.pop() {
					Some(slot) => slot,
					None => {
						let next = state.slot_count;
						state.slot_count += 1;
						next
					}
				};
				state.index.insert(address, slot);
				slot
			}
		};
		let offset = self.slot_offset(slot);
		state.file.seek(SeekFrom::Start(offset))?;
		state
			.file
			.write_all(&payload)
			.with_context(|| format!("writing {address:?} to swap file {:?}", self.path))?;
		tile.mark_stored();
		Ok(())
	}

	fn exist(&self, address: TileAddress) -> Result<bool> {
		Ok(self.state.lock().index.contains_key(&address))
	}

	fn void(&self, address: TileAddress) -> Result<()> {
		let mut state = self.state.lock();
		if let Some(slot) = state.index.remove(&address) {
			state.free.push(slot);
		}
		Ok(())
	}

	fn flush(&self) -> Result<()> {
		let mut state = self.state.lock();
		let tile_bytes = self.layout.tile_bytes() as u64;
		let index_offset = HEADER_LENGTH + state.slot_count * tile_bytes;

		// persist the free-list chain through the slots
		let SwapState { file, free, .. } = &mut *state;
		for (i, &slot) in free.iter().enumerate() {
			let next = free.get(i + 1).copied().unwrap_or(NO_SLOT);
			file.seek(SeekFrom::Start(HEADER_LENGTH + slot * tile_bytes))?;
			file.write_all(&next.to_le_bytes())?;
		}

		// address index after the last slot
		let mut writer = ValueWriter::new();
		for (address, slot) in &state.index {
			writer.write_i32(address.x)?;
			writer.write_i32(address.y)?;
			writer.write_u8(address.z)?;
			writer.write_u64(*slot)?;
		}
		let entries = writer.into_bytes();
		state.file.seek(SeekFrom::Start(index_offset))?;
		state.file.write_all(&entries)?;
		state.file.set_len(index_offset + entries.len() as u64)?;

		let header = SwapHeader {
			tile_size: self.layout.tile_size,
			format: self.layout.format,
			extent: state.extent.unwrap_or_else(PixelRect::zero),
			free_head: state.free.first().copied().unwrap_or(NO_SLOT),
			index_offset,
			index_count: state.index.len() as u64,
		};
		state.file.seek(SeekFrom::Start(0))?;
		state.file.write_all(&header.to_bytes()?)?;
		state
			.file
			.sync_all()
			.with_context(|| format!("syncing swap file {:?}", self.path))?;
		Ok(())
	}

	fn reinit(&self) -> Result<()> {
		let mut state = self.state.lock();
		let (header, layout, (index, free, slot_count)) = SwapBackend::load(&mut state.file, &self.path)?;
		ensure!(
			layout == self.layout,
			"swap file {:?} changed layout under us",
			self.path
		);
		state.index = index;
		state.free = free;
		state.slot_count = slot_count;
		state.extent = if header.extent.is_empty() {
			None
		} else {
			Some(header.extent)
		};
		Ok(())
	}
}

impl TileBackend for SwapBackend {
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
