//! Buffers: the user-visible view onto a tile storage.
//!
//! A buffer adds view parameters (extent, abyss, cumulative shift, soft
//! format) on top of a shared [`TileStorage`]. Sub-buffers share their
//! parent's tiles; only the view differs. View coordinate `(x, y)` maps to
//! storage coordinate `(x + shift_x, y + shift_y)`.
//!
//! # Examples
//!
//! ```
//! use rastiles_buffer::{Buffer, RepeatMode};
//! use rastiles_core::{PixelFormat, PixelRect};
//!
//! let buffer = Buffer::new(PixelRect::new(0, 0, 256, 256), PixelFormat::RGBA_U8).unwrap();
//! buffer.set_pixel(10, 10, PixelFormat::RGBA_U8, &[255, 0, 0, 255]).unwrap();
//!
//! let sub = buffer.create_sub_buffer(PixelRect::new(10, 10, 100, 100)).unwrap();
//! let mut pixel = [0u8; 4];
//! sub.get_pixel(0, 0, PixelFormat::RGBA_U8, &mut pixel, RepeatMode::None).unwrap();
//! assert_eq!(pixel, [255, 0, 0, 255]);
//! ```

mod access;
mod share;

pub use share::{buffer_uri, open_shared, release_shared};

use crate::{
	backend::{BackendHandles, BackendKind, TileLayout, create_backend},
	storage::{StorageOptions, TileStorage},
};
use anyhow::{Context, Result, bail, ensure};
use parking_lot::{Mutex, RwLock};
use rastiles_core::{PixelFormat, PixelRect, SwapMode, TileSize, config, next_swap_path};
use std::{path::PathBuf, sync::Arc};

/// Abyss policy: what reads outside the abyss rectangle produce.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RepeatMode {
	/// Leave the destination untouched.
	#[default]
	None,
	/// Extend the nearest edge pixel.
	Clamp,
	/// Tile the abyss.
	Loop,
	/// Opaque black: zero color, full alpha.
	Black,
	/// All channels full.
	White,
}

/// Construction parameters for [`Buffer::with_options`]. Unset fields follow
/// the inheritance ladder described on each.
#[derive(Clone, Default)]
pub struct BufferOptions {
	/// Share this buffer's storage instead of creating one; `shift` then
	/// applies relative to it.
	pub source: Option<Buffer>,
	/// The view rectangle. Unset: inherited from the source buffer, the
	/// backend's recorded extent, or empty.
	pub extent: Option<PixelRect>,
	/// All-zero: track the extent. Width or height of -1: inherit the
	/// source's abyss, shifted. Anything else is intersected with the
	/// source's abyss.
	pub abyss: PixelRect,
	/// View-to-storage shift, added to the source's cumulative shift.
	pub shift_x: i32,
	pub shift_y: i32,
	/// Storage format for new storages; defaults to RGBA f32.
	pub format: Option<PixelFormat>,
	/// Tile dimensions for new storages; defaults to the configured size.
	pub tile_size: Option<TileSize>,
	/// Swap file path; implies a swap backend.
	pub path: Option<PathBuf>,
	/// Explicit backend choice, overriding configuration.
	pub backend: Option<BackendKind>,
	/// Chain tuning for new storages.
	pub storage: StorageOptions,
}

struct BufferView {
	extent: PixelRect,
	abyss: PixelRect,
	abyss_tracks_extent: bool,
}

struct BufferInner {
	storage: Arc<TileStorage>,
	// kept alive so shared tiles cannot outlive the chain they came from
	#[allow(dead_code)]
	parent: Option<Buffer>,
	shift_x: i32,
	shift_y: i32,
	view: RwLock<BufferView>,
	soft_format: RwLock<PixelFormat>,
	listener_ids: Mutex<Vec<u64>>,
}

impl Drop for BufferInner {
	fn drop(&mut self) {
		for id in self.listener_ids.get_mut().drain(..) {
			self.storage.remove_listener(id);
		}
		self.storage.drop_hot_tile();
	}
}

/// A reference-counted handle to a buffer view; cloning shares the view.
#[derive(Clone)]
pub struct Buffer {
	inner: Arc<BufferInner>,
}

impl Buffer {
	/// Creates a buffer with the given extent and storage format, choosing
	/// the backend from the process configuration (RAM unless a swap
	/// directory is configured).
	pub fn new(extent: PixelRect, format: PixelFormat) -> Result<Buffer> {
		Buffer::with_options(BufferOptions {
			extent: Some(extent),
			format: Some(format),
			..BufferOptions::default()
		})
	}

	/// Creates a buffer following the full construction ladder.
	pub fn with_options(options: BufferOptions) -> Result<Buffer> {
		match options.source.clone() {
			Some(parent) => Buffer::build_view(parent, options),
			None => {
				let storage = Buffer::build_storage(&options)?;
				Buffer::build_root(storage, options)
			}
		}
	}

	/// Opens a previously flushed swap file; format, tile size and extent
	/// come from its header.
	pub fn open_swap(path: &std::path::Path) -> Result<Buffer> {
		let backend = crate::backend::SwapBackend::open(path)?;
		let handles = BackendHandles::new(backend);
		let extent = handles.backend.extent();
		let storage = TileStorage::new(handles, StorageOptions::default());
		Buffer::build_root(
			storage,
			BufferOptions {
				extent,
				..BufferOptions::default()
			},
		)
	}

	fn build_storage(options: &BufferOptions) -> Result<Arc<TileStorage>> {
		let cfg = config();
		let format = options.format.unwrap_or(PixelFormat::RGBA_F32);
		let tile_size = match options.tile_size {
			Some(size) => TileSize::checked(size.width, size.height)?,
			None => cfg.tile_size,
		};
		let layout = TileLayout::new(format, tile_size);

		let kind = match (&options.backend, &options.path, &cfg.swap) {
			(Some(kind), _, _) => kind.clone(),
			(None, Some(path), _) => BackendKind::Swap(path.clone()),
			(None, None, SwapMode::Ram) => BackendKind::Ram,
			(None, None, SwapMode::Path(dir)) => BackendKind::Swap(next_swap_path(dir)),
		};
		let handles = create_backend(&kind, layout)?;
		Ok(TileStorage::new(handles, options.storage.clone()))
	}

	fn build_root(storage: Arc<TileStorage>, options: BufferOptions) -> Result<Buffer> {
		if let Some(format) = options.format {
			ensure!(
				format == storage.format(),
				"buffer format {:?} does not match storage format {:?}",
				format,
				storage.format()
			);
		}
		let extent = options
			.extent
			.or_else(|| storage.backend_extent())
			.unwrap_or_else(PixelRect::zero);

		let (abyss, tracks) = Buffer::resolve_abyss(options.abyss, extent, None, 0, 0);
		let format = storage.format();
		Ok(Buffer {
			inner: Arc::new(BufferInner {
				storage,
				parent: None,
				shift_x: options.shift_x,
				shift_y: options.shift_y,
				view: RwLock::new(BufferView {
					extent,
					abyss,
					abyss_tracks_extent: tracks,
				}),
				soft_format: RwLock::new(format),
				listener_ids: Mutex::new(Vec::new()),
			}),
		})
	}

	fn build_view(parent: Buffer, options: BufferOptions) -> Result<Buffer> {
		if let Some(format) = options.format {
			ensure!(
				format == parent.inner.storage.format(),
				"a view cannot change the storage format (got {:?}, storage holds {:?})",
				format,
				parent.inner.storage.format()
			);
		}
		let extent = options.extent.unwrap_or_else(|| parent.extent());
		ensure!(
			extent.width >= 0 && extent.height >= 0,
			"negative extent {extent:?} for a view"
		);

		let shift_x = options.shift_x + parent.inner.shift_x;
		let shift_y = options.shift_y + parent.inner.shift_y;

		let (mut abyss, mut tracks) =
			Buffer::resolve_abyss(options.abyss, extent, Some(&parent), options.shift_x, options.shift_y);

		// the effective abyss never exceeds the parent's, shifted into this
		// view's coordinates
		let parent_abyss = parent.abyss().translated(-options.shift_x, -options.shift_y);
		let intersected = parent_abyss.intersection(&abyss);
		// if clipping changed the abyss, setting the extent to itself must
		// not grow it back, so tracking stops
		if tracks && intersected != extent {
			tracks = false;
		}
		abyss = intersected;

		let format = parent.inner.storage.format();
		Ok(Buffer {
			inner: Arc::new(BufferInner {
				storage: parent.inner.storage.clone(),
				shift_x,
				shift_y,
				parent: Some(parent),
				view: RwLock::new(BufferView {
					extent,
					abyss,
					abyss_tracks_extent: tracks,
				}),
				soft_format: RwLock::new(format),
				listener_ids: Mutex::new(Vec::new()),
			}),
		})
	}

	fn resolve_abyss(
		requested: PixelRect,
		extent: PixelRect,
		parent: Option<&Buffer>,
		shift_x: i32,
		shift_y: i32,
	) -> (PixelRect, bool) {
		if requested == PixelRect::zero() {
			// all-zero means "track the extent"
			return (extent, true);
		}
		if requested.width == 0 && requested.height == 0 {
			log::warn!(
				"peculiar abyss dimensions: {},{} {}x{}",
				requested.x,
				requested.y,
				requested.width,
				requested.height
			);
			return (requested, false);
		}
		if requested.width == -1 || requested.height == -1 {
			if let Some(parent) = parent {
				return (parent.abyss().translated(-shift_x, -shift_y), false);
			}
		}
		(requested, false)
	}

	/// Creates a view of `extent` (in this buffer's coordinates) sharing the
	/// same storage. The view's own coordinates start at `(0, 0)`.
	///
	/// A negative-sized request warns and yields a zero-sized view.
	pub fn create_sub_buffer(&self, extent: PixelRect) -> Result<Buffer> {
		let mut size = extent;
		if extent.width < 0 || extent.height < 0 {
			log::warn!(
				"avoiding creating buffer of size {}x{}, returning an empty buffer instead",
				extent.width,
				extent.height
			);
			size.width = 0;
			size.height = 0;
		}
		let parent_extent = self.extent();
		Buffer::with_options(BufferOptions {
			source: Some(self.clone()),
			extent: Some(PixelRect::new(0, 0, size.width, size.height)),
			shift_x: extent.x - parent_extent.x,
			shift_y: extent.y - parent_extent.y,
			..BufferOptions::default()
		})
	}

	/// A deep logical copy: a new buffer (configured backend) with the same
	/// extent, abyss and contents.
	pub fn dup(&self) -> Result<Buffer> {
		let extent = self.extent();
		let abyss = self.abyss();
		let copy = Buffer::with_options(BufferOptions {
			extent: Some(extent),
			abyss: if abyss == extent { PixelRect::zero() } else { abyss },
			format: Some(self.inner.storage.format()),
			tile_size: Some(self.inner.storage.tile_size()),
			..BufferOptions::default()
		})?;
		copy.copy_from(self, extent, extent.x, extent.y)?;
		Ok(copy)
	}

	pub fn extent(&self) -> PixelRect {
		self.inner.view.read().extent
	}

	pub fn abyss(&self) -> PixelRect {
		self.inner.view.read().abyss
	}

	/// The format callers see; storage-compatible with the storage format.
	pub fn format(&self) -> PixelFormat {
		*self.inner.soft_format.read()
	}

	/// The format tiles are actually stored in.
	pub fn storage_format(&self) -> PixelFormat {
		self.inner.storage.format()
	}

	pub fn tile_size(&self) -> TileSize {
		self.inner.storage.tile_size()
	}

	pub(crate) fn storage(&self) -> &Arc<TileStorage> {
		&self.inner.storage
	}

	pub(crate) fn shift(&self) -> (i32, i32) {
		(self.inner.shift_x, self.inner.shift_y)
	}

	/// Updates the extent; the abyss follows while it tracks the extent.
	pub fn set_extent(&self, extent: PixelRect) {
		let mut view = self.inner.view.write();
		view.extent = extent;
		if view.abyss_tracks_extent {
			view.abyss = extent;
		}
	}

	/// Updates the abyss and stops it tracking the extent.
	pub fn set_abyss(&self, abyss: PixelRect) {
		let mut view = self.inner.view.write();
		view.abyss = abyss;
		view.abyss_tracks_extent = abyss == view.extent;
	}

	/// Changes the presented format. Fails with "invalid format" and leaves
	/// the buffer untouched unless the bytes per pixel match the storage
	/// format's.
	pub fn set_soft_format(&self, format: PixelFormat) -> Result<()> {
		let storage_format = self.inner.storage.format();
		if !storage_format.storage_compatible(&format) {
			bail!(
				"invalid format: {:?} is {} bytes per pixel, storage holds {} ({:?})",
				format,
				format.bytes_per_pixel(),
				storage_format.bytes_per_pixel(),
				storage_format
			);
		}
		*self.inner.soft_format.write() = format;
		Ok(())
	}

	/// Registers a callback for change rectangles, reported in this buffer's
	/// view coordinates. The registration lives as long as the buffer.
	pub fn on_changed<F: Fn(PixelRect) + Send + Sync + 'static>(&self, callback: F) {
		let (shift_x, shift_y) = self.shift();
		let id = self
			.inner
			.storage
			.add_listener(Box::new(move |rect| callback(rect.translated(-shift_x, -shift_y))));
		self.inner.listener_ids.lock().push(id);
	}

	/// Records the extent on the backend and synchronously persists all
	/// dirty state down the chain. A no-op for RAM-backed storages beyond
	/// the extent note.
	pub fn flush(&self) -> Result<()> {
		self.inner.storage.set_backend_extent(self.extent());
		self
			.inner
			.storage
			.flush()
			.context("flushing buffer storage")
	}

	/// Publishes this buffer in the process-wide pool, returning a handle
	/// usable in a `buffer:///` URI.
	pub fn share(&self) -> u32 {
		share::share(self)
	}
}

impl std::fmt::Debug for Buffer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let view = self.inner.view.read();
		f.debug_struct("Buffer")
			.field("extent", &view.extent)
			.field("abyss", &view.abyss)
			.field("shift", &(self.inner.shift_x, self.inner.shift_y))
			.field("format", &*self.inner.soft_format.read())
			.finish()
	}
}
