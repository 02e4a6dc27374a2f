//! In-process buffer sharing: a process-wide pool of small integer handles
//! and the `buffer://` URI scheme over it.
//!
//! Only local URIs are supported: an empty host and an absent or own process
//! id. Remote hosts and foreign processes parse but are rejected as
//! reserved.

use super::Buffer;
use anyhow::{Context, Result, bail};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::process;

/// Lazily initialized pool mapping handles to shared buffers. Handles are
/// small positive integers; released slots are recycled.
#[derive(Default)]
struct IdPool {
	slots: Vec<Option<Buffer>>,
	free: Vec<usize>,
}

lazy_static! {
	static ref POOL: Mutex<IdPool> = Mutex::new(IdPool::default());
}

/// Adds a buffer to the pool, returning its handle.
pub(super) fn share(buffer: &Buffer) -> u32 {
	let mut pool = POOL.lock();
	let slot = match pool.free.pop() {
		Some(slot) => {
			pool.slots[slot] = Some(buffer.clone());
			slot
		}
		None => {
			pool.slots.push(Some(buffer.clone()));
			pool.slots.len() - 1
		}
	};
	slot as u32 + 1
}

/// Releases a handle, making its slot available for reuse. Unknown handles
/// are ignored.
pub fn release_shared(handle: u32) {
	if handle == 0 {
		return;
	}
	let slot = handle as usize - 1;
	let mut pool = POOL.lock();
	if slot < pool.slots.len() && pool.slots[slot].take().is_some() {
		pool.free.push(slot);
	}
}

fn lookup(handle: u32) -> Option<Buffer> {
	if handle == 0 {
		return None;
	}
	let pool = POOL.lock();
	pool.slots.get(handle as usize - 1).and_then(|slot| slot.clone())
}

/// The canonical local URI for a handle:
/// `buffer://<host>[:port]/[process_id]/<handle>` with an empty host.
pub fn buffer_uri(handle: u32) -> String {
	format!("buffer:///{}/{}", process::id(), handle)
}

/// Resolves a `buffer://` URI against the process-wide pool.
pub fn open_shared(uri: &str) -> Result<Buffer> {
	let rest = uri
		.strip_prefix("buffer://")
		.with_context(|| format!("'{uri}' is not a buffer URI"))?;

	let (authority, path) = match rest.find('/') {
		Some(slash) => rest.split_at(slash),
		None => bail!("'{uri}' has no handle"),
	};
	if !authority.is_empty() {
		bail!("remote buffer URIs are reserved: host '{authority}' in '{uri}'");
	}

	let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
	let (process_id, handle) = match segments.as_slice() {
		[handle] => ("", *handle),
		[process_id, handle] => (*process_id, *handle),
		_ => bail!("'{uri}' is not a valid buffer URI"),
	};
	if !process_id.is_empty() && process_id != process::id().to_string() {
		bail!("buffer URIs of other processes are reserved: '{uri}'");
	}

	let handle: u32 = handle
		.parse()
		.with_context(|| format!("'{handle}' is not a valid buffer handle"))?;
	lookup(handle).with_context(|| format!("no shared buffer with handle {handle}"))
}
