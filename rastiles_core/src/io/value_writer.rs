//! This module provides the `ValueWriter` struct for writing little-endian values into
//! a growable byte vector, the counterpart of [`super::ValueReader`].
//!
//! # Examples
//!
//! ```
//! use rastiles_core::io::ValueWriter;
//!
//! let mut writer = ValueWriter::new();
//! writer.write_u16(0x0201).unwrap();
//! assert_eq!(writer.into_bytes(), vec![0x01, 0x02]);
//! ```

use anyhow::Result;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

/// Writes little-endian values into an in-memory byte vector.
#[derive(Default)]
pub struct ValueWriter {
	bytes: Vec<u8>,
}

impl ValueWriter {
	#[must_use]
	pub fn new() -> ValueWriter {
		ValueWriter::default()
	}

	pub fn position(&self) -> u64 {
		self.bytes.len() as u64
	}

	pub fn write_u8(&mut self, value: u8) -> Result<()> {
		self.bytes.write_u8(value)?;
		Ok(())
	}

	pub fn write_u16(&mut self, value: u16) -> Result<()> {
		self.bytes.write_u16::<LittleEndian>(value)?;
		Ok(())
	}

	pub fn write_u32(&mut self, value: u32) -> Result<()> {
		self.bytes.write_u32::<LittleEndian>(value)?;
		Ok(())
	}

	pub fn write_u64(&mut self, value: u64) -> Result<()> {
		self.bytes.write_u64::<LittleEndian>(value)?;
		Ok(())
	}

	pub fn write_i32(&mut self, value: i32) -> Result<()> {
		self.bytes.write_i32::<LittleEndian>(value)?;
		Ok(())
	}

	pub fn write_f32(&mut self, value: f32) -> Result<()> {
		self.bytes.write_f32::<LittleEndian>(value)?;
		Ok(())
	}

	pub fn write_slice(&mut self, slice: &[u8]) -> Result<()> {
		self.bytes.write_all(slice)?;
		Ok(())
	}

	/// Appends zero bytes until the writer reaches `position`.
	pub fn pad_to(&mut self, position: u64) -> Result<()> {
		anyhow::ensure!(
			self.position() <= position,
			"cannot pad backwards: at {} already, requested {position}",
			self.position()
		);
		self.bytes.resize(position as usize, 0);
		Ok(())
	}

	#[must_use]
	pub fn into_bytes(self) -> Vec<u8> {
		self.bytes
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::io::ValueReader;

	#[test]
	fn write_then_read_round_trip() {
		let mut w = ValueWriter::new();
		w.write_slice(b"rastiles_v01").unwrap();
		w.write_u32(128).unwrap();
		w.write_i32(-300).unwrap();
		w.write_u64(u64::MAX).unwrap();
		let bytes = w.into_bytes();

		let mut r = ValueReader::new(&bytes);
		assert_eq!(r.read_string(12).unwrap(), "rastiles_v01");
		assert_eq!(r.read_u32().unwrap(), 128);
		assert_eq!(r.read_i32().unwrap(), -300);
		assert_eq!(r.read_u64().unwrap(), u64::MAX);
	}

	#[test]
	fn pad_to_fills_with_zeros() {
		let mut w = ValueWriter::new();
		w.write_u8(0xAA).unwrap();
		w.pad_to(4).unwrap();
		assert_eq!(w.into_bytes(), vec![0xAA, 0, 0, 0]);
	}

	#[test]
	fn pad_backwards_fails() {
		let mut w = ValueWriter::new();
		w.write_u64(1).unwrap();
		assert!(w.pad_to(4).is_err());
	}
}
