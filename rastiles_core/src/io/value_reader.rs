//! This module provides the `ValueReader` struct for reading little-endian values from
//! a byte slice, used by the swap-file header and index codec.
//!
//! # Examples
//!
//! ```
//! use rastiles_core::io::ValueReader;
//!
//! let data = [0x01, 0x02, 0x03, 0x04];
//! let mut reader = ValueReader::new(&data);
//! assert_eq!(reader.read_u16().unwrap(), 0x0201);
//! assert_eq!(reader.read_u16().unwrap(), 0x0403);
//! assert!(reader.read_u8().is_err());
//! ```

use anyhow::{Result, ensure};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Reads little-endian values from a byte slice, tracking the position.
pub struct ValueReader<'a> {
	cursor: Cursor<&'a [u8]>,
	len: u64,
}

impl<'a> ValueReader<'a> {
	#[must_use]
	pub fn new(slice: &'a [u8]) -> ValueReader<'a> {
		ValueReader {
			len: slice.len() as u64,
			cursor: Cursor::new(slice),
		}
	}

	pub fn position(&self) -> u64 {
		self.cursor.position()
	}

	pub fn remaining(&self) -> u64 {
		self.len - self.cursor.position()
	}

	fn check(&self, bytes: u64) -> Result<()> {
		ensure!(
			self.remaining() >= bytes,
			"unexpected end of data: need {bytes} bytes at position {}, have {}",
			self.position(),
			self.remaining()
		);
		Ok(())
	}

	pub fn read_u8(&mut self) -> Result<u8> {
		self.check(1)?;
		Ok(self.cursor.read_u8()?)
	}

	pub fn read_u16(&mut self) -> Result<u16> {
		self.check(2)?;
		Ok(self.cursor.read_u16::<LittleEndian>()?)
	}

	pub fn read_u32(&mut self) -> Result<u32> {
		self.check(4)?;
		Ok(self.cursor.read_u32::<LittleEndian>()?)
	}

	pub fn read_u64(&mut self) -> Result<u64> {
		self.check(8)?;
		Ok(self.cursor.read_u64::<LittleEndian>()?)
	}

	pub fn read_i32(&mut self) -> Result<i32> {
		self.check(4)?;
		Ok(self.cursor.read_i32::<LittleEndian>()?)
	}

	pub fn read_f32(&mut self) -> Result<f32> {
		self.check(4)?;
		Ok(self.cursor.read_f32::<LittleEndian>()?)
	}

	/// Reads `length` raw bytes as a UTF-8 string (used for magic words).
	pub fn read_string(&mut self, length: usize) -> Result<String> {
		self.check(length as u64)?;
		let start = self.position() as usize;
		let slice = &self.cursor.get_ref()[start..start + length];
		self.cursor.set_position(self.position() + length as u64);
		Ok(String::from_utf8_lossy(slice).into_owned())
	}
}
