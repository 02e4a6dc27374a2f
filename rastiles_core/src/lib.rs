//! Foundational types for the rastiles buffer subsystem: pixel rectangles, tile
//! addresses and sizes, pixel formats with on-demand conversion, little-endian binary
//! IO helpers and the process-wide configuration.

pub mod config;
pub use config::*;
pub mod format;
pub use format::*;
pub mod io;
pub mod types;
pub use types::*;
