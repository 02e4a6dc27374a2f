mod pixel_rect;
mod tile_address;
mod tile_size;

pub use pixel_rect::PixelRect;
pub use tile_address::TileAddress;
pub use tile_size::{DEFAULT_TILE_SIZE, TileSize};
