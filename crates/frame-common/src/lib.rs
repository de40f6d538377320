//! Common types and utilities shared across the forecast frame viewer.

pub mod colormap;
pub mod error;
pub mod metadata;
pub mod tile;
pub mod time;

pub use colormap::{closest_color, Colormap, Rgb, VariableColormap};
pub use error::{FrameError, FrameResult};
pub use metadata::{Metadata, SeriesKey, VariableInfo, UNKNOWN_UNITS};
pub use tile::{
    normalize_lon, pixel_in_tile, tile_coordinates, PixelOffset, TileCoord, WrappedLonLat,
    MAX_ZOOM, TILE_SIZE,
};
pub use time::{time_interval, ForecastRun};
