//! Web Mercator tile addressing.
//!
//! Maps geographic coordinates to XYZ tile coordinates and to the pixel
//! offset inside the owning 256x256 tile.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Edge length of a tile in pixels.
pub const TILE_SIZE: u32 = 256;

/// Deepest zoom a tile container can address.
pub const MAX_ZOOM: u8 = 26;

/// A tile coordinate (z/x/y).
///
/// Ordered by zoom, then column, then row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TileCoord {
    /// Zoom level
    pub z: u8,
    /// Column (x)
    pub x: u32,
    /// Row (y)
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Number of tiles along one axis at this zoom.
    pub fn span(&self) -> u32 {
        1u32 << self.z
    }

    /// Whether x and y lie inside the tile matrix for this zoom.
    pub fn is_valid(&self) -> bool {
        self.x < self.span() && self.y < self.span()
    }

    /// Get the parent tile (zoom - 1).
    pub fn parent(&self) -> Option<TileCoord> {
        if self.z == 0 {
            return None;
        }
        Some(TileCoord {
            z: self.z - 1,
            x: self.x / 2,
            y: self.y / 2,
        })
    }

    /// The tile at `zoom` that contains this one.
    ///
    /// Returns `self` unchanged when `zoom >= self.z`.
    pub fn ancestor_at(&self, zoom: u8) -> TileCoord {
        if zoom >= self.z {
            return *self;
        }
        let shift = self.z - zoom;
        TileCoord {
            z: zoom,
            x: self.x >> shift,
            y: self.y >> shift,
        }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// A pixel offset inside a single tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelOffset {
    pub px: u32,
    pub py: u32,
}

/// A click position reduced to the canonical longitude range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WrappedLonLat {
    pub lat: f64,
    /// Longitude in [-180, 180)
    pub lon: f64,
    /// Multiple of 360 that was removed; add it back to re-display on the
    /// globe copy that was originally clicked.
    pub wrap_offset: f64,
}

impl WrappedLonLat {
    /// Longitude on the originally clicked globe copy.
    pub fn display_lon(&self) -> f64 {
        self.lon + self.wrap_offset
    }
}

/// Normalize a longitude to [-180, 180), remembering the removed multiple of 360.
pub fn normalize_lon(lat: f64, lon: f64) -> WrappedLonLat {
    let wrap_offset = ((lon + 180.0) / 360.0).floor() * 360.0;
    let canonical = ((lon + 180.0) % 360.0 + 360.0) % 360.0 - 180.0;
    WrappedLonLat {
        lat,
        lon: canonical,
        wrap_offset,
    }
}

/// Fractional position in the world pixel grid at `zoom`, in units of tiles.
fn mercator_tile_fraction(lon: f64, lat: f64, zoom: u8) -> (f64, f64) {
    let n = 2f64.powi(zoom as i32);
    let lat_rad = lat * PI / 180.0;
    let x = (lon + 180.0) / 360.0 * n;
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n;
    (x, y)
}

/// Convert lon/lat to Web Mercator tile coordinates.
///
/// `lon` must already be normalized to [-180, 180).
pub fn tile_coordinates(lon: f64, lat: f64, zoom: u8) -> TileCoord {
    let (x, y) = mercator_tile_fraction(lon, lat, zoom);
    let max = 2f64.powi(zoom as i32) - 1.0;

    TileCoord {
        z: zoom,
        x: x.floor().clamp(0.0, max) as u32,
        y: y.floor().clamp(0.0, max) as u32,
    }
}

/// Pixel offset of lon/lat inside its owning tile at `zoom`.
pub fn pixel_in_tile(lon: f64, lat: f64, zoom: u8) -> PixelOffset {
    let (x, y) = mercator_tile_fraction(lon, lat, zoom);
    let size = TILE_SIZE as f64;

    let px = (x * size).floor().max(0.0) as u64 % TILE_SIZE as u64;
    let py = (y * size).floor().max(0.0) as u64 % TILE_SIZE as u64;

    PixelOffset {
        px: px as u32,
        py: py as u32,
    }
}

/// Convert Web Mercator tile coordinates to lon/lat bounds
/// as `(lon_min, lat_min, lon_max, lat_max)`.
pub fn tile_to_lonlat_bounds(coord: &TileCoord) -> (f64, f64, f64, f64) {
    let n = coord.span() as f64;

    let lon_min = coord.x as f64 / n * 360.0 - 180.0;
    let lon_max = (coord.x + 1) as f64 / n * 360.0 - 180.0;

    let lat_max = (PI * (1.0 - 2.0 * coord.y as f64 / n)).sinh().atan().to_degrees();
    let lat_min = (PI * (1.0 - 2.0 * (coord.y + 1) as f64 / n))
        .sinh()
        .atan()
        .to_degrees();

    (lon_min, lat_min, lon_max, lat_max)
}

/// All tiles at `zoom` within `radius` tiles of the one containing lon/lat.
///
/// Columns wrap around the antimeridian; rows are clipped at the poles.
pub fn tiles_around(lon: f64, lat: f64, zoom: u8, radius: u32) -> Vec<TileCoord> {
    let center = tile_coordinates(lon, lat, zoom);
    let span = center.span() as i64;
    let r = radius as i64;
    let mut tiles = Vec::new();

    for dy in -r..=r {
        let y = center.y as i64 + dy;
        if y < 0 || y >= span {
            continue;
        }
        for dx in -r..=r {
            let x = (center.x as i64 + dx).rem_euclid(span);
            let coord = TileCoord::new(zoom, x as u32, y as u32);
            if !tiles.contains(&coord) {
                tiles.push(coord);
            }
        }
    }

    tiles
}
