//! Geometric consistency tests for Web Mercator tile addressing.

use frame_common::tile::{
    normalize_lon, pixel_in_tile, tile_coordinates, tile_to_lonlat_bounds, TileCoord, MAX_ZOOM,
    TILE_SIZE,
};
use std::collections::BTreeSet;
use std::f64::consts::PI;

// ============================================================================
// Helper functions
// ============================================================================

/// Inverse Web Mercator for a world pixel position at `zoom`.
fn world_pixel_to_lonlat(wx: f64, wy: f64, zoom: u8) -> (f64, f64) {
    let scale = (1u64 << zoom) as f64 * TILE_SIZE as f64;
    let lon = wx / scale * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * wy / scale)).sinh().atan().to_degrees();
    (lon, lat)
}

/// Assert the pixel `(px, py)` of `tile` covers lon/lat.
fn assert_pixel_contains(tile: TileCoord, px: u32, py: u32, lon: f64, lat: f64) {
    let wx = (tile.x * TILE_SIZE + px) as f64;
    let wy = (tile.y * TILE_SIZE + py) as f64;

    let (lon_min, lat_max) = world_pixel_to_lonlat(wx, wy, tile.z);
    let (lon_max, lat_min) = world_pixel_to_lonlat(wx + 1.0, wy + 1.0, tile.z);

    assert!(
        lon >= lon_min - 1e-9 && lon < lon_max + 1e-9,
        "lon {} not in [{}, {})",
        lon,
        lon_min,
        lon_max
    );
    assert!(
        lat <= lat_max + 1e-9 && lat > lat_min - 1e-9,
        "lat {} not in ({}, {}]",
        lat,
        lat_min,
        lat_max
    );
}

// ============================================================================
// Tile / pixel consistency
// ============================================================================

#[test]
fn test_liege_tile_and_pixel_consistent() {
    let (lon, lat) = (5.56, 50.59);
    let tile = tile_coordinates(lon, lat, 5);
    assert_eq!(tile, TileCoord::new(5, 16, 10));

    let pixel = pixel_in_tile(lon, lat, 5);
    assert_eq!((pixel.px, pixel.py), (126, 197));

    assert_pixel_contains(tile, pixel.px, pixel.py, lon, lat);
}

#[test]
fn test_tile_bounds_contain_point() {
    let points = [
        (5.56, 50.59),
        (-74.006, 40.7128),
        (151.2093, -33.8688),
        (-0.1276, 51.5072),
        (139.6917, 35.6895),
        (-179.5, 70.0),
    ];

    for &(lon, lat) in &points {
        for zoom in 0..=8 {
            let tile = tile_coordinates(lon, lat, zoom);
            let (lon_min, lat_min, lon_max, lat_max) = tile_to_lonlat_bounds(&tile);
            assert!(lon >= lon_min && lon < lon_max, "zoom {} lon {}", zoom, lon);
            assert!(lat > lat_min && lat <= lat_max, "zoom {} lat {}", zoom, lat);

            let pixel = pixel_in_tile(lon, lat, zoom);
            assert_pixel_contains(tile, pixel.px, pixel.py, lon, lat);
        }
    }
}

#[test]
fn test_wrapped_click_resolves_to_canonical_pixel() {
    let wrapped = normalize_lon(50.59, 5.56 - 360.0 * 3.0);
    assert!((wrapped.lon - 5.56).abs() < 1e-9);
    assert_eq!(wrapped.wrap_offset, -1080.0);

    assert_eq!(
        tile_coordinates(wrapped.lon, wrapped.lat, 3),
        tile_coordinates(5.56, 50.59, 3)
    );
    assert_eq!(
        pixel_in_tile(wrapped.lon, wrapped.lat, 3),
        pixel_in_tile(5.56, 50.59, 3)
    );
}

#[test]
fn test_parent_contains_child_pixel() {
    // A point's tile at zoom z is the ancestor of its tile at zoom z+k.
    let (lon, lat) = (-122.4194, 37.7749);
    let deep = tile_coordinates(lon, lat, 9);
    for zoom in 0..9 {
        assert_eq!(deep.ancestor_at(zoom), tile_coordinates(lon, lat, zoom));
    }
}

#[test]
fn test_deepest_zoom_stays_in_matrix() {
    for (lon, lat) in [(-180.0, 85.0), (179.999_999, -85.0), (5.57, 50.58)] {
        let tile = tile_coordinates(lon, lat, MAX_ZOOM);
        assert!(tile.is_valid(), "{:?}", tile);
        let pixel = pixel_in_tile(lon, lat, MAX_ZOOM);
        assert!(pixel.px < TILE_SIZE && pixel.py < TILE_SIZE);
    }
}

#[test]
fn test_tiles_order_by_zoom_then_column() {
    let tiles: BTreeSet<TileCoord> = [
        TileCoord::new(2, 1, 0),
        TileCoord::new(1, 1, 1),
        TileCoord::new(2, 0, 3),
        TileCoord::new(1, 1, 0),
    ]
    .into_iter()
    .collect();
    assert_eq!(
        tiles.into_iter().collect::<Vec<_>>(),
        vec![
            TileCoord::new(1, 1, 0),
            TileCoord::new(1, 1, 1),
            TileCoord::new(2, 0, 3),
            TileCoord::new(2, 1, 0),
        ]
    );
}
