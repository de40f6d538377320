//! PNG tiles and tile containers for tests.

use bytes::Bytes;
use image::{ImageOutputFormat, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use frame_common::{Rgb, SeriesKey, TileCoord, TILE_SIZE};
use tile_store::{
    ArchiveBuilder, MemoryBlobReader, PmTilesSource, TileMemoryCache, TileSource,
    TileSourceFactory,
};

use crate::fixtures::ramp_color;

fn encode_png(img: &RgbaImage) -> Bytes {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageOutputFormat::Png)
        .expect("PNG encoding to memory");
    Bytes::from(out.into_inner())
}

/// A 256x256 tile of a single color.
pub fn solid_png(color: Rgb) -> Bytes {
    let img = RgbaImage::from_pixel(TILE_SIZE, TILE_SIZE, Rgba([color.r, color.g, color.b, 255]));
    encode_png(&img)
}

/// A 256x256 tile whose column `x` is painted with palette color `x`.
///
/// Reading pixel (px, py) through a fixture ramp colormap yields the value
/// at index `px`.
pub fn gradient_png() -> Bytes {
    let img = RgbaImage::from_fn(TILE_SIZE, TILE_SIZE, |x, _| {
        let c = ramp_color(x as u8);
        Rgba([c.r, c.g, c.b, 255])
    });
    encode_png(&img)
}

/// Every tile coordinate from zoom 0 through `max_zoom`.
pub fn all_tiles(max_zoom: u8) -> Vec<TileCoord> {
    (0..=max_zoom)
        .flat_map(|z| {
            let n = 1u32 << z;
            (0..n).flat_map(move |x| (0..n).map(move |y| TileCoord::new(z, x, y)))
        })
        .collect()
}

/// A container holding `tile` at every coordinate up to `max_zoom`.
pub fn uniform_archive(tile: Bytes, max_zoom: u8) -> Bytes {
    let mut builder = ArchiveBuilder::new();
    for coord in all_tiles(max_zoom) {
        builder
            .add_tile(coord, tile.clone())
            .expect("fixture tile is addressable");
    }
    builder.build().expect("fixture archive builds")
}

/// Write one container per time step of `series` under `root`.
pub fn write_series(
    root: &Path,
    series: &SeriesKey,
    duration: usize,
    archive: impl Fn(usize) -> Bytes,
) -> std::io::Result<()> {
    for t in 0..=duration {
        let path = root.join(series.container_path(t));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, archive(t))?;
    }
    Ok(())
}

/// A temporary data root holding `metadata.json` and one container per
/// time step of every series in `series`.
pub fn temp_data_root(
    metadata_json: &str,
    series: &[SeriesKey],
    duration: usize,
    archive: impl Fn(&SeriesKey, usize) -> Bytes,
) -> std::io::Result<TempDir> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("metadata.json"), metadata_json)?;
    for key in series {
        write_series(dir.path(), key, duration, |t| archive(key, t))?;
    }
    Ok(dir)
}

/// Serves containers from memory, keyed by their path under the data root.
///
/// Unknown paths open as empty containers, so every tile request on them
/// fails the way a missing remote file would. Every `open` is recorded.
#[derive(Default)]
pub struct MemorySourceFactory {
    containers: HashMap<String, Bytes>,
    cache: Option<Arc<TileMemoryCache>>,
    opened: Mutex<Vec<String>>,
}

impl MemorySourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a tile byte cache between all opened sources.
    pub fn with_cache(mut self, cache: Arc<TileMemoryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, archive: Bytes) {
        self.containers.insert(path.into(), archive);
    }

    /// Register a container for each time step of `series`.
    pub fn with_series(
        mut self,
        series: &SeriesKey,
        duration: usize,
        archive: impl Fn(usize) -> Bytes,
    ) -> Self {
        for t in 0..=duration {
            self.insert(series.container_path(t), archive(t));
        }
        self
    }

    /// Paths passed to `open`, in call order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

impl TileSourceFactory for MemorySourceFactory {
    fn open(&self, series: &SeriesKey, time_index: usize) -> Arc<dyn TileSource> {
        let path = series.container_path(time_index);
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(path.clone());
        }
        let bytes = self.containers.get(&path).cloned().unwrap_or_default();
        Arc::new(PmTilesSource::new(
            Arc::new(MemoryBlobReader::new(path, bytes)),
            self.cache.clone(),
        ))
    }
}
