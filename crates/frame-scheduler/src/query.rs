//! Point queries: reading a physical value back from a rendered tile.
//!
//! A query is split in two. [`PointQuery::prepare`] runs synchronously at
//! click time and captures everything that depends on viewer state (the
//! visible tile source, the colormap, the scheduler generation).
//! [`PendingQuery::resolve`] then fetches and decodes the tile without
//! touching the viewer, so the result can be checked for staleness before it
//! is shown.

use image::GenericImageView;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use frame_common::{
    normalize_lon, pixel_in_tile, tile_coordinates, Colormap, FrameError, FrameResult, Metadata,
    PixelOffset, Rgb, TileCoord, WrappedLonLat, TILE_SIZE,
};
use tile_store::TileSource;

use crate::config::NamedLocation;
use crate::map::MapRenderer;
use crate::scheduler::FrameScheduler;

/// Offset between Kelvin and degrees Celsius.
const KELVIN_OFFSET: f64 = 273.15;

/// Resolves clicks into pending point queries.
#[derive(Debug, Clone)]
pub struct PointQuery {
    named_location: NamedLocation,
}

impl PointQuery {
    pub fn new(named_location: NamedLocation) -> Self {
        Self { named_location }
    }

    /// Capture a query for a click at (lat, lon) on a map at `zoom`.
    ///
    /// Returns `Ok(None)` when no frame is visible.
    pub fn prepare<M: MapRenderer>(
        &self,
        scheduler: &FrameScheduler<M>,
        metadata: &Metadata,
        lat: f64,
        lon: f64,
        zoom: u8,
    ) -> FrameResult<Option<PendingQuery>> {
        let (source, series) = match (scheduler.current_source(), scheduler.series_key()) {
            (Some(source), Some(series)) => (source, series),
            _ => return Ok(None),
        };

        let mut location = normalize_lon(lat, lon);
        let place = if self.named_location.matches(location.lat, location.lon) {
            location.lat = self.named_location.lat;
            location.lon = self.named_location.lon;
            self.named_location.name.clone()
        } else {
            format!("({:.5}, {:.5})", location.lat, location.lon)
        };

        let zoom = zoom.min(metadata.zoom_max);
        let tile = tile_coordinates(location.lon, location.lat, zoom);
        let pixel = pixel_in_tile(location.lon, location.lat, zoom);

        Ok(Some(PendingQuery {
            location,
            place,
            tile,
            pixel,
            source,
            colormap: metadata.colormap(series)?.clone(),
            units: metadata.units(&series.variable).to_string(),
            generation: scheduler.generation(),
            refresh: false,
        }))
    }
}

/// A point query captured at click time, ready to fetch its tile.
#[derive(Debug, Clone)]
pub struct PendingQuery {
    pub location: WrappedLonLat,
    /// Named location or formatted coordinates
    pub place: String,
    pub tile: TileCoord,
    pub pixel: PixelOffset,
    source: Arc<dyn TileSource>,
    colormap: Colormap,
    units: String,
    generation: u64,
    refresh: bool,
}

impl PendingQuery {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this re-reads an open annotation rather than answering a click.
    pub fn is_refresh(&self) -> bool {
        self.refresh
    }

    pub(crate) fn into_refresh(mut self) -> Self {
        self.refresh = true;
        self
    }

    pub fn source_id(&self) -> &str {
        self.source.id()
    }

    /// Fetch the tile, read the target pixel and invert it through the colormap.
    ///
    /// `Ok(None)` when the tile is absent from the container.
    #[instrument(skip(self), fields(source = %self.source.id(), tile = %self.tile))]
    pub async fn resolve(self) -> FrameResult<Option<PointReading>> {
        let bytes = match self.source.get_tile(self.tile).await? {
            Some(bytes) => bytes,
            None => {
                debug!("No tile at query location");
                return Ok(None);
            }
        };

        let color = read_pixel(&bytes, self.pixel)?;
        let value = match self.colormap.invert(&color) {
            Some(value) => value,
            None => return Ok(None),
        };

        let celsius = (self.units == "K").then(|| value - KELVIN_OFFSET);

        Ok(Some(PointReading {
            lat: self.location.lat,
            lon: self.location.display_lon(),
            place: self.place,
            value,
            units: self.units,
            celsius,
            color,
            generation: self.generation,
            refresh: self.refresh,
        }))
    }
}

/// Decode a tile and read the RGB of one pixel, given in 256-pixel tile space.
fn read_pixel(bytes: &[u8], pixel: PixelOffset) -> FrameResult<Rgb> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| FrameError::TileDecode(format!("tile image: {}", e)))?;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(FrameError::TileDecode("empty tile image".to_string()));
    }

    // Tiles are nominally 256 px; scale for other sizes.
    let x = ((pixel.px as u64 * width as u64) / TILE_SIZE as u64).min(width as u64 - 1) as u32;
    let y = ((pixel.py as u64 * height as u64) / TILE_SIZE as u64).min(height as u64 - 1) as u32;

    let [r, g, b, _] = img.get_pixel(x, y).0;
    Ok(Rgb::new(r, g, b))
}

/// The value read back at a clicked location.
#[derive(Debug, Clone, PartialEq)]
pub struct PointReading {
    /// Latitude of the annotation anchor
    pub lat: f64,
    /// Longitude of the annotation anchor, on the clicked globe copy
    pub lon: f64,
    pub place: String,
    pub value: f64,
    pub units: String,
    /// Present when `units` is Kelvin
    pub celsius: Option<f64>,
    /// Pixel color that was inverted
    pub color: Rgb,
    /// Scheduler generation the query was captured at
    pub generation: u64,
    pub refresh: bool,
}

impl PointReading {
    /// Annotation text, one item per line.
    pub fn label(&self) -> String {
        let mut label = format!("{}\n{:.6} {}", self.place, self.value, self.units);
        if let Some(celsius) = self.celsius {
            label.push_str(&format!("\n({:.6} °C)", celsius));
        }
        label
    }
}

impl fmt::Display for PointReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// The single click annotation shown on the map.
#[derive(Debug, Clone, Default)]
pub struct Popup {
    open: Option<PointReading>,
}

impl Popup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a reading, replacing any open annotation.
    pub fn open(&mut self, reading: PointReading) {
        self.open = Some(reading);
    }

    /// Close the annotation and forget its location.
    pub fn close(&mut self) {
        self.open = None;
    }

    pub fn reading(&self) -> Option<&PointReading> {
        self.open.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Where to re-issue the query after a frame or series change.
    pub fn last_location(&self) -> Option<(f64, f64)> {
        self.open.as_ref().map(|r| (r.lat, r.lon))
    }
}
